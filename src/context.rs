//! Project and credential resolution
//!
//! The effective context for a call is resolved field by field:
//! explicit per-call context, then the process-wide global context, then
//! the environment (`TRUENO_PROJECT`, `TRUENO_API_TOKEN`).
//!
//! The global slot is an atomically swapped snapshot, so readers always see
//! a whole context and never a half-applied update.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::{Error, Result};

/// Project path variable (`workspace/project`).
pub const ENV_PROJECT: &str = "TRUENO_PROJECT";
/// API token variable.
pub const ENV_API_TOKEN: &str = "TRUENO_API_TOKEN";

static GLOBAL_CONTEXT: ArcSwapOption<Context> = ArcSwapOption::const_empty();

/// A possibly partial project/credential pair.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Context {
    project: Option<String>,
    api_token: Option<String>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("project", &self.project)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn validate_project(project: &str) -> Result<()> {
    match project.split_once('/') {
        Some((workspace, name))
            if !workspace.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok(())
        }
        _ => Err(Error::InvalidInput(format!(
            "project `{project}` must have the form workspace/project"
        ))),
    }
}

impl Context {
    /// Empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the project path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` unless `project` is `workspace/project`.
    pub fn with_project(mut self, project: impl Into<String>) -> Result<Self> {
        let project = project.into();
        validate_project(&project)?;
        self.project = Some(project);
        Ok(self)
    }

    /// Set the API token.
    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Project path, if set.
    #[must_use]
    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    /// API token, if set.
    #[must_use]
    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_deref()
    }

    /// Context read from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `TRUENO_PROJECT` is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Context read through `lookup`. Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Same as [`Context::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut ctx = Self::new();
        if let Some(p) = lookup(ENV_PROJECT).filter(|v| !v.is_empty()) {
            ctx = ctx.with_project(p)?;
        }
        if let Some(t) = lookup(ENV_API_TOKEN).filter(|v| !v.is_empty()) {
            ctx = ctx.with_api_token(t);
        }
        Ok(ctx)
    }

    /// Resolve a complete context: explicit > global > environment, per field.
    ///
    /// # Errors
    ///
    /// Returns `MissingContext` naming the field no source supplied.
    pub fn resolve(
        explicit: Option<&Self>,
        global: Option<&Self>,
        env: &Self,
    ) -> Result<ResolvedContext> {
        let sources = [explicit, global, Some(env)];
        let project = sources
            .iter()
            .flatten()
            .find_map(|c| c.project.clone())
            .ok_or(Error::MissingContext("project"))?;
        let api_token = sources
            .iter()
            .flatten()
            .find_map(|c| c.api_token.clone())
            .ok_or(Error::MissingContext("API token"))?;
        Ok(ResolvedContext { project, api_token })
    }
}

/// A complete context, ready to authenticate backend calls.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedContext {
    project: String,
    api_token: String,
}

impl ResolvedContext {
    /// Build directly from both fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` unless `project` is `workspace/project`.
    pub fn new(project: impl Into<String>, api_token: impl Into<String>) -> Result<Self> {
        let project = project.into();
        validate_project(&project)?;
        Ok(Self {
            project,
            api_token: api_token.into(),
        })
    }

    /// Full project path.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Workspace part of the project path.
    #[must_use]
    pub fn workspace(&self) -> &str {
        self.project.split_once('/').map_or("", |(w, _)| w)
    }

    /// Bearer token.
    #[must_use]
    pub fn api_token(&self) -> &str {
        &self.api_token
    }
}

impl fmt::Debug for ResolvedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedContext")
            .field("project", &self.project)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

/// Replace the global context, returning the previous one.
pub fn set_context(context: Option<Context>) -> Option<Arc<Context>> {
    GLOBAL_CONTEXT.swap(context.map(Arc::new))
}

/// Set only the global project, keeping the global token.
///
/// # Errors
///
/// Returns `InvalidInput` unless `project` is `workspace/project`.
pub fn set_project(project: impl Into<String>) -> Result<()> {
    let project = project.into();
    validate_project(&project)?;
    GLOBAL_CONTEXT.rcu(|current| {
        let mut next = current.as_deref().cloned().unwrap_or_default();
        next.project = Some(project.clone());
        Some(Arc::new(next))
    });
    Ok(())
}

/// Set only the global API token, keeping the global project.
pub fn set_api_token(token: impl Into<String>) {
    let token = token.into();
    GLOBAL_CONTEXT.rcu(|current| {
        let mut next = current.as_deref().cloned().unwrap_or_default();
        next.api_token = Some(token.clone());
        Some(Arc::new(next))
    });
}

/// Snapshot of the global context.
#[must_use]
pub fn global_context() -> Option<Arc<Context>> {
    GLOBAL_CONTEXT.load_full()
}

/// Resolve the context for a call against the live global slot and
/// environment.
///
/// # Errors
///
/// `MissingContext` or `InvalidInput` as for [`Context::resolve`] and
/// [`Context::from_env`].
pub fn effective_context(explicit: Option<&Context>) -> Result<ResolvedContext> {
    let global = global_context();
    let env = Context::from_env()?;
    let resolved = Context::resolve(explicit, global.as_deref(), &env)?;
    tracing::trace!(project = resolved.project(), "resolved context");
    Ok(resolved)
}
