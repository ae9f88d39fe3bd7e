//! # Trueno-Fetch: Read-Only Experiment Metadata Client
//!
//! **Version**: 0.1.0
//!
//! Trueno-Fetch pulls runs, experiments, attributes and metric series out of
//! an experiment-tracking backend and into tables. A small filter algebra is
//! compiled into the backend query language; fetches are split into bounded
//! batches, fanned out over a worker pool and merged back deterministically.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke safety**: filters are type-checked on construction, limits
//!   are validated before any call is made
//! - **Jidoka**: one failed page aborts the whole fetch; no partial tables
//! - **Genchi Genbutsu**: untyped attributes are typed from what the
//!   backend actually holds, never guessed
//! - **Heijunka**: run/attribute batches are levelled under query-size and
//!   batch-size limits
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use trueno_fetch::attribute::Value;
//! use trueno_fetch::client::{Client, TableRequest};
//! use trueno_fetch::context::Context;
//! use trueno_fetch::experiment::RunRecord;
//! use trueno_fetch::filter::Filter;
//! use trueno_fetch::transport::MemoryBackend;
//!
//! let backend = Arc::new(MemoryBackend::builder("lab/sweeps").build());
//! backend.add_run(RunRecord::builder("SW-1", "sweep-1").experiment_head("baseline").build());
//! backend.set_attribute("SW-1", "metrics/acc", Value::Float(0.91))?;
//!
//! let client = Client::new(backend)?;
//! let ctx = Context::new().with_project("lab/sweeps")?.with_api_token("token");
//! let table = client.fetch_experiments_table(
//!     &TableRequest::new()
//!         .filter(Filter::gt("metrics/acc", 0.9)?)
//!         .attributes(["metrics/acc"])
//!         .context(ctx),
//! )?;
//! assert_eq!(table.labels().collect::<Vec<_>>(), vec!["baseline"]);
//! # Ok::<(), trueno_fetch::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod attribute;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod experiment;
pub mod fetch;
pub mod filter;
pub mod query;
pub mod readonly;
pub mod series;
pub mod table;
pub mod transport;

pub use error::{Error, Result, Warning};
