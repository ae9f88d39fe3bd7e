//! Run and series records
//!
//! ## Schema Overview
//!
//! ```text
//! Experiment ── head RunRecord ──parent_id──> RunRecord ──parent_id──> ...
//!                    │
//!                    └──< SeriesPoint (N) [per series attribute, by step]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trueno_fetch::experiment::{RunRecord, SeriesPoint};
//!
//! let root = RunRecord::new("RUN-1", "pretrain");
//! let head = RunRecord::builder("RUN-2", "finetune")
//!     .experiment_head("exp_a")
//!     .parent(root.run_id())
//!     .fork_step(100.0)
//!     .build();
//!
//! let point = SeriesPoint::builder(101.0, 0.42).preview(0.5).build();
//! assert!(point.is_preview());
//! assert_eq!(head.parent_id(), Some("RUN-1"));
//! ```

mod run_record;
mod series_point;

pub use run_record::{ContainerType, RunRecord, RunRecordBuilder};
pub use series_point::{SeriesPoint, SeriesPointBuilder, SeriesValue};
