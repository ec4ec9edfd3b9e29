//! `hrake-engine`: hierarchical proportional raking engine.
//!
//! Pure engine crate: receives pre-loaded fine, coarse and hierarchy tables,
//! returns the raked fine table and a run summary. No CLI or IO dependencies.

pub mod align;
pub mod apply;
pub mod config;
pub mod engine;
pub mod error;
pub mod factor;
pub mod hierarchy;
pub mod merge;
pub mod model;
pub mod partition;
pub mod plan;
pub mod reconcile;

pub use config::{RakeConfig, RunPaths};
pub use engine::{run, run_plan};
pub use error::{ErrorKind, RakeError};
pub use hierarchy::{HierarchyIndex, HierarchyRecord};
pub use model::{EntityTable, RakeResult, RakeSummary, Row, RunKey, Strata};
pub use plan::{Plan, RakeInput, Stage};
pub use reconcile::ImputeMap;
