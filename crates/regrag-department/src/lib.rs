//! regrag department — per-department graphs, detection and the query entry point.

pub mod detector;
pub mod engine;
pub mod keywords;
pub mod manager;
pub mod permissions;
pub mod types;

pub use detector::DepartmentDetector;
pub use engine::QueryEngine;
pub use manager::{DepartmentGraphManager, DepartmentIndex};
pub use permissions::PermissionTable;
pub use types::{
    CallerMetadata, DepartmentDecision, QueryAnswer, QueryOutcome, QueryStatus, Signal, SignalSource,
};
