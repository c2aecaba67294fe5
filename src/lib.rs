/// Declare modules and make them public
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod initialization;

/// Re-export the entry points used by main.rs and the integration tests
pub use application::{ApiResponse, BuildOptions, BuildReport, EmployeeRef, ReportKind, SalaryAgent};
pub use config::{load_config, AppConfig};
pub use domain::generation::Strategy;
pub use domain::records::DateRange;
pub use error::RagError;
pub use initialization::Services;
