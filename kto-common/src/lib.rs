pub mod error;
pub mod experiments;
pub mod secrets;

pub use error::LaunchError;
pub use experiments::ExperimentTable;
pub use secrets::Secrets;
