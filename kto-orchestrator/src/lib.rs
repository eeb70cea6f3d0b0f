pub mod archive;
pub mod artifacts;
pub mod batch;
pub mod bootstrap;
pub mod manifest;
pub mod readiness;
pub mod setup_script;
pub mod transport;
