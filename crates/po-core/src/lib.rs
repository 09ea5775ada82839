//! Container orchestration for generated website previews: stack-aware
//! materialization, image build and container lifecycle, port allocation
//! and resource reclamation.

pub mod error;
pub mod models;
pub mod services;

pub use error::{ErrorKind, OrchestratorError, Result};
