pub mod cleanup;
pub mod config_loader;
pub mod deployer;
pub mod docker;
pub mod engine;
pub mod file_lock;
pub mod health;
pub mod logs;
pub mod materializer;
pub mod orchestrator;
pub mod ports;
pub mod project_source;
pub mod stack_registry;
pub mod state;
