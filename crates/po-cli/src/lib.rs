pub mod cli;
pub mod project_files;
pub mod render;
