pub mod config;
pub mod error;
pub mod node_files;
pub mod simulation;
