pub mod barrier;
pub mod context;
pub mod error;
pub mod node_path;
pub mod repository;
pub mod retry;
