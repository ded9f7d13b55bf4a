pub mod core;
pub mod job;
pub mod metadata;
pub mod position;
pub mod records;
