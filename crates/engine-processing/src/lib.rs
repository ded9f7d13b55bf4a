pub mod channel;
pub mod dumper;
pub mod error;
pub mod importer;
pub mod metadata;

#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
