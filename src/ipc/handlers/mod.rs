pub mod core;
pub mod courses;
pub mod ingest;
pub mod metrics;
pub mod simulation;
pub mod targets;
pub mod weights;
