pub mod analytics;
pub mod api;
pub mod backfill;
pub mod clock;
pub mod config;
pub mod controller;
pub mod domain;
pub mod engine;
pub mod error;
pub mod repo;
pub mod retrieval;
pub mod telemetry;
pub mod upstream;

pub use engine::{EngineSettings, WindEngine};
pub use error::{WindError, WindResult};
