pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, RecError};
pub use services::{
    AdRecommender, Estimator, ReferenceData, SnapshotStore, TelemetryEmitter, UserContextFetcher,
};
