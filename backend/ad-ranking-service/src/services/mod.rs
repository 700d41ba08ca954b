pub mod budget;
pub mod estimator;
pub mod features;
pub mod ranking;
pub mod recommender;
pub mod scoring;
pub mod snapshot;
pub mod telemetry;
pub mod user_context;

pub use estimator::Estimator;
pub use recommender::AdRecommender;
pub use snapshot::{ReferenceData, ReferenceSnapshot, SnapshotStore, SnapshotWatcher};
pub use telemetry::TelemetryEmitter;
pub use user_context::{UserContext, UserContextFetcher};
