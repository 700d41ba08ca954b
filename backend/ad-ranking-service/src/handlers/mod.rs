/// HTTP handlers for the ad ranking API
pub mod ads;

pub use ads::register_routes;
