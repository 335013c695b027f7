mod store;

pub use store::{CameraRecord, CameraStore, CameraUpdate, CrowdSummary};
