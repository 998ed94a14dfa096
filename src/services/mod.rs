pub mod analyzers;
pub mod db;
pub mod digest;
pub mod finalizer;
pub mod frame_aligner;
pub mod metadata_log;
pub mod orchestrator;
pub mod resampler;
pub mod state_store;

pub use db::BulkLoader;
pub use metadata_log::MetadataLog;
pub use orchestrator::Orchestrator;
pub use state_store::RecordingStateStore;
