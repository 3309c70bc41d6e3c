//! Writing validated records to the authoritative store

pub mod classification_log;
pub mod engine;
pub mod postgres;
pub mod store;

pub use classification_log::ClassificationLog;
pub use engine::{
    BatchOutcome, BatchProgress, FailedBatch, NoopObserver, UploadEngine, UploadObserver, UploadReport,
};
pub use postgres::PgRecordStore;
pub use store::{MemoryStore, RecordStore};
