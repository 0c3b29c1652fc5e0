//! Fan-in reducers that rebuild catalog files from many small ones

pub mod datasets;
pub mod jobs;

pub use datasets::{DatasetIndex, DatasetIndexer};
pub use jobs::{decode_job_status_key, JobSummaryIndexer};
