//! Object keys shared by the importer and the indexers

/// Delivered zip archives, named `<dataset-id>-DD-MM-YYYY-HH-MM-SS.zip`
pub const ARCHIVE_ROOT: &str = "Archive";

/// Root of every imported dataset's output
pub const DATASETS_ROOT: &str = "Datasets";

pub const SUMMARY_FILE: &str = "summary.json";
pub const DATASET_FILE: &str = "dataset.bin";
pub const CONTEXT_IMAGE_DIR: &str = "context-image";

/// Consolidated dataset index, in the config container
pub const DATASET_INDEX: &str = "PixliseConfig/datasets.json";
/// Ids the dataset index leaves out
pub const BAD_DATASET_IDS: &str = "PixliseConfig/bad-dataset-ids.json";

/// Per-dataset last import time, in the config container
pub const IMPORT_TIMES: &str = "DatasetConfig/import-times.json";
pub const PSEUDO_INTENSITY_RANGES: &str = "DatasetConfig/StandardPseudoIntensities.csv";

/// Manually uploaded files layered over the archive, in the manual container
pub const DATASET_ADDONS_ROOT: &str = "dataset-addons";

pub const JOB_STATUS_ROOT: &str = "JobStatus";
pub const JOB_DATA_ROOT: &str = "JobData";
pub const JOB_SUMMARIES_ROOT: &str = "JobSummaries";
pub const JOB_STATUS_SUFFIX: &str = "-status.json";
pub const JOB_PARAMS_FILE: &str = "params.json";

pub fn archive_prefix(dataset_id: &str) -> String {
    format!("{ARCHIVE_ROOT}/{dataset_id}-")
}

pub fn archive_key(file_name: &str) -> String {
    format!("{ARCHIVE_ROOT}/{file_name}")
}

pub fn dataset_prefix(dataset_id: &str) -> String {
    format!("{DATASETS_ROOT}/{dataset_id}/")
}

pub fn dataset_summary(dataset_id: &str) -> String {
    format!("{DATASETS_ROOT}/{dataset_id}/{SUMMARY_FILE}")
}

pub fn dataset_file(dataset_id: &str) -> String {
    format!("{DATASETS_ROOT}/{dataset_id}/{DATASET_FILE}")
}

pub fn context_image(dataset_id: &str, file_name: &str) -> String {
    format!("{DATASETS_ROOT}/{dataset_id}/{CONTEXT_IMAGE_DIR}/{file_name}")
}

pub fn addons_prefix(dataset_id: &str) -> String {
    format!("{DATASET_ADDONS_ROOT}/{dataset_id}/")
}

pub fn job_status_prefix(dataset_id: &str) -> String {
    format!("{JOB_STATUS_ROOT}/{dataset_id}/")
}

pub fn job_params(dataset_id: &str, job_id: &str) -> String {
    format!("{JOB_DATA_ROOT}/{dataset_id}/{job_id}/{JOB_PARAMS_FILE}")
}

pub fn job_summaries(dataset_id: &str) -> String {
    format!("{JOB_SUMMARIES_ROOT}/{dataset_id}-jobs.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_keys() {
        assert_eq!(dataset_summary("189137412"), "Datasets/189137412/summary.json");
        assert_eq!(
            context_image("189137412", "a.png"),
            "Datasets/189137412/context-image/a.png"
        );
        assert_eq!(archive_prefix("189137412"), "Archive/189137412-");
    }

    #[test]
    fn test_job_keys() {
        assert_eq!(job_params("ds1", "job7"), "JobData/ds1/job7/params.json");
        assert_eq!(job_summaries("ds1"), "JobSummaries/ds1-jobs.json");
        assert_eq!(job_status_prefix("ds1"), "JobStatus/ds1/");
    }
}
