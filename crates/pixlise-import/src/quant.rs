//! Quantification job records, as written by the job runner and summarized
//! by the job summary indexer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatusValue {
    Starting,
    PreparingNodes,
    NodesRunning,
    GatheringResults,
    Complete,
    Error,
}

/// `JobStatus/<dataset>/<job>-status.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub status: JobStatusValue,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub end_unix_time: i64,
    #[serde(default)]
    pub output_file_path: String,
    #[serde(default)]
    pub piquant_log_list: Option<Vec<String>>,
}

impl JobStatus {
    /// Finished jobs stay listed for a while after they end
    pub fn is_expired(&self, now_unix_sec: i64, visible_secs: i64) -> bool {
        self.status == JobStatusValue::Complete
            && !self.output_file_path.is_empty()
            && self.end_unix_time != 0
            && now_unix_sec - self.end_unix_time > visible_secs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
}

/// Everything a job was started with, except its PMC list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStartingParameters {
    pub name: String,
    #[serde(rename = "dataBucket")]
    pub data_bucket: String,
    #[serde(rename = "datasetPath")]
    pub dataset_path: String,
    #[serde(rename = "datasetID")]
    pub dataset_id: String,
    #[serde(rename = "jobBucket")]
    pub jobs_bucket: String,
    #[serde(rename = "detectorConfig")]
    pub detector_config: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub elements: Vec<String>,
    pub parameters: String,
    #[serde(rename = "runTimeSec")]
    pub run_time_sec: i32,
    #[serde(rename = "coresPerNode")]
    pub cores_per_node: i32,
    #[serde(rename = "startUnixTime")]
    pub start_unix_time: i64,
    pub creator: UserInfo,
    #[serde(rename = "roiID")]
    pub roi_id: String,
    #[serde(rename = "elementSetID")]
    pub element_set_id: String,
    #[serde(rename = "piquantVersion")]
    pub piquant_version: String,
    #[serde(rename = "quantMode")]
    pub quant_mode: String,
    pub comments: String,
    /// Older files carry null here
    #[serde(rename = "roiIDs", deserialize_with = "null_as_empty")]
    pub roi_ids: Vec<String>,
    #[serde(rename = "includeDwells", skip_serializing_if = "std::ops::Not::not")]
    pub include_dwells: bool,
}

fn null_as_empty<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// `JobData/<dataset>/<job>/params.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    #[serde(default)]
    pub pmcs: Vec<i32>,
    #[serde(flatten)]
    pub params: JobStartingParameters,
}

/// Job parameters with the PMC list reduced to its length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummaryParams {
    #[serde(rename = "pmcsCount")]
    pub pmcs_count: usize,
    #[serde(flatten)]
    pub params: JobStartingParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummaryItem {
    pub shared: bool,
    pub params: JobSummaryParams,
    /// Unknown until the job completes
    pub elements: Vec<String>,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobSummaryItem {
    pub fn new(status: JobStatus, params: JobParams) -> Self {
        Self {
            shared: false,
            params: JobSummaryParams {
                pmcs_count: params.pmcs.len(),
                params: params.params,
            },
            elements: Vec::new(),
            status,
        }
    }
}

/// `JobSummaries/<dataset>-jobs.json`, keyed by job id
pub type JobSummaryMap = BTreeMap<String, JobSummaryItem>;
