//! Rebuilds `JobSummaries/<dataset>-jobs.json` from the job status and
//! parameter files of one dataset.

use pixlise_common::{PixliseError, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::paths::{job_params, job_status_prefix, job_summaries, JOB_STATUS_ROOT, JOB_STATUS_SUFFIX};
use crate::quant::{JobParams, JobStatus, JobSummaryItem, JobSummaryMap};
use crate::storage::{ObjectStore, ObjectStoreExt};

/// Splits `JobStatus/<dataset>/<job>-status.json` into dataset and job ids.
/// Empty segments are ignored.
pub fn decode_job_status_key(key: &str) -> Result<(String, String)> {
    let bad = |reason: &str| PixliseError::invalid_format(key, reason);
    let parts: Vec<&str> = key.split('/').filter(|p| !p.is_empty()).collect();

    let [root, dataset_id, file_name] = parts.as_slice() else {
        return Err(bad("expected JobStatus/<dataset>/<job>-status.json"));
    };
    if *root != JOB_STATUS_ROOT {
        return Err(bad("not under the job status root"));
    }
    let job_id = file_name
        .strip_suffix(JOB_STATUS_SUFFIX)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| bad("unexpected status file name"))?;

    Ok((dataset_id.to_string(), job_id.to_string()))
}

pub struct JobSummaryIndexer {
    store: Arc<dyn ObjectStore>,
    container: String,
    completed_visible_secs: i64,
}

/// Fetches every key on its own task; results arrive tagged with their
/// position, `None` standing in for a failed read.
async fn fetch_all<T>(store: &Arc<dyn ObjectStore>, container: &str, keys: &[String]) -> Vec<Option<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<(usize, Option<T>)>(keys.len().max(1));
    for (idx, key) in keys.iter().enumerate() {
        let tx = tx.clone();
        let store = Arc::clone(store);
        let container = container.to_string();
        let key = key.clone();
        tokio::spawn(async move {
            let item = match store.get_json::<T>(&container, &key).await {
                Ok(item) => Some(item),
                Err(e) => {
                    error!(key = %key, error = %e, "Failed to read job file");
                    None
                },
            };
            // Receiver outlives every sender
            let _ = tx.send((idx, item)).await;
        });
    }
    drop(tx);

    let mut out: Vec<Option<T>> = (0..keys.len()).map(|_| None).collect();
    while let Some((idx, item)) = rx.recv().await {
        out[idx] = item;
    }
    out
}

impl JobSummaryIndexer {
    pub fn new(store: Arc<dyn ObjectStore>, container: impl Into<String>, completed_visible_secs: i64) -> Self {
        Self {
            store,
            container: container.into(),
            completed_visible_secs,
        }
    }

    pub fn handles_key(key: &str) -> bool {
        decode_job_status_key(key).is_ok()
    }

    /// Rebuilds the summary for the dataset named by a changed status key
    #[instrument(skip(self), fields(container = %self.container))]
    pub async fn run(&self, changed_key: &str, now_unix_sec: i64) -> Result<JobSummaryMap> {
        let (dataset_id, _) = decode_job_status_key(changed_key)?;
        info!(dataset_id = %dataset_id, "Processing quant jobs");

        let mut status_keys = Vec::new();
        let mut job_ids = Vec::new();
        for key in self.store.list(&self.container, &job_status_prefix(&dataset_id)).await? {
            match decode_job_status_key(&key) {
                Ok((_, job_id)) => {
                    status_keys.push(key);
                    job_ids.push(job_id);
                },
                Err(e) => error!(key = %key, error = %e, "Unexpected file in status listing"),
            }
        }
        let param_keys: Vec<String> = job_ids.iter().map(|id| job_params(&dataset_id, id)).collect();
        info!(jobs = job_ids.len(), "Fetching status and parameter files");

        let (statuses, params) = tokio::join!(
            fetch_all::<JobStatus>(&self.store, &self.container, &status_keys),
            fetch_all::<JobParams>(&self.store, &self.container, &param_keys),
        );

        let mut jobs = JobSummaryMap::new();
        for ((job_id, status), (param_key, params)) in job_ids
            .into_iter()
            .zip(statuses)
            .zip(param_keys.iter().zip(params))
        {
            let (Some(status), Some(params)) = (status, params) else {
                continue;
            };
            if params.params.dataset_path.is_empty() {
                error!(key = %param_key, "Found empty dataset path in job params file");
                continue;
            }
            if status.is_expired(now_unix_sec, self.completed_visible_secs) {
                debug!(job_id = %job_id, "Skipping completed job");
                continue;
            }
            debug!(job_id = %job_id, status = ?status.status, "Found job");
            jobs.insert(job_id, JobSummaryItem::new(status, params));
        }

        let key = job_summaries(&dataset_id);
        self.store.put_json(&self.container, &key, &jobs).await?;
        info!(jobs = jobs.len(), key = %key, "Wrote job summary");
        Ok(jobs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_job_status_key() {
        assert_eq!(
            decode_job_status_key("JobStatus/983561/u9a8tr7ja02qu2m0-status.json").unwrap(),
            ("983561".to_string(), "u9a8tr7ja02qu2m0".to_string())
        );
        assert_eq!(
            decode_job_status_key("/JobStatus//983561/j-status.json").unwrap(),
            ("983561".to_string(), "j".to_string())
        );

        for bad in [
            "JobStatus/983561",
            "JobData/983561/j-status.json",
            "JobStatus/983561/-status.json",
            "JobStatus/983561/j.json",
            "JobStatus/983561/j/x-status.json",
        ] {
            assert!(decode_job_status_key(bad).is_err(), "{bad}");
            assert!(!JobSummaryIndexer::handles_key(bad));
        }
    }
}
