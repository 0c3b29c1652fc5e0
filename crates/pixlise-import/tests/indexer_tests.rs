//! Catalog indexers over a filesystem store
//!
//! Job status and parameter files are written the way the job runner lays
//! them out, then the job summary indexer is run on one changed key.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use pixlise_import::indexer::{DatasetIndexer, JobSummaryIndexer};
use pixlise_import::paths;
use pixlise_import::quant::{JobStatusValue, JobSummaryMap};
use pixlise_import::storage::{LocalStore, ObjectStore, ObjectStoreExt};
use pixlise_import::summary::SummaryFile;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const JOBS: &str = "jobs";
const DATASET: &str = "983561";
const NOW: i64 = 1_700_000_000;
const VISIBLE_SECS: i64 = 600;

// ============================================================================
// Helpers
// ============================================================================

fn setup() -> (TempDir, Arc<LocalStore>) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(dir.path()));
    (dir, store)
}

fn status_key(job: &str) -> String {
    format!("{}{job}-status.json", paths::job_status_prefix(DATASET))
}

async fn put_status(store: &LocalStore, job: &str, status: &str, end: i64, output: &str) {
    let body = json!({
        "jobId": job,
        "status": status,
        "message": "",
        "endUnixTime": end,
        "outputFilePath": output,
        "piquantLogList": null
    });
    store.put_json(JOBS, &status_key(job), &body).await.unwrap();
}

async fn put_params(store: &LocalStore, job: &str, dataset_path: &str) {
    let body = json!({
        "pmcs": [7, 8, 9],
        "name": format!("quant {job}"),
        "dataBucket": "datasets",
        "datasetPath": dataset_path,
        "datasetID": DATASET,
        "jobBucket": JOBS,
        "detectorConfig": "PIXL/PiquantConfigs/v6",
        "elements": ["Fe", "Ca"],
        "parameters": "-q,pPIETXCFsr -b,0,12,60,910,280,16",
        "runTimeSec": 60,
        "coresPerNode": 4,
        "startUnixTime": NOW - 100,
        "creator": {"name": "Peter", "user_id": "u123", "email": "p@example.com"},
        "roiID": "",
        "elementSetID": "",
        "piquantVersion": "3.2.8",
        "quantMode": "AB",
        "comments": "",
        "roiIDs": null
    });
    store
        .put_json(JOBS, &paths::job_params(DATASET, job), &body)
        .await
        .unwrap();
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_job_summary_skips_jobs_without_params() {
    let (_dir, store) = setup();
    put_status(&store, "job-a", "nodes_running", 0, "").await;
    put_status(&store, "job-b", "starting", 0, "").await;
    put_params(&store, "job-a", "Datasets/983561/dataset.bin").await;

    let indexer = JobSummaryIndexer::new(store.clone(), JOBS, VISIBLE_SECS);
    let jobs = indexer.run(&status_key("job-b"), NOW).await.unwrap();

    assert_eq!(jobs.keys().collect::<Vec<_>>(), vec!["job-a"]);
    let item = &jobs["job-a"];
    assert!(!item.shared);
    assert!(item.elements.is_empty());
    assert_eq!(item.params.pmcs_count, 3);
    assert_eq!(item.params.params.elements, vec!["Fe", "Ca"]);
    assert!(item.params.params.roi_ids.is_empty());
    assert_eq!(item.status.status, JobStatusValue::NodesRunning);

    let written: JobSummaryMap = store
        .get_json(JOBS, &paths::job_summaries(DATASET))
        .await
        .unwrap();
    assert_eq!(written, jobs);

    // Field names match what the viewer reads
    let raw: serde_json::Value = store
        .get_json(JOBS, &paths::job_summaries(DATASET))
        .await
        .unwrap();
    let a = &raw["job-a"];
    assert_eq!(a["params"]["pmcsCount"], 3);
    assert_eq!(a["params"]["datasetPath"], "Datasets/983561/dataset.bin");
    assert_eq!(a["jobId"], "job-a");
    assert_eq!(a["params"]["roiIDs"], json!([]));
}

#[tokio::test]
async fn test_job_summary_drops_expired_and_pathless_jobs() {
    let (_dir, store) = setup();
    // Finished long ago, with output
    put_status(&store, "old", "complete", NOW - 3600, "Quantifications/old.bin").await;
    put_params(&store, "old", "Datasets/983561/dataset.bin").await;
    // Finished recently
    put_status(&store, "recent", "complete", NOW - 60, "Quantifications/recent.bin").await;
    put_params(&store, "recent", "Datasets/983561/dataset.bin").await;
    // Failed long ago, stays visible
    put_status(&store, "failed", "error", NOW - 3600, "").await;
    put_params(&store, "failed", "Datasets/983561/dataset.bin").await;
    // No dataset path
    put_status(&store, "broken", "starting", 0, "").await;
    put_params(&store, "broken", "").await;

    let indexer = JobSummaryIndexer::new(store.clone(), JOBS, VISIBLE_SECS);
    let jobs = indexer.run(&status_key("recent"), NOW).await.unwrap();

    assert_eq!(jobs.keys().collect::<Vec<_>>(), vec!["failed", "recent"]);
}

#[tokio::test]
async fn test_job_summary_rejects_unrelated_key() {
    let (_dir, store) = setup();
    let indexer = JobSummaryIndexer::new(store.clone(), JOBS, VISIBLE_SECS);
    assert!(indexer.run("Datasets/983561/summary.json", NOW).await.is_err());
}

#[tokio::test]
async fn test_dataset_index_honours_blocklist() {
    let (_dir, store) = setup();
    for id in ["300", "100", "200"] {
        let summary = SummaryFile {
            dataset_id: id.to_string(),
            title: format!("dataset {id}"),
            ..Default::default()
        };
        store
            .put_json("datasets", &paths::dataset_summary(id), &summary)
            .await
            .unwrap();
    }
    store
        .put("datasets", "Datasets/100/dataset.bin", vec![1, 2, 3])
        .await
        .unwrap();
    store
        .put("datasets", "Datasets/400/summary.json", b"not json".to_vec())
        .await
        .unwrap();
    store
        .put_json("config", paths::BAD_DATASET_IDS, &vec!["200"])
        .await
        .unwrap();

    let indexer = DatasetIndexer::new(store.clone(), "datasets", "config", 2);
    let index = indexer.run().await.unwrap();

    let ids: Vec<&str> = index.datasets.iter().map(|s| s.dataset_id.as_str()).collect();
    assert_eq!(ids, vec!["100", "300"]);

    let written: serde_json::Value = store.get_json("config", paths::DATASET_INDEX).await.unwrap();
    assert_eq!(written["datasets"][1]["title"], "dataset 300");
}
