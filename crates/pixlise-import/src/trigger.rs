//! Decodes what started a run: a storage-change envelope or a re-import
//! request.

use chrono::{DateTime, Utc};
use pixlise_common::{PixliseError, Result};
use serde::Deserialize;
use tracing::info;

use crate::archive::decode_archive_file_name;
use crate::paths::DATASET_ADDONS_ROOT;

/// Event source of object storage notifications
pub const STORAGE_EVENT_SOURCE: &str = "aws:s3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestTrigger {
    /// Empty for re-import requests
    pub source_container: String,
    /// Empty for re-import requests
    pub source_key: String,
    pub dataset_id: String,
    pub log_id: String,
}

impl IngestTrigger {
    pub fn is_reimport(&self) -> bool {
        self.source_key.is_empty()
    }
}

/// One object named by a storage-change envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub container: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
struct ReimportEnvelope {
    #[serde(rename = "datasetaddons")]
    dataset_addons: ReimportRequest,
}

#[derive(Debug, Deserialize)]
struct ReimportRequest {
    dir: String,
    log: String,
}

#[derive(Debug, Deserialize)]
struct StorageEnvelope {
    #[serde(rename = "Records", default)]
    records: Vec<StorageRecord>,
}

#[derive(Debug, Deserialize)]
struct StorageRecord {
    #[serde(rename = "eventSource", default)]
    event_source: String,
    s3: Option<StorageEntity>,
}

#[derive(Debug, Deserialize)]
struct StorageEntity {
    bucket: NamedBucket,
    object: NamedObject,
}

#[derive(Debug, Deserialize)]
struct NamedBucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NamedObject {
    key: String,
}

/// Every object named in a storage-change envelope. Records from other
/// sources are skipped.
pub fn decode_storage_event(payload: &[u8]) -> Result<Vec<StorageObject>> {
    let envelope: StorageEnvelope = serde_json::from_slice(payload)
        .map_err(|e| PixliseError::TriggerMalformed(format!("not a storage-change envelope: {e}")))?;
    if envelope.records.is_empty() {
        return Err(PixliseError::TriggerMalformed("envelope has no records".into()));
    }

    Ok(envelope
        .records
        .into_iter()
        .filter(|r| r.event_source == STORAGE_EVENT_SOURCE)
        .filter_map(|r| r.s3)
        .map(|s3| StorageObject {
            container: s3.bucket.name,
            key: s3.object.key,
        })
        .collect())
}

/// Log id of a run started by a new archive
pub fn generate_log_id(now: DateTime<Utc>) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("auto-import-{} ({})", now.format("%d-%b-%Y %H-%M-%S"), &random[..8])
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestTriggerDecoder;

impl IngestTriggerDecoder {
    pub fn decode(&self, payload: &[u8]) -> Result<IngestTrigger> {
        self.decode_at(payload, Utc::now())
    }

    pub fn decode_at(&self, payload: &[u8], now: DateTime<Utc>) -> Result<IngestTrigger> {
        if let Ok(envelope) = serde_json::from_slice::<ReimportEnvelope>(payload) {
            return decode_reimport(envelope.dataset_addons);
        }

        let record = serde_json::from_slice::<StorageEnvelope>(payload)
            .ok()
            .and_then(|e| e.records.into_iter().next())
            .ok_or_else(|| PixliseError::TriggerMalformed("unexpected or no message type encountered".into()))?;

        if record.event_source != STORAGE_EVENT_SOURCE {
            return Err(PixliseError::TriggerMalformed(format!(
                "unexpected event source: \"{}\"",
                record.event_source
            )));
        }
        let s3 = record
            .s3
            .ok_or_else(|| PixliseError::TriggerMalformed("storage record has no object".into()))?;

        let (dataset_id, _) = decode_archive_file_name(&s3.object.key)
            .map_err(|e| PixliseError::TriggerMalformed(e.to_string()))?;

        let trigger = IngestTrigger {
            source_container: s3.bucket.name,
            source_key: s3.object.key,
            dataset_id,
            log_id: generate_log_id(now),
        };
        info!(
            dataset_id = %trigger.dataset_id,
            key = %trigger.source_key,
            log_id = %trigger.log_id,
            "Decoded new archive trigger"
        );
        Ok(trigger)
    }
}

fn decode_reimport(request: ReimportRequest) -> Result<IngestTrigger> {
    let parts: Vec<&str> = request.dir.split('/').collect();
    if parts.len() != 3 || parts[0] != DATASET_ADDONS_ROOT || parts[1].len() <= 1 {
        return Err(PixliseError::TriggerMalformed(format!(
            "failed to find dataset id in re-import path \"{}\"",
            request.dir
        )));
    }
    if request.log.is_empty() {
        return Err(PixliseError::TriggerMalformed("re-import request has no log id".into()));
    }

    info!(dataset_id = parts[1], log_id = %request.log, "Decoded re-import trigger");
    Ok(IngestTrigger {
        source_container: String::new(),
        source_key: String::new(),
        dataset_id: parts[1].to_string(),
        log_id: request.log,
    })
}
