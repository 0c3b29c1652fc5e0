//! In-memory archive trees
//!
//! Deliveries arrive as zip files that accumulate per dataset. They are
//! unpacked oldest first into one [`ArchiveTree`], so a file delivered later
//! replaces the same path from an earlier delivery. Manually uploaded
//! add-ons are layered on top the same way.

use chrono::NaiveDateTime;
use pixlise_common::{PixliseError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use tracing::debug;

use crate::paths::DATASET_ADDONS_ROOT;
use crate::product_id::base_name;

const ARCHIVE_TIMESTAMP_FORMAT: &str = "%d-%m-%Y-%H-%M-%S";

/// Relative path (always `/` separated) to file contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl ArchiveTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, data: Vec<u8>) {
        let path = path.into();
        let path = path.trim_start_matches('/').to_string();
        self.files.insert(path, data);
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Names of the top-level directories
    pub fn root_dirs(&self) -> BTreeSet<&str> {
        self.files
            .keys()
            .filter_map(|p| p.split_once('/').map(|(dir, _)| dir))
            .collect()
    }

    /// Paths of the files directly inside `dir`
    pub fn files_in(&self, dir: &str) -> Vec<&str> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.files
            .keys()
            .filter_map(|p| {
                p.strip_prefix(&prefix)
                    .filter(|rest| !rest.contains('/'))
                    .map(|_| p.as_str())
            })
            .collect()
    }

    /// Unpacks a zip over the current contents. Returns the number of files
    /// written.
    pub fn extract_zip(&mut self, data: &[u8], source: &str) -> Result<usize> {
        let zip_err = |e: zip::result::ZipError| PixliseError::invalid_format(source, e.to_string());

        let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(zip_err)?;
        let mut count = 0;

        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(zip_err)?;
            if file.is_dir() {
                continue;
            }

            let Some(path) = file.enclosed_name() else {
                return Err(PixliseError::invalid_format(
                    source,
                    format!("unsafe entry path: {}", file.name()),
                ));
            };
            let path = path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let mut contents = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
            file.read_to_end(&mut contents)?;
            debug!("Extracted {} ({} bytes)", path, contents.len());

            self.files.insert(path, contents);
            count += 1;
        }

        Ok(count)
    }
}

/// Splits an archive file name like `161677829-12-06-2022-06-41-00.zip` into
/// the dataset id and the delivery time in unix seconds.
pub fn decode_archive_file_name(file_name: &str) -> Result<(String, i64)> {
    let name = base_name(file_name);
    let bad = |reason: String| PixliseError::invalid_format(name, reason);

    let (dataset_id, rest) = name
        .split_once('-')
        .ok_or_else(|| bad("unexpected archive file name".into()))?;
    if dataset_id.is_empty() || !dataset_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad(format!("archive name must start with a numeric id, got \"{dataset_id}\"")));
    }

    let stamp = rest.rsplit_once('.').map_or(rest, |(stem, _)| stem);
    let time = NaiveDateTime::parse_from_str(stamp, ARCHIVE_TIMESTAMP_FORMAT)
        .map_err(|e| bad(format!("bad archive timestamp \"{stamp}\": {e}")))?;

    Ok((dataset_id.to_string(), time.and_utc().timestamp()))
}

/// Orders archive keys oldest delivery first. Any name that does not decode
/// fails the whole listing.
pub fn order_archives(keys: &[String]) -> Result<Vec<String>> {
    let mut stamped = keys
        .iter()
        .map(|k| {
            if !k.to_ascii_lowercase().ends_with(".zip") {
                return Err(PixliseError::invalid_format(k.as_str(), "expected only zip files in archive"));
            }
            decode_archive_file_name(k).map(|(_, ts)| (ts, k.clone()))
        })
        .collect::<Result<Vec<_>>>()?;
    stamped.sort();
    Ok(stamped.into_iter().map(|(_, k)| k).collect())
}

/// Where a manual upload lands in the archive tree.
///
/// `dataset-addons/<id>/custom-meta.json` lands at the root and
/// `dataset-addons/<id>/MATCHED/x.json` keeps its directories. Any other
/// shape is rejected.
pub fn decode_manual_upload_path(key: &str) -> Result<String> {
    let trimmed = key.trim_start_matches('/');
    let parts: Vec<&str> = trimmed.split('/').collect();
    let bad = || PixliseError::invalid_format(key, "manual upload path invalid");

    if parts.first() != Some(&DATASET_ADDONS_ROOT) {
        return Err(bad());
    }
    match parts.len() {
        n if n > 3 => Ok(parts[2..].join("/")),
        3 if parts[2] == "custom-meta.json" => Ok(parts[2].to_string()),
        _ => Err(bad()),
    }
}
