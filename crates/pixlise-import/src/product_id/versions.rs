use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::FileNameMeta;

/// Fields that must match for two files to be versions of the same product.
/// Timestamps, geometry, thumbnail and version are free to differ.
fn version_group_key(meta: &FileNameMeta) -> String {
    [
        meta.extension.to_uppercase().as_str(),
        &meta.instrument,
        &meta.colour_filter,
        &meta.prod_type,
        &meta.site,
        &meta.drive,
        &meta.seq_rtt,
        &meta.cam_specific,
        &meta.downsample,
        &meta.compression,
        &meta.producer,
    ]
    .concat()
}

struct Candidate<'a> {
    name: &'a str,
    meta: FileNameMeta,
    version: i32,
    sclk: i32,
}

/// Picks the newest file of each product.
///
/// Files are grouped by `version_group_key`; within a group the highest
/// version wins, ties going to the lowest SCLK. Names that do not parse are
/// logged and skipped. The result is keyed by the name as passed in.
pub fn latest_versions<S: AsRef<str>>(files: &[S]) -> BTreeMap<String, FileNameMeta> {
    let mut groups: HashMap<String, Candidate<'_>> = HashMap::new();

    for file in files {
        let name = file.as_ref();
        let meta = match FileNameMeta::parse(name) {
            Ok(meta) => meta,
            Err(e) => {
                info!(file = %name, error = %e, "Ignoring file with unparseable name");
                continue;
            },
        };

        let version = meta.version_number().unwrap_or_else(|e| {
            info!(file = %name, error = %e, "Failed to read version");
            0
        });
        let sclk = meta.sclk().unwrap_or_else(|e| {
            info!(file = %name, error = %e, "Failed to read SCLK");
            0
        });

        let candidate = Candidate {
            name,
            meta,
            version,
            sclk,
        };

        match groups.get_mut(&version_group_key(&candidate.meta)) {
            Some(selected) => {
                let newer = candidate.version > selected.version
                    || (candidate.version == selected.version && candidate.sclk < selected.sclk);
                if newer {
                    debug!(kept = %candidate.name, dropped = %selected.name, "Newer version");
                    *selected = candidate;
                } else {
                    debug!(kept = %selected.name, dropped = %candidate.name, "Older version");
                }
            },
            None => {
                groups.insert(version_group_key(&candidate.meta), candidate);
            },
        }
    }

    groups
        .into_values()
        .map(|c| (c.name.to_string(), c.meta))
        .collect()
}
