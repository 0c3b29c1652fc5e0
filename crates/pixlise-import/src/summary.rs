//! Dataset headline record and the diff between two imports

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Contents of `Datasets/<id>/summary.json`, and one entry of the dataset
/// index. Field order is the on-disk order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryFile {
    pub dataset_id: String,
    pub group: String,
    pub drive_id: i32,
    pub site_id: i32,
    pub target_id: String,
    pub site: String,
    pub target: String,
    pub title: String,
    pub sol: String,
    #[serde(deserialize_with = "lenient_int")]
    pub rtt: i32,
    pub sclk: i32,
    pub context_image: String,
    pub location_count: usize,
    pub data_file_size: usize,
    pub context_images: usize,
    pub tiff_context_images: usize,
    pub normal_spectra: usize,
    pub dwell_spectra: usize,
    pub bulk_spectra: usize,
    pub max_spectra: usize,
    pub pseudo_intensities: usize,
    pub detector_config: String,
    #[serde(rename = "create_unixtime_sec")]
    pub create_unix_time_sec: i64,
}

/// Older summaries stored the RTT as a string
fn lenient_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i32),
        Str(String),
    }

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(v) => Ok(v),
        IntOrString::Str(s) if s.trim().is_empty() => Ok(0),
        IntOrString::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// What changed between a dataset's previous and current import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Spectra,
    Image,
    Housekeeping,
    Unknown,
}

impl UpdateKind {
    /// Spectra counts win over image counts, which win over the
    /// housekeeping-derived fields.
    pub fn classify(old: &SummaryFile, new: &SummaryFile) -> Self {
        let spectra = |s: &SummaryFile| {
            (s.normal_spectra, s.dwell_spectra, s.bulk_spectra, s.max_spectra)
        };
        if spectra(old) != spectra(new) {
            UpdateKind::Spectra
        } else if old.context_images != new.context_images {
            UpdateKind::Image
        } else if old.drive_id != new.drive_id
            || old.site != new.site
            || old.target != new.target
            || old.title != new.title
        {
            UpdateKind::Housekeeping
        } else {
            UpdateKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Spectra => "spectra",
            UpdateKind::Image => "image",
            UpdateKind::Housekeeping => "housekeeping",
            UpdateKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
