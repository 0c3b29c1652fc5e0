//! Parsed instrument data shared between the decoders and the assembler

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A typed metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Str(String),
    Int(i32),
    Float(f32),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to float
    pub fn as_float(&self) -> Option<f32> {
        match self {
            MetaValue::Float(f) => Some(*f),
            MetaValue::Int(i) => Some(*i as f32),
            MetaValue::Str(_) => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Str(s) => f.write_str(s),
            MetaValue::Int(i) => write!(f, "{i}"),
            MetaValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

pub type MetaData = BTreeMap<String, MetaValue>;

pub const META_PMC: &str = "PMC";
pub const META_DETECTOR_ID: &str = "DETECTOR_ID";
pub const META_READTYPE: &str = "READTYPE";
pub const META_SOURCEFILE: &str = "SOURCEFILE";
pub const META_XPERCHAN: &str = "XPERCHAN";
pub const META_OFFSET: &str = "OFFSET";
pub const META_LIVETIME: &str = "LIVETIME";
pub const META_REALTIME: &str = "REALTIME";
pub const META_SCLK: &str = "SCLK";

/// Acquisition style of a spectrum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReadType {
    Normal,
    Dwell,
    BulkSum,
    MaxValue,
}

impl ReadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadType::Normal => "Normal",
            ReadType::Dwell => "Dwell",
            ReadType::BulkSum => "BulkSum",
            ReadType::MaxValue => "MaxValue",
        }
    }
}

impl std::str::FromStr for ReadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Normal" => Ok(ReadType::Normal),
            "Dwell" => Ok(ReadType::Dwell),
            "BulkSum" => Ok(ReadType::BulkSum),
            "MaxValue" => Ok(ReadType::MaxValue),
            other => Err(format!("unknown read type: {other}")),
        }
    }
}

impl fmt::Display for ReadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detector's spectrum plus the metadata it was read with
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectorSample {
    pub meta: MetaData,
    pub counts: Vec<i64>,
}

impl DetectorSample {
    pub fn new(meta: MetaData, counts: Vec<i64>) -> Self {
        Self { meta, counts }
    }

    pub fn detector_id(&self) -> Option<&str> {
        self.meta.get(META_DETECTOR_ID).and_then(MetaValue::as_str)
    }

    pub fn read_type(&self) -> Option<ReadType> {
        self.meta
            .get(META_READTYPE)
            .and_then(MetaValue::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn float_meta(&self, key: &str) -> Option<f32> {
        self.meta.get(key).and_then(MetaValue::as_float)
    }

    pub fn set(&mut self, key: &str, value: MetaValue) {
        self.meta.insert(key.to_string(), value);
    }
}

pub type SpectraByPmc = BTreeMap<i32, Vec<DetectorSample>>;

/// Projection of a beam location into a context image's pixel plane
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageProjection {
    pub i: f32,
    pub j: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BeamLocation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geom_corr: Option<f32>,
    /// Context image PMC to (i, j)
    pub ij: BTreeMap<i32, ImageProjection>,
}

pub type BeamLocationByPmc = BTreeMap<i32, BeamLocation>;

/// Inferred housekeeping column type, ordered by how permissive it is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HousekeepingData {
    /// Column names, PMC excluded
    pub column_names: Vec<String>,
    pub column_types: Vec<ColumnType>,
    pub rows: BTreeMap<i32, Vec<MetaValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudoIntensityRange {
    pub name: String,
    pub start_channel: i32,
    pub end_channel: i32,
}

pub type PseudoIntensities = BTreeMap<i32, Vec<f32>>;

/// Colour/filter image (RGBU or DISCO) carried without per-PMC alignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub file_name: String,
    pub pmc: i32,
    /// Colour filter letter from the file name, `W` for white
    pub leds: String,
    pub prod_type: String,
}

/// An externally produced image registered onto a context image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedImage {
    pub image_name: String,
    pub aligned_beam_pmc: i32,
    pub x_offset: f32,
    pub y_offset: f32,
    pub x_scale: f32,
    pub y_scale: f32,
}

/// Dataset level metadata, mostly from the housekeeping file name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileMeta {
    pub rtt: String,
    pub sclk: i32,
    pub sol: String,
    pub site_id: i32,
    pub drive_id: i32,
    pub target_id: String,
    pub site: String,
    pub target: String,
    pub title: String,
}
