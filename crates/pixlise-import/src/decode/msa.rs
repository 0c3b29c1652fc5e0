//! MSA/EMSA spectrum files
//!
//! # Format
//!
//! ```text
//! #FORMAT      : EMSA/MAS Spectral Data File
//! #NPOINTS     : 4096
//! #NCOLUMNS    : 2     Number of data columns
//! #DATATYPE    : YY
//! #XPERCHAN    :  10.0, 10.0    eV per channel
//! #LIVETIME    :  25.09,  25.08
//! ##TRIGGERS   : 45993, 43902
//! #SPECTRUM    :
//! 0, 0
//! 23, 19
//! ...
//! #ENDOFDATA   :
//! ```
//!
//! Single detector files carry one column and a `DETECTOR_ID`. Dual detector
//! files carry two columns (A then B), no `DETECTOR_ID`, and the per
//! detector metadata as comma separated pairs which are split apart once
//! the whole file is read.

use pixlise_common::Result;
use tracing::debug;

use super::{as_text, DecodeContext, Decoder};
use crate::model::{DetectorSample, MetaData, MetaValue, META_DETECTOR_ID, META_PMC};

const SPECTRUM_START: &str = "#SPECTRUM";
const SPECTRUM_END: &str = "#ENDOFDATA";

const INT_FIELDS: [&str; 3] = ["PMC", "SCLK", "RTT"];
const FLOAT_FIELDS: [&str; 7] = [
    "XPERCHAN",
    "OFFSET",
    "LIVETIME",
    "REALTIME",
    "XPOSITION",
    "YPOSITION",
    "ZPOSITION",
];

/// Fields a dual detector file stores as "A, B" pairs
const PER_DETECTOR_FIELDS: [&str; 13] = [
    "XPERCHAN",
    "OFFSET",
    "LIVETIME",
    "REALTIME",
    "TRIGGERS",
    "EVENTS",
    "KETEK_ICR",
    "KETEK_OCR",
    "OVERFLOWS",
    "UNDERFLOWS",
    "BASE_EVENTS",
    "RESETS",
    "OVER_ADCMAX",
];

/// Pairs that stay as text until the dual detector split
const DEFERRED_FIELDS: [&str; 4] = ["XPERCHAN", "OFFSET", "LIVETIME", "REALTIME"];

#[derive(Debug, Clone, Copy, Default)]
pub struct MsaDecoder {
    pub multi_detector: bool,
    pub expect_pmc: bool,
    /// Dual detector file that only carries detector A; B reuses A's values
    pub detector_a_duplicate: bool,
}

impl MsaDecoder {
    pub fn single_detector(expect_pmc: bool) -> Self {
        Self {
            multi_detector: false,
            expect_pmc,
            detector_a_duplicate: false,
        }
    }

    pub fn multi_detector(expect_pmc: bool) -> Self {
        Self {
            multi_detector: true,
            expect_pmc,
            detector_a_duplicate: false,
        }
    }

    pub fn with_detector_a_duplicate(mut self, duplicate: bool) -> Self {
        self.detector_a_duplicate = duplicate;
        self
    }

    fn expected_columns(&self) -> usize {
        match (self.multi_detector, self.detector_a_duplicate) {
            (false, _) | (true, true) => 1,
            (true, false) => 2,
        }
    }

    fn check_block_start(&self, meta: &MetaData, ctx: &DecodeContext<'_>) -> Result<()> {
        let (required, datatype): (&[&str], &str) = if self.multi_detector {
            (&["NPOINTS", "DATATYPE", "NCOLUMNS"], "YY")
        } else {
            (&[META_DETECTOR_ID, "NPOINTS", "DATATYPE", "NCOLUMNS"], "Y")
        };

        for field in required {
            if !meta.contains_key(*field) {
                return Err(ctx.invalid(format!("failed to find {field} in metadata")));
            }
        }

        if meta_text(meta, "DATATYPE") != Some(datatype) {
            return Err(ctx.invalid(format!("expected DATATYPE \"{datatype}\"")));
        }

        let columns: usize = meta_text(meta, "NCOLUMNS")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ctx.invalid("failed to read NCOLUMNS"))?;
        if columns != self.expected_columns() {
            return Err(ctx.invalid(format!(
                "expected NCOLUMNS \"{}\", got {columns}",
                self.expected_columns()
            )));
        }

        if self.multi_detector && meta.contains_key(META_DETECTOR_ID) {
            return Err(ctx.invalid("unexpected DETECTOR_ID in multi-detector MSA"));
        }
        Ok(())
    }
}

fn meta_text<'m>(meta: &'m MetaData, key: &str) -> Option<&'m str> {
    meta.get(key).and_then(MetaValue::as_str)
}

impl Decoder for MsaDecoder {
    type Output = Vec<DetectorSample>;

    fn decode(&self, data: &[u8], ctx: &DecodeContext<'_>) -> Result<Self::Output> {
        let text = as_text(data);
        let mut meta = MetaData::new();
        let mut counts_a = Vec::new();
        let mut counts_b = Vec::new();
        let mut reading = false;

        for (line_num, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with(SPECTRUM_START) {
                if reading {
                    return Err(ctx.invalid(format!(
                        "line {line_num}: unexpected spectrum start marker"
                    )));
                }
                self.check_block_start(&meta, ctx)?;
                reading = true;
            } else if line.starts_with(SPECTRUM_END) {
                if !reading {
                    return Err(ctx.invalid(format!("line {line_num}: unexpected end of data marker")));
                }
                break;
            } else if line.starts_with('#') {
                if reading {
                    return Err(ctx.invalid(format!(
                        "line {line_num}: unexpected metadata after spectrum started"
                    )));
                }
                self.add_metadata_line(&mut meta, line, line_num, ctx)?;
            } else {
                if !reading {
                    return Err(ctx.invalid(format!(
                        "line {line_num}: unexpected potential spectra: {line}"
                    )));
                }
                let row = parse_spectrum_row(line, self.expected_columns(), line_num, ctx)?;
                counts_a.push(row[0]);
                if self.multi_detector {
                    counts_b.push(row[if self.detector_a_duplicate { 0 } else { 1 }]);
                }
            }
        }

        if counts_a.is_empty() {
            return Err(ctx.invalid("no spectrum data found"));
        }

        let npoints: usize = meta_text(&meta, "NPOINTS")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ctx.invalid("failed to read NPOINTS"))?;
        if counts_a.len() != npoints {
            return Err(ctx.invalid(format!(
                "expected {npoints} spectrum points, got {}",
                counts_a.len()
            )));
        }
        if self.multi_detector && counts_b.len() != npoints {
            return Err(ctx.invalid(format!(
                "expected {npoints} B spectrum points, got {}",
                counts_b.len()
            )));
        }

        match (meta.contains_key(META_PMC), self.expect_pmc) {
            (true, false) => return Err(ctx.invalid("PMC not expected, but was found")),
            (false, true) => return Err(ctx.invalid("PMC expected, but not found")),
            _ => {},
        }

        if !self.multi_detector {
            return Ok(vec![DetectorSample::new(meta, counts_a)]);
        }

        let (meta_a, meta_b) = split_for_detectors(&meta, self.detector_a_duplicate, ctx)?;
        debug!(path = %ctx.path, points = npoints, "Read dual detector MSA");
        Ok(vec![
            DetectorSample::new(meta_a, counts_a),
            DetectorSample::new(meta_b, counts_b),
        ])
    }
}

impl MsaDecoder {
    fn add_metadata_line(
        &self,
        meta: &mut MetaData,
        line: &str,
        line_num: usize,
        ctx: &DecodeContext<'_>,
    ) -> Result<()> {
        let (field, value) = parse_metadata_line(line)
            .ok_or_else(|| ctx.invalid(format!("line {line_num}: failed to parse metadata: {line}")))?;

        if let Some(existing) = meta.get_mut(&field) {
            return match existing {
                MetaValue::Str(text) if field == "COMMENT" => {
                    text.push(' ');
                    text.push_str(&value);
                    Ok(())
                },
                _ => Err(ctx.invalid(format!("duplicate metadata lines found for: {field}"))),
            };
        }

        if value.is_empty() {
            return Ok(());
        }

        let typed = if self.multi_detector && DEFERRED_FIELDS.contains(&field.as_str()) {
            MetaValue::Str(value)
        } else {
            make_meta_value(&field, &value, ctx)?
        };
        meta.insert(field, typed);
        Ok(())
    }
}

/// Splits `#FIELD : value   commentary` into a field name and cleaned value.
///
/// Value cleanup, in order: a leading "float, float" pair is kept on its own;
/// a value starting with five spaces is all commentary; otherwise the value
/// is cut at the first double space.
pub fn parse_metadata_line(line: &str) -> Option<(String, String)> {
    if !line.starts_with('#') {
        return None;
    }
    let colon = line.find(':')?;
    let field = line[..colon].trim().trim_start_matches('#').to_string();
    let raw = &line[colon + 1..];

    let value = float_pair(raw).unwrap_or_else(|| {
        if raw.len() > 5 && raw.starts_with("     ") {
            String::new()
        } else {
            let trimmed = raw.trim_start_matches(' ');
            match trimmed.find("  ") {
                Some(pos) if pos > 0 => trimmed[..pos].to_string(),
                _ => trimmed.to_string(),
            }
        }
    });

    Some((field, value.trim().to_string()))
}

fn float_pair(raw: &str) -> Option<String> {
    let mut parts = raw.split(',');
    let first = parts.next()?.trim_matches(' ');
    let second = parts.next()?.trim_matches(' ').split(' ').next()?.trim_matches(' ');
    first.parse::<f32>().ok()?;
    second.parse::<f32>().ok()?;
    Some(format!("{first}, {second}"))
}

fn make_meta_value(field: &str, value: &str, ctx: &DecodeContext<'_>) -> Result<MetaValue> {
    if INT_FIELDS.contains(&field) {
        return value
            .parse()
            .map(MetaValue::Int)
            .map_err(|_| ctx.invalid(format!("failed to read integer for: {field}, got: {value}")));
    }
    if FLOAT_FIELDS.contains(&field) {
        return value
            .parse()
            .map(MetaValue::Float)
            .map_err(|_| ctx.invalid(format!("failed to read float for: {field}, got: {value}")));
    }
    Ok(MetaValue::Str(value.to_string()))
}

fn parse_spectrum_row(
    line: &str,
    columns: usize,
    line_num: usize,
    ctx: &DecodeContext<'_>,
) -> Result<Vec<i64>> {
    let items: Vec<&str> = line.split(',').collect();
    if items.len() != columns {
        return Err(ctx.invalid(format!(
            "line {line_num}: expected {columns} spectrum columns, got {}",
            items.len()
        )));
    }

    items
        .iter()
        .map(|item| {
            let item = item.trim();
            let value: i64 = item.parse().map_err(|_| {
                ctx.invalid(format!("line {line_num}: failed to read spectrum value \"{item}\""))
            })?;
            if value < 0 {
                return Err(ctx.invalid(format!(
                    "line {line_num}: spectrum value must be non-negative, got {value}"
                )));
            }
            Ok(value)
        })
        .collect()
}

/// Builds per detector metadata from a dual detector file's shared metadata
pub fn split_for_detectors(
    meta: &MetaData,
    detector_a_duplicate: bool,
    ctx: &DecodeContext<'_>,
) -> Result<(MetaData, MetaData)> {
    let mut meta_a = MetaData::new();
    let mut meta_b = MetaData::new();
    meta_a.insert(META_DETECTOR_ID.to_string(), "A".into());
    meta_b.insert(META_DETECTOR_ID.to_string(), "B".into());

    for (key, value) in meta {
        match value {
            MetaValue::Str(text) if PER_DETECTOR_FIELDS.contains(&key.as_str()) => {
                let parts: Vec<&str> = text.trim().split(", ").collect();
                if parts.len() != 2 && !detector_a_duplicate {
                    return Err(ctx.invalid(format!(
                        "metadata {key} cannot be split for 2 detectors: \"{text}\""
                    )));
                }
                let b_idx = if detector_a_duplicate { 0 } else { 1 };
                meta_a.insert(key.clone(), make_meta_value(key, parts[0].trim(), ctx)?);
                meta_b.insert(key.clone(), make_meta_value(key, parts[b_idx].trim(), ctx)?);
            },
            MetaValue::Str(text) => {
                let trimmed = MetaValue::Str(text.trim().to_string());
                meta_a.insert(key.clone(), trimmed.clone());
                meta_b.insert(key.clone(), trimmed);
            },
            other => {
                meta_a.insert(key.clone(), other.clone());
                meta_b.insert(key.clone(), other.clone());
            },
        }
    }

    Ok((meta_a, meta_b))
}
