//! Decoders for the instrument product files
//!
//! Each decoder is a small value with a single [`Decoder::decode`] method
//! over an in-memory buffer. Decoders never touch storage and never
//! suspend; the caller reads the file and hands over its bytes.

pub mod beam;
pub mod housekeeping;
pub mod matched_images;
pub mod msa;
pub mod pseudo_intensity;
pub mod spectra_csv;

pub use beam::BeamDecoder;
pub use housekeeping::HousekeepingDecoder;
pub use matched_images::MatchedImageDecoder;
pub use msa::MsaDecoder;
pub use pseudo_intensity::{PseudoIntensityDecoder, PseudoIntensityRangeDecoder};
pub use spectra_csv::SpectraCsvDecoder;

use crate::product_id::FileNameMeta;
use pixlise_common::{PixliseError, Result};
use std::borrow::Cow;

/// What a decoder knows about the file besides its bytes
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    /// Path inside the archive, used in error messages
    pub path: &'a str,
    /// Parsed product identifier, when the name follows the grammar
    pub meta: Option<&'a FileNameMeta>,
}

impl<'a> DecodeContext<'a> {
    pub fn new(path: &'a str) -> Self {
        Self { path, meta: None }
    }

    pub fn with_meta(path: &'a str, meta: &'a FileNameMeta) -> Self {
        Self {
            path,
            meta: Some(meta),
        }
    }

    pub(crate) fn invalid(&self, reason: impl Into<String>) -> PixliseError {
        PixliseError::invalid_format(self.path, reason)
    }

    pub(crate) fn product_meta(&self) -> Result<&'a FileNameMeta> {
        self.meta
            .ok_or_else(|| self.invalid("file name is not a product identifier"))
    }
}

pub trait Decoder {
    type Output;

    fn decode(&self, data: &[u8], ctx: &DecodeContext<'_>) -> Result<Self::Output>;
}

pub(crate) fn as_text(data: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(data)
}

/// Skips `lines` physical lines, returning the rest of the text
pub(crate) fn skip_lines(text: &str, lines: usize) -> &str {
    let mut rest = text;
    for _ in 0..lines {
        match rest.find('\n') {
            Some(idx) => rest = &rest[idx + 1..],
            None => return "",
        }
    }
    rest
}

/// Reads CSV text into rows of trimmed fields. Rows may differ in width and
/// blank lines are dropped.
pub(crate) fn csv_rows(text: &str, ctx: &DecodeContext<'_>) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ctx.invalid(format!("row {idx}: {e}")))?;
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Prefixes a decode failure's reason with the row it came from
pub(crate) fn at_row(err: PixliseError, row: usize) -> PixliseError {
    match err {
        PixliseError::InvalidFormat { file, reason } => PixliseError::InvalidFormat {
            file,
            reason: format!("row {row}: {reason}"),
        },
        other => other,
    }
}

pub(crate) fn parse_i32(value: &str, what: &str, ctx: &DecodeContext<'_>) -> Result<i32> {
    value
        .trim()
        .parse()
        .map_err(|_| ctx.invalid(format!("failed to read {what} as integer: \"{value}\"")))
}

pub(crate) fn parse_f32(value: &str, what: &str, ctx: &DecodeContext<'_>) -> Result<f32> {
    value
        .trim()
        .parse()
        .map_err(|_| ctx.invalid(format!("failed to read {what} as float: \"{value}\"")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_rows_trims_and_allows_ragged_rows() {
        let ctx = DecodeContext::new("t.csv");
        let rows = csv_rows("a, b ,c\n\n1,2\n", &ctx).unwrap();
        assert_eq!(rows, vec![vec!["a", "b", "c"], vec!["1", "2"]]);
    }

    #[test]
    fn test_skip_lines() {
        assert_eq!(skip_lines("one\ntwo\nthree", 1), "two\nthree");
        assert_eq!(skip_lines("one\ntwo", 5), "");
        assert_eq!(skip_lines("one", 0), "one");
    }
}
