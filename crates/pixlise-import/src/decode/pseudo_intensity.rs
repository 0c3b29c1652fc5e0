//! Pseudo-intensity map CSV and its range descriptor
//!
//! # Format
//!
//! ```text
//! PMC,x,y,z            <- first table: one row per PMC, in file order
//! 12,0.1,0.2,0.3
//! 13,0.1,0.2,0.3
//! pi1,pi2,pi3,pi4,...  <- second table: row n belongs to the nth PMC above
//! 1.5,0.2,11.0,0.7
//! 1.1,0.0,10.2,0.9
//! ```
//!
//! Names and channel ranges for the `pi` columns come from a separate
//! `Name,StartChannel,EndChannel` file.

use pixlise_common::Result;
use tracing::debug;

use super::{as_text, at_row, csv_rows, parse_f32, parse_i32, DecodeContext, Decoder};
use crate::model::{PseudoIntensities, PseudoIntensityRange, META_PMC};

const RANGE_HEADERS: [&str; 3] = ["Name", "StartChannel", "EndChannel"];

fn is_values_header(row: &[String]) -> bool {
    row.len() > 3 && (1..=4).all(|n| row[n - 1] == format!("pi{n}"))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PseudoIntensityDecoder;

impl Decoder for PseudoIntensityDecoder {
    type Output = PseudoIntensities;

    fn decode(&self, data: &[u8], ctx: &DecodeContext<'_>) -> Result<Self::Output> {
        let rows = csv_rows(&as_text(data), ctx)?;
        let Some((header, body)) = rows.split_first() else {
            return Err(ctx.invalid("empty pseudo-intensity file"));
        };
        if header.first().map(String::as_str) != Some(META_PMC) {
            return Err(ctx.invalid(format!(
                "expected first table to start with PMC, found: {}",
                header.first().map(String::as_str).unwrap_or("")
            )));
        }

        let mut pmcs = Vec::new();
        let mut values_width = None;
        let mut value_rows = 0;
        let mut result = PseudoIntensities::new();

        for (idx, row) in body.iter().enumerate() {
            let row_num = idx + 1;
            match values_width {
                None if is_values_header(row) => values_width = Some(row.len()),
                None => {
                    let pmc = parse_i32(&row[0], META_PMC, ctx).map_err(|e| at_row(e, row_num))?;
                    pmcs.push(pmc);
                },
                Some(width) => {
                    if row.len() != width {
                        return Err(at_row(
                            ctx.invalid(format!("expected {width} values, got {}", row.len())),
                            row_num,
                        ));
                    }
                    let pmc = *pmcs.get(value_rows).ok_or_else(|| {
                        at_row(ctx.invalid("more pseudo-intensity rows than PMCs"), row_num)
                    })?;
                    let values = row
                        .iter()
                        .map(|v| parse_f32(v, "pseudo-intensity", ctx))
                        .collect::<Result<Vec<_>>>()
                        .map_err(|e| at_row(e, row_num))?;
                    result.insert(pmc, values);
                    value_rows += 1;
                },
            }
        }

        if values_width.is_none() {
            return Err(ctx.invalid("no pseudo-intensity value table found"));
        }

        debug!(path = %ctx.path, pmcs = pmcs.len(), rows = result.len(), "Read pseudo-intensities");
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PseudoIntensityRangeDecoder;

impl Decoder for PseudoIntensityRangeDecoder {
    type Output = Vec<PseudoIntensityRange>;

    fn decode(&self, data: &[u8], ctx: &DecodeContext<'_>) -> Result<Self::Output> {
        let rows = csv_rows(&as_text(data), ctx)?;
        let Some((header, body)) = rows.split_first() else {
            return Err(ctx.invalid("empty pseudo-intensity range file"));
        };
        if header.iter().map(String::as_str).ne(RANGE_HEADERS) {
            return Err(ctx.invalid(format!("unexpected headers: {}", header.join(","))));
        }

        body.iter()
            .enumerate()
            .map(|(idx, row)| {
                if row.len() != RANGE_HEADERS.len() {
                    return Err(at_row(ctx.invalid("expected 3 columns"), idx + 1));
                }
                Ok(PseudoIntensityRange {
                    name: row[0].clone(),
                    start_channel: parse_i32(&row[1], "StartChannel", ctx)
                        .map_err(|e| at_row(e, idx + 1))?,
                    end_channel: parse_i32(&row[2], "EndChannel", ctx)
                        .map_err(|e| at_row(e, idx + 1))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ctx() -> DecodeContext<'static> {
        DecodeContext::new("pi.csv")
    }

    #[test]
    fn test_values_pair_with_pmcs_in_file_order() {
        let text = "PMC,x,y,z\n30,1,2,3\n12,1,2,3\npi1,pi2,pi3,pi4\n1.5,0.2,11,0.7\n1.1,0,10.2,0.9\n";
        let pi = PseudoIntensityDecoder.decode(text.as_bytes(), &ctx()).unwrap();
        assert_eq!(pi[&30], vec![1.5, 0.2, 11.0, 0.7]);
        assert_eq!(pi[&12], vec![1.1, 0.0, 10.2, 0.9]);
    }

    #[test]
    fn test_must_start_with_pmc_table() {
        let err = PseudoIntensityDecoder
            .decode(b"pi1,pi2,pi3,pi4\n1,2,3,4\n", &ctx())
            .unwrap_err();
        assert!(err.to_string().contains("start with PMC"));
    }

    #[test]
    fn test_more_values_than_pmcs_fails() {
        let text = "PMC,x,y,z\n30,1,2,3\npi1,pi2,pi3,pi4\n1,2,3,4\n5,6,7,8\n";
        let err = PseudoIntensityDecoder.decode(text.as_bytes(), &ctx()).unwrap_err();
        assert!(err.to_string().contains("more pseudo-intensity rows than PMCs"));
    }

    #[test]
    fn test_ranges() {
        let text = "Name,StartChannel,EndChannel\nNa,89,98\nMg,103,112\n";
        let ranges = PseudoIntensityRangeDecoder.decode(text.as_bytes(), &ctx()).unwrap();
        assert_eq!(
            ranges,
            vec![
                PseudoIntensityRange {
                    name: "Na".into(),
                    start_channel: 89,
                    end_channel: 98
                },
                PseudoIntensityRange {
                    name: "Mg".into(),
                    start_channel: 103,
                    end_channel: 112
                },
            ]
        );

        let err = PseudoIntensityRangeDecoder
            .decode(b"Name,Start,End\nNa,1,2\n", &ctx())
            .unwrap_err();
        assert!(err.to_string().contains("unexpected headers"));
    }
}
