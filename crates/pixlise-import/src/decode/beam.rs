//! Beam location CSV
//!
//! # Format
//!
//! ```text
//! SCLK=..., some free text preamble (up to 4 lines)
//! PMC,x,y,z,geom_corr,PMC_12_MCC_i,PMC_12_MCC_j,PMC_12_corr_i,PMC_12_corr_j
//! 12,0.0129,0.0070,0.2468,1.01,776.3,542.1,776.1,542.0
//! ```
//!
//! Older single image files use `PMC,x,y,z,image_i,image_j`; the caller
//! supplies the context image PMC those columns refer to. Only `MCC` pairs
//! are kept, `corr` pairs are validated and dropped.

use pixlise_common::Result;
use tracing::debug;

use super::{as_text, at_row, csv_rows, parse_f32, parse_i32, skip_lines, DecodeContext, Decoder};
use crate::model::{BeamLocation, BeamLocationByPmc, ImageProjection};

/// How many leading lines may precede the header row
const MAX_PREAMBLE_LINES: usize = 4;
const GEOM_CORR: &str = "geom_corr";

#[derive(Debug, Clone, Copy)]
pub struct BeamDecoder {
    /// Per image PMC columns (`PMC_<n>_<tag>_i/j`) instead of `image_i/image_j`
    pub multiple_ij: bool,
    /// Context image the single `image_i/image_j` pair projects into
    pub main_image_pmc: i32,
}

impl BeamDecoder {
    pub fn multi_image() -> Self {
        Self {
            multiple_ij: true,
            main_image_pmc: 0,
        }
    }

    pub fn single_image(main_image_pmc: i32) -> Self {
        Self {
            multiple_ij: false,
            main_image_pmc,
        }
    }
}

/// Resolved header: where geom_corr and each image's i/j columns live
#[derive(Debug, PartialEq)]
struct HeaderLayout {
    geom_corr: Option<usize>,
    projections: Vec<(i32, usize, usize)>,
}

fn split_ij_header(header: &str) -> Option<(i32, &str, &str)> {
    let bits: Vec<&str> = header.split('_').collect();
    match bits.as_slice() {
        ["PMC", pmc, tag @ ("MCC" | "corr"), coord @ ("i" | "j")] => {
            Some((pmc.parse().ok()?, *tag, *coord))
        },
        _ => None,
    }
}

impl BeamDecoder {
    fn layout(&self, header: &[String], ctx: &DecodeContext<'_>) -> Result<HeaderLayout> {
        let mut expected = vec!["PMC", "x", "y", "z"];
        if !self.multiple_ij {
            expected.extend(["image_i", "image_j"]);
        }

        for (idx, name) in expected.iter().enumerate() {
            match header.get(idx) {
                Some(got) if got == name => {},
                got => {
                    return Err(ctx.invalid(format!(
                        "expected column {name}, got: {}",
                        got.map(String::as_str).unwrap_or("<missing>")
                    )))
                },
            }
        }

        if !self.multiple_ij {
            return Ok(HeaderLayout {
                geom_corr: None,
                projections: vec![(self.main_image_pmc, 4, 5)],
            });
        }

        let mut idx = expected.len();
        let mut geom_corr = None;
        if header.get(idx).map(String::as_str) == Some(GEOM_CORR) {
            geom_corr = Some(idx);
            idx += 1;
        }

        let remaining = header.len() - idx;
        if remaining == 0 || remaining % 2 != 0 {
            return Err(ctx.invalid(format!("unexpected count of i/j columns: {remaining}")));
        }

        let mut projections = Vec::new();
        while idx < header.len() {
            let (i_name, j_name) = (&header[idx], &header[idx + 1]);
            if i_name == GEOM_CORR || j_name == GEOM_CORR {
                return Err(ctx.invalid("geom_corr must directly follow z, once"));
            }
            let (pmc, tag, coord) = split_ij_header(i_name)
                .ok_or_else(|| ctx.invalid(format!("unexpected column: {i_name}")))?;
            let (pmc2, tag2, coord2) = split_ij_header(j_name)
                .ok_or_else(|| ctx.invalid(format!("unexpected column: {j_name}")))?;

            if pmc != pmc2 || tag != tag2 || coord != "i" || coord2 != "j" {
                return Err(ctx.invalid(format!(
                    "unexpected column header {j_name} after {i_name}"
                )));
            }
            if tag == "MCC" {
                projections.push((pmc, idx, idx + 1));
            }
            idx += 2;
        }

        Ok(HeaderLayout {
            geom_corr,
            projections,
        })
    }

    fn row(
        &self,
        row: &[String],
        layout: &HeaderLayout,
        width: usize,
        ctx: &DecodeContext<'_>,
    ) -> Result<(i32, BeamLocation)> {
        if row.len() != width {
            return Err(ctx.invalid(format!(
                "expected {width} columns, got {}",
                row.len()
            )));
        }

        let pmc = parse_i32(&row[0], "PMC", ctx)?;
        let mut location = BeamLocation {
            x: parse_f32(&row[1], "x", ctx)?,
            y: parse_f32(&row[2], "y", ctx)?,
            z: parse_f32(&row[3], "z", ctx)?,
            ..Default::default()
        };

        if let Some(col) = layout.geom_corr {
            location.geom_corr = Some(parse_f32(&row[col], GEOM_CORR, ctx)?);
        }

        for &(image_pmc, i_col, j_col) in &layout.projections {
            let projection = ImageProjection {
                i: parse_f32(&row[i_col], "i", ctx)?,
                j: parse_f32(&row[j_col], "j", ctx)?,
            };
            location.ij.insert(image_pmc, projection);
        }

        Ok((pmc, location))
    }
}

impl Decoder for BeamDecoder {
    type Output = BeamLocationByPmc;

    fn decode(&self, data: &[u8], ctx: &DecodeContext<'_>) -> Result<Self::Output> {
        let text = as_text(data);

        let header_line = text
            .lines()
            .take(MAX_PREAMBLE_LINES + 1)
            .position(|line| line.starts_with("PMC,"))
            .ok_or_else(|| ctx.invalid("failed to find header row of beam location data"))?;

        let rows = csv_rows(skip_lines(&text, header_line), ctx)?;
        let Some((header, body)) = rows.split_first() else {
            return Err(ctx.invalid("no beam location header"));
        };
        let layout = self.layout(header, ctx)?;

        let mut result = BeamLocationByPmc::new();
        for (line, row) in body.iter().enumerate() {
            let (pmc, location) = self
                .row(row, &layout, header.len(), ctx)
                .map_err(|e| at_row(e, line + 1))?;
            if result.insert(pmc, location).is_some() {
                return Err(ctx.invalid(format!("row {}: duplicate PMC {pmc}", line + 1)));
            }
        }

        debug!(path = %ctx.path, locations = result.len(), images = layout.projections.len(), "Read beam locations");
        Ok(result)
    }
}
