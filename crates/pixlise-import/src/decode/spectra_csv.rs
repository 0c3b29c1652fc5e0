//! Stacked multi-table spectra CSV
//!
//! # Format
//!
//! ```text
//! SCLK_A,SCLK_B,PMC,real_time_A,real_time_B,live_time_A,live_time_B,[yellow_piece_temp,]XPERCHAN_A,XPERCHAN_B,OFFSET_A,OFFSET_B
//! <one metadata row per PMC>
//! PMC,x,y,z                  <- optional, skipped
//! <xyz rows>
//! A_1,A_2,A_3,A_4,A_5,...    <- detector A channels, one row per metadata row
//! <channel rows>
//! B_1,B_2,B_3,B_4,B_5,...    <- detector B channels, same width as A
//! <channel rows>
//! SCLK_A,SCLK_B,PMC,...      <- optional second copy of all of the above: dwell spectra
//! ```
//!
//! Tables are recognized by their header rows alone. Channel row n belongs
//! to the PMC of metadata row n.

use pixlise_common::Result;
use tracing::debug;

use super::{as_text, at_row, csv_rows, parse_f32, parse_i32, DecodeContext, Decoder};
use crate::model::{
    DetectorSample, MetaData, MetaValue, ReadType, SpectraByPmc, META_DETECTOR_ID, META_PMC,
    META_READTYPE, META_SCLK,
};

const YELLOW_PIECE_TEMP: &str = "yellow_piece_temp";
const XYZ_HEADER: [&str; 4] = ["PMC", "x", "y", "z"];
const CHANNEL_HEADER_SAMPLE: usize = 5;

/// Canonical metadata name for a per-detector column, suffix already removed
fn canonical_name(stem: &str) -> &str {
    match stem {
        "SCLK" => META_SCLK,
        "real_time" => "REALTIME",
        "live_time" => "LIVETIME",
        "XPERCHAN" => "XPERCHAN",
        "OFFSET" => "OFFSET",
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detector {
    A,
    B,
}

impl Detector {
    fn id(self) -> &'static str {
        match self {
            Detector::A => "A",
            Detector::B => "B",
        }
    }
}

/// Splits `SCLK_A` into (`SCLK`, A)
fn detector_column(name: &str) -> Option<(&str, Detector)> {
    if let Some(stem) = name.strip_suffix("_A") {
        Some((stem, Detector::A))
    } else {
        name.strip_suffix("_B").map(|stem| (stem, Detector::B))
    }
}

/// A metadata header has a PMC column and otherwise only per-detector
/// columns, plus the optional `yellow_piece_temp`.
fn is_meta_header(row: &[String]) -> bool {
    row.iter().any(|c| c == META_PMC)
        && row.iter().all(|c| {
            c == META_PMC || c == YELLOW_PIECE_TEMP || detector_column(c).is_some()
        })
}

fn is_channel_header(row: &[String], detector: Detector) -> bool {
    row.len() > CHANNEL_HEADER_SAMPLE
        && row[..CHANNEL_HEADER_SAMPLE]
            .iter()
            .enumerate()
            .all(|(i, c)| *c == format!("{}_{}", detector.id(), i + 1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Metadata,
    Xyz,
    Channels(Detector),
}

struct MetaRow {
    pmc: i32,
    meta_a: MetaData,
    meta_b: MetaData,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpectraCsvDecoder;

impl SpectraCsvDecoder {
    fn meta_row(
        header: &[String],
        row: &[String],
        read_type: ReadType,
        ctx: &DecodeContext<'_>,
    ) -> Result<MetaRow> {
        if row.len() != header.len() {
            return Err(ctx.invalid(format!(
                "expected {} metadata items, got {}",
                header.len(),
                row.len()
            )));
        }

        let mut meta_a = MetaData::new();
        let mut meta_b = MetaData::new();
        for (meta, detector) in [(&mut meta_a, Detector::A), (&mut meta_b, Detector::B)] {
            meta.insert(META_DETECTOR_ID.into(), detector.id().into());
            meta.insert(META_READTYPE.into(), read_type.as_str().into());
        }

        let mut pmc = None;
        for (name, value) in header.iter().zip(row) {
            if name == META_PMC {
                let v = parse_i32(value, META_PMC, ctx)?;
                meta_a.insert(META_PMC.into(), MetaValue::Int(v));
                meta_b.insert(META_PMC.into(), MetaValue::Int(v));
                pmc = Some(v);
                continue;
            }
            if name == YELLOW_PIECE_TEMP {
                continue;
            }

            let (stem, detector) = detector_column(name)
                .ok_or_else(|| ctx.invalid(format!("unexpected meta column name: {name}")))?;
            let key = canonical_name(stem);
            let typed = if key == META_SCLK {
                MetaValue::Int(parse_i32(value, name, ctx)?)
            } else {
                MetaValue::Float(parse_f32(value, name, ctx)?)
            };
            match detector {
                Detector::A => meta_a.insert(key.to_string(), typed),
                Detector::B => meta_b.insert(key.to_string(), typed),
            };
        }

        Ok(MetaRow {
            pmc: pmc.ok_or_else(|| ctx.invalid("metadata row without PMC"))?,
            meta_a,
            meta_b,
        })
    }

    /// Reads one metadata + A + B group. `first_row` is the 1-based row
    /// number of `rows[0]` in the file, for messages.
    fn read_group(
        rows: &[Vec<String>],
        first_row: usize,
        read_type: ReadType,
        ctx: &DecodeContext<'_>,
    ) -> Result<SpectraByPmc> {
        let header = &rows[0];
        let mut entries: Vec<MetaRow> = Vec::new();
        let mut counts_a: Vec<Vec<i64>> = Vec::new();
        let mut counts_b: Vec<Vec<i64>> = Vec::new();
        let mut section = Section::Metadata;
        let mut channel_count = 0;
        let mut seen_a = false;
        let mut seen_b = false;

        for (idx, row) in rows.iter().enumerate().skip(1) {
            let row_num = first_row + idx;

            if is_channel_header(row, Detector::A) {
                if seen_a {
                    return Err(at_row(ctx.invalid("second A table in one group"), row_num));
                }
                seen_a = true;
                channel_count = row.len();
                section = Section::Channels(Detector::A);
                continue;
            }
            if is_channel_header(row, Detector::B) {
                if !seen_a {
                    return Err(at_row(ctx.invalid("found B table before A table"), row_num));
                }
                if row.len() != channel_count {
                    return Err(at_row(
                        ctx.invalid(format!(
                            "differing channel count, A was {channel_count}, B is {}",
                            row.len()
                        )),
                        row_num,
                    ));
                }
                seen_b = true;
                section = Section::Channels(Detector::B);
                continue;
            }

            match section {
                Section::Xyz => {},
                Section::Metadata if row.iter().map(String::as_str).eq(XYZ_HEADER) => {
                    section = Section::Xyz;
                },
                Section::Metadata => {
                    let entry =
                        Self::meta_row(header, row, read_type, ctx).map_err(|e| at_row(e, row_num))?;
                    if entries.iter().any(|e| e.pmc == entry.pmc) {
                        return Err(at_row(
                            ctx.invalid(format!("duplicate PMC {} in metadata table", entry.pmc)),
                            row_num,
                        ));
                    }
                    entries.push(entry);
                },
                Section::Channels(detector) => {
                    if row.len() != channel_count {
                        return Err(at_row(
                            ctx.invalid(format!(
                                "expected {channel_count} channel values, found {}",
                                row.len()
                            )),
                            row_num,
                        ));
                    }
                    let target = match detector {
                        Detector::A => &mut counts_a,
                        Detector::B => &mut counts_b,
                    };
                    if target.len() >= entries.len() {
                        return Err(at_row(
                            ctx.invalid(format!(
                                "more {} channel rows than metadata rows",
                                detector.id()
                            )),
                            row_num,
                        ));
                    }
                    let values = row
                        .iter()
                        .map(|v| {
                            let value = v.parse::<i64>().map_err(|_| {
                                ctx.invalid(format!("failed to read channel value: {v}"))
                            })?;
                            if value < 0 {
                                return Err(ctx.invalid(format!("negative channel value: {value}")));
                            }
                            Ok(value)
                        })
                        .collect::<Result<Vec<_>>>()
                        .map_err(|e| at_row(e, row_num))?;
                    target.push(values);
                },
            }
        }

        if !seen_a || !seen_b {
            return Err(ctx.invalid("did not find both A and B tables"));
        }
        if counts_a.is_empty() || counts_a.len() != counts_b.len() || counts_a.len() != entries.len()
        {
            return Err(ctx.invalid(format!(
                "metadata table had {} rows, A had {}, B had {}",
                entries.len(),
                counts_a.len(),
                counts_b.len()
            )));
        }

        Ok(entries
            .into_iter()
            .zip(counts_a.into_iter().zip(counts_b))
            .map(|(entry, (a, b))| {
                (
                    entry.pmc,
                    vec![
                        DetectorSample::new(entry.meta_a, a),
                        DetectorSample::new(entry.meta_b, b),
                    ],
                )
            })
            .collect())
    }
}

impl Decoder for SpectraCsvDecoder {
    type Output = SpectraByPmc;

    fn decode(&self, data: &[u8], ctx: &DecodeContext<'_>) -> Result<Self::Output> {
        let rows = csv_rows(&as_text(data), ctx)?;
        match rows.first() {
            Some(header) if is_meta_header(header) => {},
            Some(header) => {
                return Err(ctx.invalid(format!(
                    "unexpected columns in metadata table: {}",
                    header.join(",")
                )))
            },
            None => return Err(ctx.invalid("empty spectra file")),
        }

        let dwell_start = rows
            .iter()
            .enumerate()
            .skip(2)
            .find(|(_, row)| is_meta_header(row))
            .map(|(idx, _)| idx);

        let (normal_rows, dwell_rows) = match dwell_start {
            Some(idx) => (&rows[..idx], Some((&rows[idx..], idx + 1))),
            None => (&rows[..], None),
        };

        let mut spectra = Self::read_group(normal_rows, 1, ReadType::Normal, ctx)?;

        if let Some((rows, first_row)) = dwell_rows {
            let dwell = Self::read_group(rows, first_row, ReadType::Dwell, ctx)?;
            for (pmc, samples) in dwell {
                let normal = spectra.get_mut(&pmc).ok_or_else(|| {
                    ctx.invalid(format!(
                        "dwell spectrum PMC {pmc} has no corresponding normal spectrum"
                    ))
                })?;
                normal.extend(samples);
            }
        }

        debug!(path = %ctx.path, pmcs = spectra.len(), "Read spectra CSV");
        Ok(spectra)
    }
}
