//! Housekeeping (spatial inputs) CSV
//!
//! One title line, then a header row and one row per PMC. Column types are
//! not declared; they are inferred from the values, widening
//! int -> float -> string as the scan goes.

use pixlise_common::Result;
use tracing::{debug, warn};

use super::{as_text, at_row, csv_rows, skip_lines, DecodeContext, Decoder};
use crate::model::{ColumnType, HousekeepingData, MetaValue, META_PMC};

#[derive(Debug, Clone, Copy)]
pub struct HousekeepingDecoder {
    /// Lines before the column header row
    pub header_lines: usize,
}

impl Default for HousekeepingDecoder {
    fn default() -> Self {
        Self { header_lines: 1 }
    }
}

/// Result of the first pass over the table
#[derive(Debug, Clone, PartialEq)]
pub struct TableShape {
    pub names: Vec<String>,
    /// One entry per column, PMC included
    pub column_types: Vec<ColumnType>,
    pub pmc_column: usize,
    /// Data rows before the first ragged row
    pub row_count: usize,
}

fn pick_type(value: &str) -> ColumnType {
    if value.parse::<i32>().is_ok() {
        ColumnType::Int
    } else if value.parse::<f32>().is_ok() {
        ColumnType::Float
    } else {
        ColumnType::String
    }
}

/// First pass: delimit the table and infer column types
pub fn infer_table(rows: &[Vec<String>], ctx: &DecodeContext<'_>) -> Result<TableShape> {
    let Some((header, body)) = rows.split_first() else {
        return Err(ctx.invalid("no header row"));
    };

    let width = header.len();
    let mut column_types: Vec<Option<ColumnType>> = vec![None; width];
    let mut row_count = 0;

    for row in body.iter().take_while(|row| row.len() == width) {
        for (slot, value) in column_types.iter_mut().zip(row) {
            let seen = pick_type(value);
            *slot = Some(slot.map_or(seen, |current| current.max(seen)));
        }
        row_count += 1;
    }

    let pmc_column = header
        .iter()
        .position(|name| name == META_PMC)
        .ok_or_else(|| ctx.invalid("no PMC column"))?;

    if row_count > 0 && column_types[pmc_column] != Some(ColumnType::Int) {
        return Err(ctx.invalid("PMC column is not integer"));
    }

    Ok(TableShape {
        names: header.clone(),
        column_types: column_types
            .into_iter()
            .map(|t| t.unwrap_or(ColumnType::String))
            .collect(),
        pmc_column,
        row_count,
    })
}

fn typed_value(value: &str, column_type: ColumnType, name: &str, ctx: &DecodeContext<'_>) -> Result<MetaValue> {
    Ok(match column_type {
        ColumnType::Int => MetaValue::Int(super::parse_i32(value, name, ctx)?),
        ColumnType::Float => MetaValue::Float(super::parse_f32(value, name, ctx)?),
        ColumnType::String => MetaValue::Str(value.to_string()),
    })
}

impl Decoder for HousekeepingDecoder {
    type Output = HousekeepingData;

    fn decode(&self, data: &[u8], ctx: &DecodeContext<'_>) -> Result<Self::Output> {
        let text = as_text(data);
        let table = skip_lines(&text, self.header_lines)
            .lines()
            .take_while(|line| !line.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let rows = csv_rows(&table, ctx)?;
        let shape = infer_table(&rows, ctx)?;

        let keep = |idx: &usize| *idx != shape.pmc_column;
        let mut out = HousekeepingData {
            column_names: (0..shape.names.len())
                .filter(keep)
                .map(|i| shape.names[i].clone())
                .collect(),
            column_types: (0..shape.names.len())
                .filter(keep)
                .map(|i| shape.column_types[i])
                .collect(),
            ..Default::default()
        };

        for (idx, row) in rows[1..=shape.row_count].iter().enumerate() {
            let pmc = super::parse_i32(&row[shape.pmc_column], META_PMC, ctx).map_err(|e| at_row(e, idx + 1))?;
            if pmc < 0 {
                return Err(at_row(ctx.invalid(format!("negative PMC {pmc}")), idx + 1));
            }

            let values = row
                .iter()
                .enumerate()
                .filter(|(col, _)| keep(col))
                .map(|(col, value)| typed_value(value, shape.column_types[col], &shape.names[col], ctx))
                .collect::<Result<Vec<_>>>()
                .map_err(|e| at_row(e, idx + 1))?;

            if out.rows.insert(pmc, values).is_some() {
                warn!(path = %ctx.path, pmc, "Duplicate housekeeping PMC, keeping last row");
            }
        }

        debug!(path = %ctx.path, rows = out.rows.len(), columns = out.column_names.len(), "Read housekeeping");
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn rows(lines: &[&[&str]]) -> Vec<Vec<String>> {
        lines
            .iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_type_inference_widens_columns() {
        let table = rows(&[
            &["ONE", "TWO", "PMC", "THREE", "FOUR"],
            &["13", "14", "34", "3.1415926", "44"],
            &["13", "13.33", "999", "55", "N/A"],
        ]);
        let shape = infer_table(&table, &DecodeContext::new("hk.csv")).unwrap();

        assert_eq!(
            shape.column_types,
            vec![
                ColumnType::Int,
                ColumnType::Float,
                ColumnType::Int,
                ColumnType::Float,
                ColumnType::String
            ]
        );
        assert_eq!(shape.pmc_column, 2);
        assert_eq!(shape.row_count, 2);
    }

    #[test]
    fn test_scan_stops_at_ragged_row() {
        let table = rows(&[&["PMC", "A"], &["1", "2"], &["3"], &["4", "5"]]);
        let shape = infer_table(&table, &DecodeContext::new("hk.csv")).unwrap();
        assert_eq!(shape.row_count, 1);
    }

    #[test]
    fn test_pmc_column_must_be_integer() {
        let ctx = DecodeContext::new("hk.csv");
        let missing = rows(&[&["A", "B"], &["1", "2"]]);
        assert!(infer_table(&missing, &ctx).unwrap_err().to_string().contains("no PMC column"));

        let float_pmc = rows(&[&["PMC", "B"], &["1.5", "2"]]);
        assert!(infer_table(&float_pmc, &ctx).unwrap_err().to_string().contains("not integer"));
    }

    #[test]
    fn test_decode_materializes_rows_without_pmc() {
        let text = "Spatial inputs for sol 77\n\
                    ONE,TWO,PMC,THREE,FOUR\n\
                    13,14,34,3.1415926,44\n\
                    13,13.33,999,55,N/A\n\
                    \n\
                    trailing,junk\n";
        let hk = HousekeepingDecoder::default()
            .decode(text.as_bytes(), &DecodeContext::new("hk.csv"))
            .unwrap();

        assert_eq!(hk.column_names, vec!["ONE", "TWO", "THREE", "FOUR"]);
        assert_eq!(hk.rows.len(), 2);
        assert_eq!(
            hk.rows[&999],
            vec![
                MetaValue::Int(13),
                MetaValue::Float(13.33),
                MetaValue::Float(55.0),
                MetaValue::Str("N/A".into())
            ]
        );
    }

    #[test]
    fn test_negative_pmc_is_fatal() {
        let text = "title\nPMC,A\n-4,1\n";
        let err = HousekeepingDecoder::default()
            .decode(text.as_bytes(), &DecodeContext::new("hk.csv"))
            .unwrap_err();
        assert!(err.to_string().contains("negative PMC -4"));
    }
}
