//! Raw record readers
//!
//! JSON input is either an array of objects or one object per line. CSV input
//! has a header row; each column is typed as a whole, the way a dataframe
//! reader would: integer if every non-empty cell parses as one, else float if
//! every non-empty cell is numeric, else text. Empty cells are null.

use crate::value::{CellValue, Record};
use std::io::Read;

/// Parse a JSON array of objects or newline-delimited JSON objects. Blank
/// lines are ignored.
pub fn read_json_records(text: &str) -> crate::Result<Vec<Record>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    let records: Vec<Record> = trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    Ok(records)
}

/// Parse CSV with a header row
pub fn read_csv_records(input: impl Read) -> crate::Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let rows = reader
        .records()
        .collect::<Result<Vec<csv::StringRecord>, _>>()?;

    let kinds: Vec<ColumnKind> = (0..headers.len())
        .map(|i| ColumnKind::infer(rows.iter().filter_map(|row| row.get(i))))
        .collect();

    let records: Vec<Record> = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .zip(&kinds)
                .enumerate()
                .map(|(i, (name, kind))| (name.clone(), kind.parse(row.get(i).unwrap_or(""))))
                .collect()
        })
        .collect();
    Ok(records)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Text,
}

impl ColumnKind {
    fn infer<'a>(cells: impl Iterator<Item = &'a str>) -> Self {
        let mut kind = ColumnKind::Int;
        for cell in cells.filter(|c| !c.is_empty()) {
            if kind == ColumnKind::Int && cell.parse::<i64>().is_ok() {
                continue;
            }
            if cell.parse::<f64>().is_ok() {
                kind = ColumnKind::Float;
                continue;
            }
            return ColumnKind::Text;
        }
        kind
    }

    fn parse(self, cell: &str) -> CellValue {
        if cell.is_empty() {
            return CellValue::Null;
        }
        let text = || CellValue::Str(cell.to_string());
        match self {
            ColumnKind::Int => cell.parse().map(CellValue::Int).unwrap_or_else(|_| text()),
            ColumnKind::Float => cell.parse().map(CellValue::Float).unwrap_or_else(|_| text()),
            ColumnKind::Text => text(),
        }
    }
}
