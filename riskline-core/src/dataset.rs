//! Tabular datasets
//!
//! A [`Dataset`] is an ordered sequence of records tagged with the schema it
//! claims to satisfy. The content fingerprint is computed once at construction
//! and the records are never mutated afterwards; transforms always produce new
//! values.

use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::records::{read_csv_records, read_json_records};
use crate::schema::SchemaId;
use crate::value::{CellValue, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Immutable tabular dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "DatasetParts", into = "DatasetParts")]
pub struct Dataset {
    schema: SchemaId,
    records: Arc<Vec<Record>>,
    fingerprint: Fingerprint,
}

/// Serialized form. The fingerprint is recomputed on load rather than trusted.
#[derive(Serialize, Deserialize)]
struct DatasetParts {
    schema: SchemaId,
    records: Vec<Record>,
}

impl From<DatasetParts> for Dataset {
    fn from(parts: DatasetParts) -> Self {
        Dataset::new(parts.schema, parts.records)
    }
}

impl From<Dataset> for DatasetParts {
    fn from(dataset: Dataset) -> Self {
        DatasetParts {
            schema: dataset.schema,
            records: Arc::try_unwrap(dataset.records).unwrap_or_else(|shared| (*shared).clone()),
        }
    }
}

impl Dataset {
    /// Create a dataset and compute its content fingerprint
    pub fn new(schema: SchemaId, records: Vec<Record>) -> Self {
        let fingerprint = Self::compute_fingerprint(&schema, &records);
        Self {
            schema,
            records: Arc::new(records),
            fingerprint,
        }
    }

    /// Parse records from either a JSON array of objects or newline-delimited
    /// JSON objects. Blank lines are ignored.
    pub fn from_json(schema: SchemaId, text: &str) -> crate::Result<Self> {
        Ok(Self::new(schema, read_json_records(text)?))
    }

    /// Parse CSV with a header row; see [`read_csv_records`] for typing
    pub fn from_csv(schema: SchemaId, text: &str) -> crate::Result<Self> {
        Ok(Self::new(schema, read_csv_records(text.as_bytes())?))
    }

    fn compute_fingerprint(schema: &SchemaId, records: &[Record]) -> Fingerprint {
        let mut fp = Fingerprinter::new("riskline.dataset.v1");
        fp.str(&schema.name).u64(u64::from(schema.version));
        fp.u64(records.len() as u64);
        for record in records {
            fp.u64(record.len() as u64);
            for (column, value) in record {
                fp.str(column);
                value.feed(&mut fp);
            }
        }
        fp.finish()
    }

    /// Schema this dataset claims to satisfy
    pub fn schema(&self) -> &SchemaId {
        &self.schema
    }

    /// Records in ingestion order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of records
    pub fn row_count(&self) -> usize {
        self.records.len()
    }

    /// Returns true when the dataset has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Content fingerprint over schema id and normalized records
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Union of column names present in any record
    pub fn columns(&self) -> BTreeSet<&str> {
        self.records
            .iter()
            .flat_map(|r| r.keys().map(String::as_str))
            .collect()
    }

    /// Value of `column` in row `row`; absent keys read as null
    pub fn value(&self, row: usize, column: &str) -> &CellValue {
        static NULL: CellValue = CellValue::Null;
        self.records
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&NULL)
    }

    /// Number of null or absent cells across the columns present in the data
    pub fn missing_cells(&self) -> usize {
        let columns = self.columns();
        self.records
            .iter()
            .map(|r| {
                columns
                    .iter()
                    .filter(|c| r.get(**c).map_or(true, CellValue::is_null))
                    .count()
            })
            .sum()
    }

    /// Ingestion summary, optionally including the positive rate of a target column
    pub fn summary(&self, target: Option<&str>) -> DatasetSummary {
        let positive_rate = target.and_then(|column| {
            let values: Vec<f64> = self
                .records
                .iter()
                .filter_map(|r| r.get(column).and_then(CellValue::as_f64))
                .collect();
            if values.is_empty() {
                None
            } else {
                Some(values.iter().filter(|v| **v > 0.0).count() as f64 / values.len() as f64)
            }
        });

        DatasetSummary {
            schema: self.schema.clone(),
            fingerprint: self.fingerprint,
            row_count: self.row_count(),
            column_count: self.columns().len(),
            missing_cells: self.missing_cells(),
            target_positive_rate: positive_rate,
        }
    }
}

/// Metadata recorded when a dataset is ingested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub schema: SchemaId,
    pub fingerprint: Fingerprint,
    pub row_count: usize,
    pub column_count: usize,
    pub missing_cells: usize,
    pub target_positive_rate: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, CellValue)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn schema() -> SchemaId {
        SchemaId::new("credit_raw", 1)
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let rows = vec![record(&[("a", 1.into()), ("b", "x".into())])];
        let d1 = Dataset::new(schema(), rows.clone());
        let d2 = Dataset::new(schema(), rows);
        assert_eq!(d1.fingerprint(), d2.fingerprint());

        let d3 = Dataset::new(schema(), vec![record(&[("a", 2.into()), ("b", "x".into())])]);
        assert_ne!(d1.fingerprint(), d3.fingerprint());

        let d4 = Dataset::new(
            SchemaId::new("credit_raw", 2),
            vec![record(&[("a", 1.into()), ("b", "x".into())])],
        );
        assert_ne!(d1.fingerprint(), d4.fingerprint());
    }

    #[test]
    fn test_missing_cells_counts_absent_keys() {
        let d = Dataset::new(
            schema(),
            vec![
                record(&[("a", 1.into()), ("b", CellValue::Null)]),
                record(&[("a", 2.into())]),
            ],
        );
        assert_eq!(d.missing_cells(), 2);
        assert_eq!(d.value(1, "b"), &CellValue::Null);
    }

    #[test]
    fn test_summary_reports_positive_rate() {
        let d = Dataset::new(
            schema(),
            vec![
                record(&[("default", 1.into())]),
                record(&[("default", 0.into())]),
                record(&[("default", 0.into())]),
                record(&[("default", 1.into())]),
            ],
        );
        let summary = d.summary(Some("default"));
        assert_eq!(summary.row_count, 4);
        assert_eq!(summary.target_positive_rate, Some(0.5));
        assert_eq!(d.summary(None).target_positive_rate, None);
    }

    #[test]
    fn test_from_json_accepts_array_and_lines() {
        let array = Dataset::from_json(schema(), r#"[{"a": 1}, {"a": 2.5}]"#).unwrap();
        let lines = Dataset::from_json(schema(), "{\"a\": 1}\n\n{\"a\": 2.5}\n").unwrap();
        assert_eq!(array.row_count(), 2);
        assert_eq!(array.fingerprint(), lines.fingerprint());
        assert!(Dataset::from_json(schema(), "{\"a\": ").is_err());
    }

    #[test]
    fn test_serde_recomputes_fingerprint() {
        let d = Dataset::new(schema(), vec![record(&[("a", 1.5.into())])]);
        let json = serde_json::to_string(&d).unwrap();
        let back: Dataset = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fingerprint(), d.fingerprint());
        assert_eq!(back.row_count(), 1);
    }
}
