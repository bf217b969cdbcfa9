//! Ingest stage: loads the raw dataset and runs ingestion checks

use crate::artifact::Artifact;
use crate::stage::{Stage, StageContext, StageError, StageInputs};
use riskline_core::{Dataset, Fingerprint, Fingerprinter, SchemaId};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Where the raw dataset comes from
#[derive(Debug, Clone)]
pub enum DatasetSource {
    /// Dataset already in memory
    Inline(Dataset),
    /// Records in a file claiming `schema`. A directory stands for its first
    /// `*.csv` file by name. Without an explicit format, a `.csv` extension
    /// means CSV and anything else JSON.
    File {
        path: PathBuf,
        schema: SchemaId,
        format: Option<DataFormat>,
    },
}

/// Encoding of a dataset file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// JSON array or newline-delimited JSON objects
    Json,
    /// Comma-separated values with a header row
    Csv,
}

impl DataFormat {
    fn of_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => DataFormat::Csv,
            _ => DataFormat::Json,
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataFormat::Json => "json",
            DataFormat::Csv => "csv",
        })
    }
}

impl FromStr for DataFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" | "ndjson" => Ok(DataFormat::Json),
            "csv" => Ok(DataFormat::Csv),
            other => Err(format!("unknown data format '{other}' (expected json or csv)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestStage {
    source: DatasetSource,
    target: Option<String>,
}

impl IngestStage {
    pub fn new(source: DatasetSource) -> Self {
        Self {
            source,
            target: None,
        }
    }

    /// Require a target column to be present
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    fn load(&self) -> Result<Dataset, StageError> {
        match &self.source {
            DatasetSource::Inline(dataset) => Ok(dataset.clone()),
            DatasetSource::File {
                path,
                schema,
                format,
            } => {
                let (file, format) = resolve_file(path, *format)?;
                let text = std::fs::read_to_string(&file).map_err(|e| read_error(&file, e))?;
                let parsed = match format {
                    DataFormat::Json => Dataset::from_json(schema.clone(), &text),
                    DataFormat::Csv => Dataset::from_csv(schema.clone(), &text),
                };
                parsed.map_err(|e| {
                    StageError::validation(format!("cannot parse {}: {}", file.display(), e))
                })
            }
        }
    }
}

/// The file to read and how to decode it
fn resolve_file(
    path: &Path,
    format: Option<DataFormat>,
) -> Result<(PathBuf, DataFormat), StageError> {
    if !path.is_dir() {
        return Ok((
            path.to_path_buf(),
            format.unwrap_or_else(|| DataFormat::of_path(path)),
        ));
    }
    if format == Some(DataFormat::Json) {
        return Err(StageError::validation(format!(
            "{} is a directory; only CSV directories are supported",
            path.display()
        )));
    }

    let entries = std::fs::read_dir(path).map_err(|e| read_error(path, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let file = entry.map_err(|e| read_error(path, e))?.path();
        if file.is_file() && DataFormat::of_path(&file) == DataFormat::Csv {
            files.push(file);
        }
    }
    files.sort();
    match files.into_iter().next() {
        Some(file) => {
            debug!(dir = %path.display(), file = %file.display(), "Picked dataset file");
            Ok((file, DataFormat::Csv))
        }
        None => Err(StageError::validation(format!(
            "no CSV file found in {}",
            path.display()
        ))),
    }
}

fn read_error(path: &Path, err: std::io::Error) -> StageError {
    let mut error = StageError::from(err);
    error.message = format!("cannot read {}: {}", path.display(), error.message);
    error
}

impl Stage for IngestStage {
    fn kind(&self) -> &'static str {
        "ingest"
    }

    /// Covers the data itself, so a changed file invalidates the cache
    fn config_fingerprint(&self) -> Result<Fingerprint, StageError> {
        let mut fp = Fingerprinter::new("riskline.stage.ingest.v1");
        fp.str(self.target.as_deref().unwrap_or(""));
        match &self.source {
            DatasetSource::Inline(dataset) => {
                fp.tag(0).fingerprint(&dataset.fingerprint());
            }
            DatasetSource::File {
                path,
                schema,
                format,
            } => {
                let (file, format) = resolve_file(path, *format)?;
                let bytes = std::fs::read(&file).map_err(|e| read_error(&file, e))?;
                fp.tag(1)
                    .str(&schema.name)
                    .u64(u64::from(schema.version))
                    .str(&format.to_string())
                    .bytes(&bytes);
            }
        }
        Ok(fp.finish())
    }

    fn run(&self, _ctx: &StageContext, _inputs: &StageInputs) -> Result<Artifact, StageError> {
        let dataset = self.load()?;
        if dataset.is_empty() {
            return Err(StageError::validation("dataset is empty"));
        }
        if let Some(target) = &self.target {
            if !dataset.columns().contains(target.as_str()) {
                return Err(StageError::validation(format!(
                    "target column '{}' is missing",
                    target
                )));
            }
        }

        let summary = dataset.summary(self.target.as_deref());
        info!(
            schema = %summary.schema,
            rows = summary.row_count,
            columns = summary.column_count,
            missing_cells = summary.missing_cells,
            fingerprint = %summary.fingerprint.short(),
            "Ingested dataset"
        );
        Ok(Artifact::Dataset { dataset, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::FailureClass;
    use crate::stages::fixtures::{ctx, dataset, schema};
    use riskline_core::CellValue;
    use std::io::Write;

    #[test]
    fn test_inline_ingest_records_summary() {
        let stage = IngestStage::new(DatasetSource::Inline(dataset(40))).with_target("default");
        let artifact = stage.run(&ctx("ingest"), &StageInputs::default()).unwrap();
        match artifact {
            Artifact::Dataset { summary, .. } => {
                assert_eq!(summary.row_count, 40);
                assert_eq!(summary.column_count, 4);
                assert_eq!(summary.target_positive_rate, Some(0.25));
            }
            other => panic!("unexpected artifact {}", other.kind()),
        }
    }

    #[test]
    fn test_empty_and_missing_target_fail_validation() {
        let empty = IngestStage::new(DatasetSource::Inline(Dataset::new(schema().id(), vec![])));
        let err = empty.run(&ctx("ingest"), &StageInputs::default()).unwrap_err();
        assert_eq!(err.class, FailureClass::Validation);

        let no_target = IngestStage::new(DatasetSource::Inline(dataset(4))).with_target("label");
        let err = no_target.run(&ctx("ingest"), &StageInputs::default()).unwrap_err();
        assert_eq!(err.class, FailureClass::Validation);
        assert!(err.message.contains("label"));
    }

    #[test]
    fn test_file_fingerprint_follows_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": 1, "income": 10.0, "late": 0, "default": 0}}"#).unwrap();
        let stage = IngestStage::new(DatasetSource::File {
            path: file.path().to_path_buf(),
            schema: schema().id(),
            format: None,
        });

        let before = stage.config_fingerprint().unwrap();
        assert_eq!(before, stage.config_fingerprint().unwrap());
        writeln!(file, r#"{{"id": 2, "income": 20.0, "late": 1, "default": 1}}"#).unwrap();
        assert_ne!(before, stage.config_fingerprint().unwrap());

        let artifact = stage.run(&ctx("ingest"), &StageInputs::default()).unwrap();
        assert_eq!(artifact.as_dataset().map(Dataset::row_count), Some(2));
    }

    #[test]
    fn test_missing_file_is_not_retried() {
        let stage = IngestStage::new(DatasetSource::File {
            path: PathBuf::from("/nonexistent/riskline/data.json"),
            schema: schema().id(),
            format: None,
        });
        let err = stage.config_fingerprint().unwrap_err();
        assert_eq!(err.class, FailureClass::Validation);
        assert!(!err.is_retryable());
        assert!(err.message.contains("/nonexistent/riskline/data.json"));
    }

    const CSV: &str = "id,income,late,default\n1,1000.5,0,0\n2,2000,3,1\n3,,1,0\n";

    #[test]
    fn test_csv_file_is_typed_per_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loans.csv");
        std::fs::write(&path, CSV).unwrap();

        let stage = IngestStage::new(DatasetSource::File {
            path,
            schema: schema().id(),
            format: None,
        })
        .with_target("default");
        let artifact = stage.run(&ctx("ingest"), &StageInputs::default()).unwrap();
        let dataset = artifact.as_dataset().unwrap();
        assert_eq!(dataset.row_count(), 3);
        assert_eq!(dataset.value(1, "income"), &CellValue::Float(2000.0));
        assert_eq!(dataset.value(2, "income"), &CellValue::Null);
        assert_eq!(dataset.value(1, "late"), &CellValue::Int(3));
    }

    #[test]
    fn test_directory_uses_first_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "id,income,late,default\n9,1.0,0,0\n").unwrap();
        std::fs::write(dir.path().join("a.csv"), CSV).unwrap();
        std::fs::write(dir.path().join("notes.json"), "[]").unwrap();

        let source = DatasetSource::File {
            path: dir.path().to_path_buf(),
            schema: schema().id(),
            format: None,
        };
        let artifact = IngestStage::new(source)
            .run(&ctx("ingest"), &StageInputs::default())
            .unwrap();
        assert_eq!(artifact.as_dataset().map(Dataset::row_count), Some(3));

        let empty = tempfile::tempdir().unwrap();
        let err = IngestStage::new(DatasetSource::File {
            path: empty.path().to_path_buf(),
            schema: schema().id(),
            format: None,
        })
        .run(&ctx("ingest"), &StageInputs::default())
        .unwrap_err();
        assert_eq!(err.class, FailureClass::Validation);
    }

    #[test]
    fn test_explicit_format_overrides_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.txt");
        std::fs::write(&path, CSV).unwrap();

        let as_csv = IngestStage::new(DatasetSource::File {
            path: path.clone(),
            schema: schema().id(),
            format: Some(DataFormat::Csv),
        });
        assert!(as_csv.run(&ctx("ingest"), &StageInputs::default()).is_ok());

        let by_extension = IngestStage::new(DatasetSource::File {
            path,
            schema: schema().id(),
            format: None,
        });
        let err = by_extension
            .run(&ctx("ingest"), &StageInputs::default())
            .unwrap_err();
        assert_eq!(err.class, FailureClass::Validation);
        assert_eq!("CSV".parse::<DataFormat>(), Ok(DataFormat::Csv));
        assert!("xml".parse::<DataFormat>().is_err());
    }
}
