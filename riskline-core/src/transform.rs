//! Feature transform stage
//!
//! Maps validated raw records to a [`FeatureMatrix`]: a fixed-order set of
//! numeric feature columns plus the fingerprints of the dataset and config
//! that produced it. The transform is a pure function of its inputs. The only
//! randomness is the optional row shuffle, whose seed is part of the config
//! and therefore of the output fingerprint.
//!
//! Processing order:
//! 1. drop duplicate rows on the configured id column (first occurrence wins)
//! 2. optional seeded shuffle
//! 3. read source columns, imputing missing numeric cells
//! 4. compute each feature in declaration order; a source name resolves to an
//!    earlier feature first, then to a raw column
//! 5. replace non-finite derived values using the same imputation strategy
//! 6. scale standardized and min-max features
//!
//! The statistics fitted in steps 3-6 are kept in a [`FeatureEncoder`] so the
//! serving path encodes live records exactly the way training data was encoded.

use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::schema::{SchemaError, SchemaRegistry, ValidatedDataset};
use crate::dataset::Dataset;
use crate::value::{CellValue, Record};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// How missing numeric values are filled
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    #[default]
    Median,
    Mean,
    Zero,
    Constant(f64),
}

impl ImputeStrategy {
    /// Fill value computed from the finite observations of a column.
    /// Columns with no observations fall back to zero.
    fn fit(&self, values: &[f64]) -> f64 {
        let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return match self {
                ImputeStrategy::Constant(c) => *c,
                _ => 0.0,
            };
        }
        match self {
            ImputeStrategy::Median => {
                finite.sort_by(f64::total_cmp);
                let mid = finite.len() / 2;
                if finite.len() % 2 == 0 {
                    (finite[mid - 1] + finite[mid]) / 2.0
                } else {
                    finite[mid]
                }
            }
            ImputeStrategy::Mean => finite.iter().sum::<f64>() / finite.len() as f64,
            ImputeStrategy::Zero => 0.0,
            ImputeStrategy::Constant(c) => *c,
        }
    }
}

/// One declared feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: FeatureKind,
}

impl FeatureSpec {
    pub fn new(name: impl Into<String>, kind: FeatureKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Names of the matrix columns this feature produces
    pub fn output_names(&self) -> Vec<String> {
        match &self.kind {
            FeatureKind::OneHot { categories, .. } => categories
                .iter()
                .map(|c| match c {
                    CellValue::Str(s) => format!("{}={}", self.name, s),
                    other => format!("{}={}", self.name, other),
                })
                .collect(),
            _ => vec![self.name.clone()],
        }
    }
}

/// Feature computations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    /// Source value as-is
    Raw { column: String },

    /// `(x - mean) / std`, population std
    Standardized { column: String },

    /// `(x - min) / (max - min)`
    MinMax { column: String },

    /// Row-wise mean over several sources
    Mean { columns: Vec<String> },

    /// Row-wise max over several sources
    Max { columns: Vec<String> },

    /// Number of sources with a value greater than zero
    CountPositive { columns: Vec<String> },

    /// Mean of the positive sources, zero when there are none
    MeanPositive { columns: Vec<String> },

    /// `numerator / (denominator + offset)`, optionally on `|denominator|`
    Ratio {
        numerator: String,
        denominator: String,
        #[serde(default)]
        offset: f64,
        #[serde(default)]
        abs_denominator: bool,
    },

    /// `numerator / denominator` clipped to `[lo, hi]`
    ClippedRatio {
        numerator: String,
        denominator: String,
        lo: f64,
        hi: f64,
    },

    /// 1-based bucket label for right-inclusive intervals `(e[i-1], e[i]]`.
    /// Values outside the edges fall into the first or last bucket.
    Bucket { column: String, edges: Vec<f64> },

    /// One 0/1 column per declared category
    OneHot {
        column: String,
        categories: Vec<CellValue>,
    },
}

impl FeatureKind {
    fn sources(&self) -> Vec<&str> {
        match self {
            FeatureKind::Raw { column }
            | FeatureKind::Standardized { column }
            | FeatureKind::MinMax { column }
            | FeatureKind::Bucket { column, .. }
            | FeatureKind::OneHot { column, .. } => vec![column.as_str()],
            FeatureKind::Mean { columns }
            | FeatureKind::Max { columns }
            | FeatureKind::CountPositive { columns }
            | FeatureKind::MeanPositive { columns } => columns.iter().map(String::as_str).collect(),
            FeatureKind::Ratio {
                numerator,
                denominator,
                ..
            }
            | FeatureKind::ClippedRatio {
                numerator,
                denominator,
                ..
            } => vec![numerator.as_str(), denominator.as_str()],
        }
    }
}

/// Declarative transform configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub features: Vec<FeatureSpec>,

    /// Label column copied into the matrix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Column identifying duplicate rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_on: Option<String>,

    #[serde(default)]
    pub impute: ImputeStrategy,

    /// Seed for an optional deterministic row shuffle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle_seed: Option<u64>,
}

impl TransformConfig {
    pub fn new(features: Vec<FeatureSpec>) -> Self {
        Self {
            features,
            target: None,
            dedupe_on: None,
            impute: ImputeStrategy::default(),
            shuffle_seed: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_dedupe_on(mut self, column: impl Into<String>) -> Self {
        self.dedupe_on = Some(column.into());
        self
    }

    pub fn with_impute(mut self, impute: ImputeStrategy) -> Self {
        self.impute = impute;
        self
    }

    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Matrix column names in output order
    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().flat_map(FeatureSpec::output_names).collect()
    }

    /// Fingerprint of the canonical JSON form
    pub fn fingerprint(&self) -> Result<Fingerprint, TransformError> {
        Fingerprint::of_json(self)
            .map_err(|e| TransformError::new("config", TransformCause::InvalidSpec(e.to_string())))
    }

    /// Check the config is internally consistent
    pub fn validate(&self) -> Result<(), TransformError> {
        let invalid = |stage: &str, msg: String| {
            Err(TransformError::new(stage, TransformCause::InvalidSpec(msg)))
        };

        if self.features.is_empty() {
            return invalid("config", "at least one feature is required".to_string());
        }

        let mut seen = HashSet::new();
        for name in self.feature_names() {
            if !seen.insert(name.clone()) {
                return invalid("config", format!("duplicate feature column '{name}'"));
            }
        }

        for spec in &self.features {
            let stage = feature_stage(&spec.name);
            match &spec.kind {
                FeatureKind::Mean { columns }
                | FeatureKind::Max { columns }
                | FeatureKind::CountPositive { columns }
                | FeatureKind::MeanPositive { columns }
                    if columns.is_empty() =>
                {
                    return invalid(&stage, "needs at least one source column".to_string());
                }
                FeatureKind::ClippedRatio { lo, hi, .. } if lo > hi => {
                    return invalid(&stage, format!("clip bounds reversed: {lo} > {hi}"));
                }
                FeatureKind::Bucket { edges, .. } => {
                    if edges.len() < 2 {
                        return invalid(&stage, "needs at least two edges".to_string());
                    }
                    if edges.windows(2).any(|w| w[0] >= w[1]) {
                        return invalid(&stage, "edges must be strictly increasing".to_string());
                    }
                }
                FeatureKind::OneHot { categories, .. } if categories.is_empty() => {
                    return invalid(&stage, "needs at least one category".to_string());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn feature_stage(name: &str) -> String {
    format!("feature '{name}'")
}

/// What went wrong inside the transform
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformCause {
    #[error("input failed validation: {0}")]
    Validation(#[from] SchemaError),

    #[error("unknown source column '{0}'")]
    UnknownSource(String),

    #[error("target column '{column}' missing in {} row(s)", .rows.len())]
    MissingTarget { column: String, rows: Vec<usize> },

    #[error("invalid transform config: {0}")]
    InvalidSpec(String),

    #[error("dataset has no rows")]
    EmptyDataset,
}

/// Transform failure, tagged with the step that failed
#[derive(Debug, Clone, PartialEq, Error)]
#[error("transform failed at {stage}: {cause}")]
pub struct TransformError {
    pub stage: String,
    pub cause: TransformCause,
}

impl TransformError {
    pub fn new(stage: impl Into<String>, cause: TransformCause) -> Self {
        Self {
            stage: stage.into(),
            cause,
        }
    }
}

/// Scaling fitted for one feature
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scaling {
    Standard { mean: f64, std: f64 },
    MinMax { min: f64, max: f64 },
}

impl Scaling {
    fn fit_standard(values: &[f64]) -> Self {
        let n = values.len().max(1) as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Scaling::Standard {
            mean,
            std: var.sqrt(),
        }
    }

    fn fit_min_max(values: &[f64]) -> Self {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if min.is_finite() && max.is_finite() {
            Scaling::MinMax { min, max }
        } else {
            Scaling::MinMax { min: 0.0, max: 0.0 }
        }
    }

    fn apply(&self, v: f64) -> f64 {
        match *self {
            Scaling::Standard { mean, std } if std > 0.0 => (v - mean) / std,
            Scaling::Standard { .. } => 0.0,
            Scaling::MinMax { min, max } if max > min => (v - min) / (max - min),
            Scaling::MinMax { .. } => 0.0,
        }
    }
}

/// Statistics fitted on the training dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FittedParams {
    /// Fill value per raw source column
    pub column_fill: BTreeMap<String, f64>,
    /// Fill value per feature for non-finite derived values
    pub feature_fill: BTreeMap<String, f64>,
    pub scaling: BTreeMap<String, Scaling>,
}

/// Transform config plus fitted statistics; encodes new records the same way
/// the training matrix was encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    pub config: TransformConfig,
    pub fitted: FittedParams,
    pub feature_names: Vec<String>,
}

impl FeatureEncoder {
    /// Encode live records. No de-duplication, shuffling or refitting happens
    /// here; columns absent from a record are imputed with the fitted fill.
    pub fn encode(&self, records: &[Record]) -> Result<Vec<Vec<f64>>, TransformError> {
        let refs: Vec<&Record> = records.iter().collect();
        let mut engine = Engine {
            records: &refs,
            config: &self.config,
            known_columns: None,
            fit: false,
            params: self.fitted.clone(),
            columns: HashMap::new(),
            features: HashMap::new(),
            imputed_cells: 0,
        };
        let columns = engine.run()?;
        Ok(transpose(&columns, refs.len()))
    }
}

/// Counters describing what preprocessing did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformMetadata {
    pub input_rows: usize,
    pub output_rows: usize,
    pub duplicates_removed: usize,
    pub imputed_cells: usize,
    pub label_positive_rate: Option<f64>,
}

/// Output of the transform stage: one row per record, shared column order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    feature_names: Vec<String>,
    rows: Vec<Vec<f64>>,
    labels: Option<Vec<f64>>,
    dataset_fingerprint: Fingerprint,
    config_fingerprint: Fingerprint,
    fingerprint: Fingerprint,
    metadata: TransformMetadata,
    encoder: FeatureEncoder,
}

impl FeatureMatrix {
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn labels(&self) -> Option<&[f64]> {
        self.labels.as_deref()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.feature_names.len()
    }

    /// Values of one named column
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.feature_names.iter().position(|n| n == name)?;
        Some(self.rows.iter().map(|r| r[idx]).collect())
    }

    pub fn dataset_fingerprint(&self) -> Fingerprint {
        self.dataset_fingerprint
    }

    pub fn config_fingerprint(&self) -> Fingerprint {
        self.config_fingerprint
    }

    /// Fingerprint over the producing dataset, config and encoded content
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    /// Canonical little-endian encoding of names, values and labels
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_matrix(&self.feature_names, &self.rows, self.labels.as_deref())
    }
}

fn encode_matrix(names: &[String], rows: &[Vec<f64>], labels: Option<&[f64]>) -> Vec<u8> {
    let width = names.len();
    let mut out = Vec::with_capacity(16 + rows.len() * width * 8);
    out.extend_from_slice(b"RLFM\x01");
    out.extend_from_slice(&(rows.len() as u64).to_le_bytes());
    out.extend_from_slice(&(width as u64).to_le_bytes());
    for name in names {
        out.extend_from_slice(&(name.len() as u64).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
    }
    for row in rows {
        for v in row {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    match labels {
        Some(labels) => {
            out.push(1);
            for v in labels {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        None => out.push(0),
    }
    out
}

/// Transform a validated dataset
pub fn transform(
    input: &ValidatedDataset,
    config: &TransformConfig,
) -> Result<FeatureMatrix, TransformError> {
    config.validate()?;
    let dataset = input.dataset();
    if dataset.is_empty() {
        return Err(TransformError::new("input", TransformCause::EmptyDataset));
    }

    let mut selected: Vec<&Record> = dataset.records().iter().collect();
    let input_rows = selected.len();

    if let Some(id_column) = &config.dedupe_on {
        if !input.schema().columns.contains_key(id_column) {
            return Err(TransformError::new(
                "dedupe",
                TransformCause::UnknownSource(id_column.clone()),
            ));
        }
        let mut seen = HashSet::new();
        selected.retain(|r| {
            let key = r.get(id_column).unwrap_or(&CellValue::Null).dedupe_key();
            seen.insert(key)
        });
    }
    let duplicates_removed = input_rows - selected.len();

    if let Some(seed) = config.shuffle_seed {
        let mut rng = StdRng::seed_from_u64(seed);
        selected.shuffle(&mut rng);
    }

    let labels = match &config.target {
        Some(target) => Some(read_labels(input, target, &selected)?),
        None => None,
    };

    let mut engine = Engine {
        records: &selected,
        config,
        known_columns: Some(input),
        fit: true,
        params: FittedParams::default(),
        columns: HashMap::new(),
        features: HashMap::new(),
        imputed_cells: 0,
    };
    let columns = engine.run()?;
    let imputed_cells = engine.imputed_cells;
    let fitted = engine.params;

    let feature_names = config.feature_names();
    let rows = transpose(&columns, selected.len());
    let config_fingerprint = config.fingerprint()?;
    let dataset_fingerprint = dataset.fingerprint();

    let mut fp = Fingerprinter::new("riskline.features.v1");
    fp.fingerprint(&dataset_fingerprint)
        .fingerprint(&config_fingerprint)
        .bytes(&encode_matrix(&feature_names, &rows, labels.as_deref()));
    let fingerprint = fp.finish();

    let label_positive_rate = labels.as_ref().map(|l| {
        l.iter().filter(|v| **v > 0.0).count() as f64 / l.len().max(1) as f64
    });

    debug!(
        rows = rows.len(),
        columns = feature_names.len(),
        duplicates_removed,
        imputed_cells,
        fingerprint = %fingerprint.short(),
        "Transformed dataset"
    );

    Ok(FeatureMatrix {
        encoder: FeatureEncoder {
            config: config.clone(),
            fitted,
            feature_names: feature_names.clone(),
        },
        metadata: TransformMetadata {
            input_rows,
            output_rows: rows.len(),
            duplicates_removed,
            imputed_cells,
            label_positive_rate,
        },
        feature_names,
        rows,
        labels,
        dataset_fingerprint,
        config_fingerprint,
        fingerprint,
    })
}

/// Validate against the registry, then transform
pub fn transform_checked(
    registry: &SchemaRegistry,
    dataset: &Dataset,
    config: &TransformConfig,
) -> Result<FeatureMatrix, TransformError> {
    let validated = registry
        .validate(dataset)
        .map_err(|e| TransformError::new("validate", TransformCause::Validation(e)))?;
    transform(&validated, config)
}

fn read_labels(
    input: &ValidatedDataset,
    target: &str,
    records: &[&Record],
) -> Result<Vec<f64>, TransformError> {
    if !input.schema().columns.contains_key(target) {
        return Err(TransformError::new(
            "target",
            TransformCause::MissingTarget {
                column: target.to_string(),
                rows: (0..records.len()).collect(),
            },
        ));
    }
    let mut labels = Vec::with_capacity(records.len());
    let mut missing = Vec::new();
    for (row, record) in records.iter().enumerate() {
        match record.get(target).and_then(CellValue::as_f64) {
            Some(v) => labels.push(v),
            None => missing.push(row),
        }
    }
    if missing.is_empty() {
        Ok(labels)
    } else {
        Err(TransformError::new(
            "target",
            TransformCause::MissingTarget {
                column: target.to_string(),
                rows: missing,
            },
        ))
    }
}

fn transpose(columns: &[Vec<f64>], rows: usize) -> Vec<Vec<f64>> {
    (0..rows)
        .map(|r| columns.iter().map(|c| c[r]).collect())
        .collect()
}

struct Engine<'a> {
    records: &'a [&'a Record],
    config: &'a TransformConfig,
    /// Present when fitting; sources must then be declared by the schema
    known_columns: Option<&'a ValidatedDataset>,
    fit: bool,
    params: FittedParams,
    columns: HashMap<String, Vec<f64>>,
    features: HashMap<String, Vec<f64>>,
    imputed_cells: usize,
}

impl Engine<'_> {
    /// Compute every output column, column-major
    fn run(&mut self) -> Result<Vec<Vec<f64>>, TransformError> {
        let config = self.config;
        let mut out = Vec::new();
        for spec in &config.features {
            let stage = feature_stage(&spec.name);
            if let FeatureKind::OneHot { column, categories } = &spec.kind {
                self.check_known(column, &stage)?;
                for category in categories {
                    out.push(
                        self.records
                            .iter()
                            .map(|r| match r.get(column) {
                                Some(v) if v.loosely_equals(category) => 1.0,
                                _ => 0.0,
                            })
                            .collect(),
                    );
                }
                continue;
            }

            let values = self.compute(spec, &stage)?;
            let values = self.fill_non_finite(&spec.name, values, &stage)?;
            self.features.insert(spec.name.clone(), values.clone());

            let scaled = match &spec.kind {
                FeatureKind::Standardized { .. } | FeatureKind::MinMax { .. } => {
                    let scaling = if self.fit {
                        let s = match spec.kind {
                            FeatureKind::Standardized { .. } => Scaling::fit_standard(&values),
                            _ => Scaling::fit_min_max(&values),
                        };
                        self.params.scaling.insert(spec.name.clone(), s);
                        s
                    } else {
                        *self.params.scaling.get(&spec.name).ok_or_else(|| {
                            TransformError::new(
                                stage.clone(),
                                TransformCause::InvalidSpec("no fitted scaling".to_string()),
                            )
                        })?
                    };
                    values.iter().map(|v| scaling.apply(*v)).collect()
                }
                _ => values,
            };
            out.push(scaled);
        }
        Ok(out)
    }

    fn compute(&mut self, spec: &FeatureSpec, stage: &str) -> Result<Vec<f64>, TransformError> {
        let sources = spec
            .kind
            .sources()
            .into_iter()
            .map(|s| self.source(s, stage))
            .collect::<Result<Vec<_>, _>>()?;
        let n = self.records.len();
        let row = |i: usize| sources.iter().map(move |s| s[i]);

        let values = match &spec.kind {
            FeatureKind::Raw { .. }
            | FeatureKind::Standardized { .. }
            | FeatureKind::MinMax { .. } => sources[0].clone(),
            FeatureKind::Mean { .. } => (0..n)
                .map(|i| row(i).sum::<f64>() / sources.len() as f64)
                .collect(),
            FeatureKind::Max { .. } => (0..n)
                .map(|i| row(i).fold(f64::NEG_INFINITY, f64::max))
                .collect(),
            FeatureKind::CountPositive { .. } => (0..n)
                .map(|i| row(i).filter(|v| *v > 0.0).count() as f64)
                .collect(),
            FeatureKind::MeanPositive { .. } => (0..n)
                .map(|i| {
                    let positive: Vec<f64> = row(i).filter(|v| *v > 0.0).collect();
                    if positive.is_empty() {
                        0.0
                    } else {
                        positive.iter().sum::<f64>() / positive.len() as f64
                    }
                })
                .collect(),
            FeatureKind::Ratio {
                offset,
                abs_denominator,
                ..
            } => (0..n)
                .map(|i| {
                    let d = if *abs_denominator {
                        sources[1][i].abs()
                    } else {
                        sources[1][i]
                    };
                    sources[0][i] / (d + offset)
                })
                .collect(),
            FeatureKind::ClippedRatio { lo, hi, .. } => (0..n)
                .map(|i| (sources[0][i] / sources[1][i]).clamp(*lo, *hi))
                .collect(),
            FeatureKind::Bucket { edges, .. } => sources[0]
                .iter()
                .map(|v| {
                    let idx = edges.partition_point(|e| e < v);
                    idx.clamp(1, edges.len() - 1) as f64
                })
                .collect(),
            FeatureKind::OneHot { .. } => {
                return Err(TransformError::new(
                    stage,
                    TransformCause::InvalidSpec("one-hot has no single value".to_string()),
                ))
            }
        };
        Ok(values)
    }

    fn check_known(&self, column: &str, stage: &str) -> Result<(), TransformError> {
        match self.known_columns {
            Some(input) if !input.schema().columns.contains_key(column) => Err(
                TransformError::new(stage, TransformCause::UnknownSource(column.to_string())),
            ),
            _ => Ok(()),
        }
    }

    /// Earlier feature by name, else an imputed raw column
    fn source(&mut self, name: &str, stage: &str) -> Result<Vec<f64>, TransformError> {
        if let Some(values) = self.features.get(name) {
            return Ok(values.clone());
        }
        if let Some(values) = self.columns.get(name) {
            return Ok(values.clone());
        }
        self.check_known(name, stage)?;

        let raw: Vec<f64> = self
            .records
            .iter()
            .map(|r| {
                r.get(name)
                    .and_then(CellValue::as_f64)
                    .filter(|v| v.is_finite())
                    .unwrap_or(f64::NAN)
            })
            .collect();

        let fill = if self.fit {
            let fill = self.config.impute.fit(&raw);
            self.params.column_fill.insert(name.to_string(), fill);
            fill
        } else {
            *self.params.column_fill.get(name).ok_or_else(|| {
                TransformError::new(stage, TransformCause::UnknownSource(name.to_string()))
            })?
        };

        let mut imputed = 0;
        let values: Vec<f64> = raw
            .into_iter()
            .map(|v| {
                if v.is_nan() {
                    imputed += 1;
                    fill
                } else {
                    v
                }
            })
            .collect();
        self.imputed_cells += imputed;
        self.columns.insert(name.to_string(), values.clone());
        Ok(values)
    }

    fn fill_non_finite(
        &mut self,
        feature: &str,
        values: Vec<f64>,
        stage: &str,
    ) -> Result<Vec<f64>, TransformError> {
        let fill = if self.fit {
            let fill = self.config.impute.fit(&values);
            self.params.feature_fill.insert(feature.to_string(), fill);
            fill
        } else {
            *self.params.feature_fill.get(feature).ok_or_else(|| {
                let cause = TransformCause::InvalidSpec("no fitted fill".to_string());
                TransformError::new(stage, cause)
            })?
        };
        Ok(values
            .into_iter()
            .map(|v| {
                if v.is_finite() {
                    v
                } else {
                    self.imputed_cells += 1;
                    fill
                }
            })
            .collect())
    }
}

impl fmt::Display for FeatureMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} features ({})",
            self.row_count(),
            self.column_count(),
            self.fingerprint.short()
        )
    }
}
