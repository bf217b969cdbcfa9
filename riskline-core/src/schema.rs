//! Schema registry and dataset validation
//!
//! Schemas declare, per column, a type, a null policy and optional value
//! constraints (numeric range, allowed set, regex pattern). Validation walks
//! every row and collects every violation before reporting; a dataset either
//! satisfies 100% of its schema or is rejected.
//!
//! The only way to obtain a [`ValidatedDataset`] is through
//! [`SchemaRegistry::validate`], which lets downstream code demand proof of
//! validation in its signature.

use crate::dataset::Dataset;
use crate::value::CellValue;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Identifies one version of a named schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaId {
    /// Schema name
    pub name: String,
    /// Schema version, starting at 1
    pub version: u32,
}

impl SchemaId {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Whole numbers. Floats with no fractional part are accepted.
    Integer,
    /// Any number
    Float,
    String,
    Boolean,
}

impl ColumnType {
    fn accepts(&self, value: &CellValue) -> bool {
        match (self, value) {
            (ColumnType::Integer, CellValue::Int(_)) => true,
            (ColumnType::Integer, CellValue::Float(v)) => v.fract() == 0.0,
            (ColumnType::Float, CellValue::Int(_) | CellValue::Float(_)) => true,
            (ColumnType::String, CellValue::Str(_)) => true,
            (ColumnType::Boolean, CellValue::Bool(_)) => true,
            _ => false,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Constraints on a single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(rename = "type")]
    pub column_type: ColumnType,

    #[serde(default)]
    pub nullable: bool,

    /// Inclusive lower bound for numeric columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Inclusive upper bound for numeric columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Enumerated set of permitted values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<CellValue>>,

    /// Regex the whole value must match (string columns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl ColumnSpec {
    fn of(column_type: ColumnType) -> Self {
        Self {
            column_type,
            nullable: false,
            min: None,
            max: None,
            allowed: None,
            pattern: None,
        }
    }

    pub fn integer() -> Self {
        Self::of(ColumnType::Integer)
    }

    pub fn float() -> Self {
        Self::of(ColumnType::Float)
    }

    pub fn string() -> Self {
        Self::of(ColumnType::String)
    }

    pub fn boolean() -> Self {
        Self::of(ColumnType::Boolean)
    }

    /// Allow null or absent values
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set an inclusive value range
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Set an inclusive lower bound
    pub fn at_least(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Restrict values to an enumerated set
    pub fn one_of<V: Into<CellValue>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Require values to fully match a regex
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// A named, versioned set of column constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub version: u32,
    pub columns: BTreeMap<String, ColumnSpec>,

    /// When false, columns not declared here are reported as violations
    #[serde(default)]
    pub allow_extra_columns: bool,
}

impl Schema {
    /// Start building a schema
    pub fn builder(name: impl Into<String>, version: u32) -> SchemaBuilder {
        SchemaBuilder {
            schema: Schema {
                name: name.into(),
                version,
                columns: BTreeMap::new(),
                allow_extra_columns: false,
            },
        }
    }

    pub fn id(&self) -> SchemaId {
        SchemaId::new(self.name.clone(), self.version)
    }
}

/// Builder for [`Schema`]
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn column(mut self, name: impl Into<String>, spec: ColumnSpec) -> Self {
        self.schema.columns.insert(name.into(), spec);
        self
    }

    pub fn allow_extra_columns(mut self) -> Self {
        self.schema.allow_extra_columns = true;
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

/// Why a column failed validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ViolationReason {
    /// Value has the wrong type
    TypeMismatch { expected: ColumnType },

    /// Null or missing value in a non-nullable column
    NullNotAllowed,

    /// Numeric value outside the declared range
    OutOfRange { min: Option<f64>, max: Option<f64> },

    /// Value not in the enumerated set
    NotInAllowedSet,

    /// String does not match the declared pattern
    PatternMismatch { pattern: String },

    /// Column is not declared by the schema
    UnexpectedColumn,
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationReason::TypeMismatch { expected } => write!(f, "expected {expected}"),
            ViolationReason::NullNotAllowed => write!(f, "null not allowed"),
            ViolationReason::OutOfRange { min, max } => {
                let lo = min.map_or("-inf".to_string(), |v| v.to_string());
                let hi = max.map_or("+inf".to_string(), |v| v.to_string());
                write!(f, "outside [{lo}, {hi}]")
            }
            ViolationReason::NotInAllowedSet => write!(f, "not in allowed set"),
            ViolationReason::PatternMismatch { pattern } => {
                write!(f, "does not match /{pattern}/")
            }
            ViolationReason::UnexpectedColumn => write!(f, "column not in schema"),
        }
    }
}

/// All rows of one column failing for one reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub column: String,
    #[serde(flatten)]
    pub reason: ViolationReason,
    /// Zero-based row indices, ascending
    pub rows: Vec<usize>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "column '{}': {} ({} row(s))",
            self.column,
            self.reason,
            self.rows.len()
        )
    }
}

/// Every violation found while validating one dataset
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("dataset violates schema {schema}: {} violation(s)", .violations.len())]
pub struct ValidationError {
    pub schema: SchemaId,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// Violations reported for one column
    pub fn for_column<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Violation> + 'a {
        self.violations.iter().filter(move |v| v.column == column)
    }
}

/// Schema registry errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("Unknown schema: {0}")]
    UnknownSchema(SchemaId),

    #[error("Schema already registered: {0}")]
    AlreadyRegistered(SchemaId),

    #[error("Invalid schema definition {schema}: {reason}")]
    InvalidDefinition { schema: SchemaId, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Proof that a dataset satisfied its schema
#[derive(Debug, Clone)]
pub struct ValidatedDataset {
    dataset: Dataset,
    schema: Arc<Schema>,
}

impl ValidatedDataset {
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }
}

#[derive(Debug)]
struct CompiledSchema {
    schema: Arc<Schema>,
    patterns: HashMap<String, Regex>,
}

/// Holds every known schema version. Lookups of unregistered versions fail.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<SchemaId, CompiledSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema version. Versions are immutable once registered.
    pub fn register(&mut self, schema: Schema) -> Result<SchemaId, SchemaError> {
        let id = schema.id();
        if self.schemas.contains_key(&id) {
            return Err(SchemaError::AlreadyRegistered(id));
        }

        let invalid = |reason: String| SchemaError::InvalidDefinition {
            schema: id.clone(),
            reason,
        };

        if schema.name.trim().is_empty() {
            return Err(invalid("name cannot be empty".to_string()));
        }
        if schema.version == 0 {
            return Err(invalid("versions start at 1".to_string()));
        }

        let mut patterns = HashMap::new();
        for (column, spec) in &schema.columns {
            if (spec.min.is_some() || spec.max.is_some()) && !spec.column_type.is_numeric() {
                return Err(invalid(format!(
                    "column '{column}': range on {} column",
                    spec.column_type
                )));
            }
            if let (Some(min), Some(max)) = (spec.min, spec.max) {
                if min > max {
                    return Err(invalid(format!("column '{column}': min {min} > max {max}")));
                }
            }
            if let Some(pattern) = &spec.pattern {
                if spec.column_type != ColumnType::String {
                    return Err(invalid(format!(
                        "column '{column}': pattern on {} column",
                        spec.column_type
                    )));
                }
                let regex = Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|e| invalid(format!("column '{column}': {e}")))?;
                patterns.insert(column.clone(), regex);
            }
        }

        debug!(schema = %id, columns = schema.columns.len(), "Registered schema");
        self.schemas.insert(
            id.clone(),
            CompiledSchema {
                schema: Arc::new(schema),
                patterns,
            },
        );
        Ok(id)
    }

    /// Look up a registered schema
    pub fn get(&self, id: &SchemaId) -> Result<Arc<Schema>, SchemaError> {
        self.schemas
            .get(id)
            .map(|c| Arc::clone(&c.schema))
            .ok_or_else(|| SchemaError::UnknownSchema(id.clone()))
    }

    /// Registered schema ids, sorted
    pub fn ids(&self) -> Vec<SchemaId> {
        let mut ids: Vec<_> = self.schemas.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Validate a dataset against the schema version it claims.
    ///
    /// Every row is checked; all violations are reported together.
    pub fn validate(&self, dataset: &Dataset) -> Result<ValidatedDataset, SchemaError> {
        let compiled = self
            .schemas
            .get(dataset.schema())
            .ok_or_else(|| SchemaError::UnknownSchema(dataset.schema().clone()))?;
        let schema = &compiled.schema;

        let mut violations = Vec::new();
        for (column, spec) in &schema.columns {
            check_column(
                dataset,
                column,
                spec,
                compiled.patterns.get(column),
                &mut violations,
            );
        }

        if !schema.allow_extra_columns {
            let mut unexpected: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
            for (row, record) in dataset.records().iter().enumerate() {
                for column in record.keys() {
                    if !schema.columns.contains_key(column) {
                        unexpected.entry(column.as_str()).or_default().push(row);
                    }
                }
            }
            violations.extend(unexpected.into_iter().map(|(column, rows)| Violation {
                column: column.to_string(),
                reason: ViolationReason::UnexpectedColumn,
                rows,
            }));
        }

        if violations.is_empty() {
            debug!(
                schema = %schema.id(),
                rows = dataset.row_count(),
                "Dataset passed validation"
            );
            Ok(ValidatedDataset {
                dataset: dataset.clone(),
                schema: Arc::clone(schema),
            })
        } else {
            warn!(
                schema = %schema.id(),
                violations = violations.len(),
                "Dataset failed validation"
            );
            Err(ValidationError {
                schema: schema.id(),
                violations,
            }
            .into())
        }
    }
}

fn check_column(
    dataset: &Dataset,
    column: &str,
    spec: &ColumnSpec,
    pattern: Option<&Regex>,
    out: &mut Vec<Violation>,
) {
    let mut type_rows = Vec::new();
    let mut null_rows = Vec::new();
    let mut range_rows = Vec::new();
    let mut set_rows = Vec::new();
    let mut pattern_rows = Vec::new();

    for row in 0..dataset.row_count() {
        let value = dataset.value(row, column);
        let missing = match value {
            CellValue::Null => true,
            CellValue::Float(v) => v.is_nan(),
            _ => false,
        };
        if missing {
            if !spec.nullable {
                null_rows.push(row);
            }
            continue;
        }

        if !spec.column_type.accepts(value) {
            type_rows.push(row);
            continue;
        }

        if let Some(v) = value.as_f64() {
            let below = spec.min.is_some_and(|min| v < min);
            let above = spec.max.is_some_and(|max| v > max);
            if below || above {
                range_rows.push(row);
            }
        }

        if let Some(allowed) = &spec.allowed {
            if !allowed.iter().any(|a| a.loosely_equals(value)) {
                set_rows.push(row);
            }
        }

        if let (Some(regex), Some(s)) = (pattern, value.as_str()) {
            if !regex.is_match(s) {
                pattern_rows.push(row);
            }
        }
    }

    let groups = [
        (
            ViolationReason::TypeMismatch {
                expected: spec.column_type,
            },
            type_rows,
        ),
        (ViolationReason::NullNotAllowed, null_rows),
        (
            ViolationReason::OutOfRange {
                min: spec.min,
                max: spec.max,
            },
            range_rows,
        ),
        (ViolationReason::NotInAllowedSet, set_rows),
        (
            ViolationReason::PatternMismatch {
                pattern: spec.pattern.clone().unwrap_or_default(),
            },
            pattern_rows,
        ),
    ];

    out.extend(
        groups
            .into_iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(reason, rows)| Violation {
                column: column.to_string(),
                reason,
                rows,
            }),
    );
}
