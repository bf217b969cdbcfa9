//! Test data factories for Riskline types
//!
//! Every generator is seeded, so the same call always yields the same
//! records and therefore the same dataset fingerprint.

use riskline_core::{CellValue, Record};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Five-column credit dataset: `ID`, `LIMIT_BAL`, `AGE`, `PAY_0`, `default`
pub mod credit {
    use super::*;
    use crate::builders::RecordBuilder;
    use riskline_core::{
        ColumnSpec, Dataset, FeatureKind, FeatureSpec, ImputeStrategy, Schema, SchemaId,
        SchemaRegistry, TransformConfig,
    };
    use riskline_runtime::stages::DatasetSource;
    use std::sync::Arc;

    pub const SCHEMA_NAME: &str = "credit_small";
    pub const TARGET: &str = "default";

    /// Names of the encoded features, in matrix order
    pub const FEATURES: [&str; 4] = ["limit_z", "age_group", "pay_0", "delayed"];

    pub fn schema_id() -> SchemaId {
        SchemaId::new(SCHEMA_NAME, 1)
    }

    pub fn schema() -> Schema {
        Schema::builder(SCHEMA_NAME, 1)
            .column("ID", ColumnSpec::integer())
            .column("LIMIT_BAL", ColumnSpec::float().nullable().at_least(0.0))
            .column("AGE", ColumnSpec::integer().range(18.0, 100.0))
            .column("PAY_0", ColumnSpec::integer().range(-2.0, 9.0))
            .column(TARGET, ColumnSpec::integer().one_of([0, 1]))
            .build()
    }

    pub fn schemas() -> Arc<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        registry
            .register(schema())
            .expect("fixture schema is valid");
        Arc::new(registry)
    }

    pub fn transform() -> TransformConfig {
        TransformConfig::new(vec![
            FeatureSpec::new(
                "limit_z",
                FeatureKind::Standardized {
                    column: "LIMIT_BAL".into(),
                },
            ),
            FeatureSpec::new(
                "age_group",
                FeatureKind::Bucket {
                    column: "AGE".into(),
                    edges: vec![18.0, 30.0, 40.0, 50.0, 60.0, 100.0],
                },
            ),
            FeatureSpec::new(
                "pay_0",
                FeatureKind::Raw {
                    column: "PAY_0".into(),
                },
            ),
            FeatureSpec::new(
                "delayed",
                FeatureKind::CountPositive {
                    columns: vec!["PAY_0".into()],
                },
            ),
        ])
        .with_target(TARGET)
        .with_dedupe_on("ID")
        .with_impute(ImputeStrategy::Median)
    }

    /// `rows` labelled records; repayment delay drives the default rate
    pub fn records(rows: usize, seed: u64) -> Vec<Record> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..rows)
            .map(|i| {
                let delay = if rng.gen_bool(0.7) {
                    rng.gen_range(-2..=0)
                } else {
                    rng.gen_range(1..=8)
                };
                applicant(&mut rng, i as i64, delay)
            })
            .collect()
    }

    /// Records whose repayment status has shifted towards long delays
    pub fn delayed_records(rows: usize, seed: u64) -> Vec<Record> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..rows)
            .map(|i| {
                let delay = rng.gen_range(5..=8);
                applicant(&mut rng, i as i64, delay)
            })
            .collect()
    }

    fn applicant(rng: &mut StdRng, id: i64, delay: i64) -> Record {
        let limit = if rng.gen_bool(0.02) {
            CellValue::Null
        } else {
            CellValue::Float(f64::from(rng.gen_range(10u32..=500)) * 1000.0)
        };
        let logit = -2.0 + 0.9 * delay as f64;
        let p_default = 1.0 / (1.0 + (-logit).exp());
        RecordBuilder::new()
            .int("ID", id)
            .cell("LIMIT_BAL", limit)
            .int("AGE", rng.gen_range(21..=75))
            .int("PAY_0", delay)
            .int(TARGET, i64::from(rng.gen_bool(p_default)))
            .build()
    }

    pub fn dataset(rows: usize, seed: u64) -> Dataset {
        Dataset::new(schema_id(), records(rows, seed))
    }

    pub fn source(rows: usize, seed: u64) -> DatasetSource {
        DatasetSource::Inline(dataset(rows, seed))
    }
}

/// Raw records without labels, as seen by the serving path
pub fn unlabelled(records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .map(|r| {
            let mut r = r.clone();
            r.remove(credit::TARGET);
            r
        })
        .collect()
}
