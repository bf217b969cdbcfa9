//! Ready-made schema and feature set for the credit card default dataset
//!
//! Column names follow the public "default of credit card clients" data:
//! repayment status `PAY_0..PAY_5`, bill statements `BILL_AMT1..6`, previous
//! payments `PAY_AMT1..6` and the binary `default` label.

use crate::schema::{ColumnSpec, Schema};
use crate::transform::{FeatureKind, FeatureSpec, ImputeStrategy, TransformConfig};

pub const CREDIT_SCHEMA_NAME: &str = "credit_default";
pub const CREDIT_TARGET: &str = "default";
pub const CREDIT_ID: &str = "ID";

fn pay_columns() -> Vec<String> {
    (0..6).map(|i| format!("PAY_{i}")).collect()
}

fn bill_columns() -> Vec<String> {
    (1..=6).map(|i| format!("BILL_AMT{i}")).collect()
}

fn pay_amount_columns() -> Vec<String> {
    (1..=6).map(|i| format!("PAY_AMT{i}")).collect()
}

/// Raw input schema, version 1
pub fn credit_default_schema() -> Schema {
    let mut builder = Schema::builder(CREDIT_SCHEMA_NAME, 1)
        .column(CREDIT_ID, ColumnSpec::integer())
        .column("LIMIT_BAL", ColumnSpec::float().at_least(0.0))
        .column("SEX", ColumnSpec::integer().one_of([1, 2]))
        .column("EDUCATION", ColumnSpec::integer().range(0.0, 6.0))
        .column("MARRIAGE", ColumnSpec::integer().range(0.0, 3.0))
        .column("AGE", ColumnSpec::integer().range(18.0, 100.0))
        .column(CREDIT_TARGET, ColumnSpec::integer().one_of([0, 1]));

    for column in pay_columns() {
        builder = builder.column(column, ColumnSpec::integer().range(-2.0, 9.0));
    }
    for column in bill_columns() {
        builder = builder.column(column, ColumnSpec::float().nullable());
    }
    for column in pay_amount_columns() {
        builder = builder.column(column, ColumnSpec::float().nullable().at_least(0.0));
    }
    builder.build()
}

/// Raw columns plus the engineered credit features, median imputation and
/// de-duplication on `ID`
pub fn credit_default_transform() -> TransformConfig {
    let raw = |name: &str| {
        FeatureSpec::new(
            name,
            FeatureKind::Raw {
                column: name.to_string(),
            },
        )
    };

    let mut features: Vec<FeatureSpec> = ["LIMIT_BAL", "SEX", "EDUCATION", "MARRIAGE", "AGE"]
        .into_iter()
        .map(raw)
        .collect();
    for column in pay_columns()
        .iter()
        .chain(&bill_columns())
        .chain(&pay_amount_columns())
    {
        features.push(raw(column.as_str()));
    }

    features.extend([
        FeatureSpec::new(
            "avg_payment_delay",
            FeatureKind::MeanPositive {
                columns: pay_columns(),
            },
        ),
        FeatureSpec::new(
            "total_delayed_months",
            FeatureKind::CountPositive {
                columns: pay_columns(),
            },
        ),
        FeatureSpec::new(
            "max_delay",
            FeatureKind::Max {
                columns: pay_columns(),
            },
        ),
        FeatureSpec::new(
            "avg_bill_amount",
            FeatureKind::Mean {
                columns: bill_columns(),
            },
        ),
        FeatureSpec::new(
            "avg_payment_amount",
            FeatureKind::Mean {
                columns: pay_amount_columns(),
            },
        ),
        FeatureSpec::new(
            "bill_payment_ratio",
            FeatureKind::Ratio {
                numerator: "avg_payment_amount".into(),
                denominator: "avg_bill_amount".into(),
                offset: 1.0,
                abs_denominator: true,
            },
        ),
        FeatureSpec::new(
            "credit_utilization",
            FeatureKind::ClippedRatio {
                numerator: "avg_bill_amount".into(),
                denominator: "LIMIT_BAL".into(),
                lo: 0.0,
                hi: 2.0,
            },
        ),
        FeatureSpec::new(
            "age_group",
            FeatureKind::Bucket {
                column: "AGE".into(),
                edges: vec![0.0, 25.0, 35.0, 45.0, 55.0, 100.0],
            },
        ),
        FeatureSpec::new(
            "limit_category",
            FeatureKind::Bucket {
                column: "LIMIT_BAL".into(),
                edges: vec![0.0, 50_000.0, 150_000.0, 300_000.0, 500_000.0, f64::MAX],
            },
        ),
    ]);

    TransformConfig::new(features)
        .with_target(CREDIT_TARGET)
        .with_dedupe_on(CREDIT_ID)
        .with_impute(ImputeStrategy::Median)
}
