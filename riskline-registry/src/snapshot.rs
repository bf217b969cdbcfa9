//! Reference snapshots captured at promotion time

use crate::version::VersionId;
use chrono::{DateTime, Utc};
use riskline_core::FeatureProfile;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Training-time feature distribution of a production version.
///
/// A new snapshot is captured every time a version enters production; older
/// snapshots are kept unchanged as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSnapshot {
    pub id: Uuid,
    pub model_name: String,
    pub version: VersionId,
    pub captured_at: DateTime<Utc>,
    pub profile: FeatureProfile,
}

impl ReferenceSnapshot {
    pub fn capture(
        model_name: impl Into<String>,
        version: VersionId,
        profile: FeatureProfile,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_name: model_name.into(),
            version,
            captured_at: Utc::now(),
            profile,
        }
    }
}
