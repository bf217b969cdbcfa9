//! Model artifacts and their lineage

use crate::version::{PromotionState, VersionId};
use chrono::{DateTime, Utc};
use riskline_core::{FeatureEncoder, FeatureProfile, Fingerprint, MetricSnapshot};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a model came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLineage {
    /// Pipeline run that trained the model
    pub run_id: Uuid,
    pub dataset_fingerprint: Fingerprint,
    pub feature_fingerprint: Fingerprint,
    pub transform_fingerprint: Fingerprint,
}

/// Input to [`crate::ModelRegistry::register`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub model_name: String,
    /// Trainer kind needed to decode the payload
    pub kind: String,
    #[serde(with = "hex_payload")]
    pub payload: Vec<u8>,
    pub lineage: ModelLineage,
    pub metrics: MetricSnapshot,
    pub encoder: FeatureEncoder,
    pub profile: FeatureProfile,
}

/// A registered, immutable model version. Only `state` and
/// `state_changed_at` ever change after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_name: String,
    pub version: VersionId,
    pub kind: String,
    #[serde(with = "hex_payload")]
    pub payload: Vec<u8>,
    pub payload_fingerprint: Fingerprint,
    pub lineage: ModelLineage,
    pub metrics: MetricSnapshot,
    pub encoder: FeatureEncoder,
    pub profile: FeatureProfile,
    pub state: PromotionState,
    pub created_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
}

impl ModelArtifact {
    pub(crate) fn from_candidate(candidate: ModelCandidate, version: VersionId) -> Self {
        let now = Utc::now();
        Self {
            payload_fingerprint: Fingerprint::of_bytes(&candidate.payload),
            model_name: candidate.model_name,
            version,
            kind: candidate.kind,
            payload: candidate.payload,
            lineage: candidate.lineage,
            metrics: candidate.metrics,
            encoder: candidate.encoder,
            profile: candidate.profile,
            state: PromotionState::Staging,
            created_at: now,
            state_changed_at: now,
        }
    }

    /// Display label such as `credit_default:v3`
    pub fn label(&self) -> String {
        format!("{}:{}", self.model_name, self.version)
    }
}

mod hex_payload {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(de::Error::custom)
    }
}
