//! Protocol specification (§6): disease transitions, vision model,
//! discontinuation profile, and scheduling parameters for one protocol,
//! loaded from a single TOML document.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::discontinuation::DiscontinuationProfile;
use crate::disease::{validate_transition_matrix, TransitionMatrix};
use crate::error::{NamdError, Result};
use crate::protocol::ProtocolConfig;
use crate::vision::{HemorrhageModel, VisionChangeModel};

use super::{read_and_parse, ConfigError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolSpec {
    pub protocol: ProtocolConfig,
    pub disease_transitions: TransitionMatrix,
    pub treatment_effect_multipliers: TransitionMatrix,
    pub treatment_effect_window_days: i64,
    pub vision_change_model: VisionChangeModel,
    pub hemorrhage_model: HemorrhageModel,
    pub loading_vision_bonus: f64,
    pub discontinuation_profile: DiscontinuationProfile,
}

impl ProtocolSpec {
    /// Row-sum validation of the raw (pre-treatment) transition matrix.
    /// The treatment-adjusted row is validated lazily, per tick, by
    /// `disease::advance_one_tick` itself, since only the unmultiplied
    /// matrix is a property of configuration alone.
    pub fn validate(&self) -> Result<()> {
        validate_transition_matrix(&self.disease_transitions)?;
        if self.treatment_effect_window_days < 0 {
            return Err(NamdError::misconfigured("treatment_effect_window_days must not be negative"));
        }
        Ok(())
    }

    /// Deterministic checksum of the whole protocol configuration, written
    /// into run metadata so two output directories can be confirmed to have
    /// used identical protocol parameters without diffing the source TOML.
    pub fn checksum(&self) -> u64 {
        let encoded = serde_json::to_vec(self).expect("ProtocolSpec is always serializable");
        let mut hasher = DefaultHasher::new();
        hasher.write(&encoded);
        hasher.finish()
    }
}

pub fn load_protocol_spec(path: &Path) -> std::result::Result<ProtocolSpec, ConfigError> {
    read_and_parse(path)
}
