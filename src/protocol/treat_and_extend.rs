//! Treat-and-Extend maintenance policy.
//!
//! Every maintenance visit is `decision_with_injection`: the clinician
//! reads the disease state established at this same visit and adjusts
//! the interval before the patient leaves. Stable extends towards the
//! ceiling, active shortens towards the floor, highly active resets to
//! the floor outright.

use chrono::NaiveDate;

use crate::clock::add_days_working;
use crate::disease::DiseaseState;
use crate::patient::Patient;
use crate::visit::{Phase, VisitType};

use super::{NextVisit, ProtocolBehavior, ProtocolConfig};

#[derive(Debug, Clone)]
pub struct TreatAndExtend {
    config: ProtocolConfig,
}

impl TreatAndExtend {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }
}

impl ProtocolBehavior for TreatAndExtend {
    fn decide_maintenance_visit(&self, patient: &Patient, current_date: NaiveDate) -> NextVisit {
        let config = &self.config;

        // The visit just completed at `decision_only_post_loading` carries
        // no interval of its own; maintenance begins at the floor.
        let current_interval = if patient.next_visit_type() == VisitType::DecisionOnlyPostLoading {
            config.min_interval_days
        } else {
            patient.interval_days()
        };

        let state = patient.disease_state();
        let next_interval = match state {
            DiseaseState::Stable => (current_interval + config.extension_days).min(config.max_interval_days),
            DiseaseState::Active => (current_interval - config.shortening_days).max(config.min_interval_days),
            DiseaseState::HighlyActive => config.min_interval_days,
            // By the time loading has completed the disease model has
            // already taken the patient out of the naive state at least
            // once; treat a residual naive reading the same as active
            // rather than extend on an undefined case.
            DiseaseState::Naive => (current_interval - config.shortening_days).max(config.min_interval_days),
        };

        let at_max_and_stable = state == DiseaseState::Stable && current_interval == config.max_interval_days;
        let consecutive_stable_at_max = if at_max_and_stable {
            patient.consecutive_stable_at_max() + 1
        } else {
            0
        };

        NextVisit {
            date: add_days_working(current_date, next_interval),
            visit_type: VisitType::DecisionWithInjection,
            phase: Phase::Maintenance,
            interval_days: next_interval,
            consecutive_stable_at_max,
            anniversaries_reviewed: patient.anniversaries_reviewed(),
        }
    }
}
