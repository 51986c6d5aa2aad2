//! Visit data model (§3), populated by the Visit Executor (C9) and
//! enriched by the Resource/Cost Tracker (C10).

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::disease::DiseaseState;
use crate::patient::PatientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitType {
    InitialAssessment,
    LoadingInjection,
    DecisionOnlyPostLoading,
    InjectionOnly,
    DecisionWithInjection,
    MonitoringOnly,
    DiscontinuationVisit,
}

impl VisitType {
    /// Injection types set `injection_given = true` and start/extend the
    /// treatment-effect window.
    pub fn is_injection(self) -> bool {
        matches!(
            self,
            VisitType::LoadingInjection | VisitType::InjectionOnly | VisitType::DecisionWithInjection
        )
    }

    /// Visits at which the Discontinuation Manager evaluates.
    pub fn is_decision_point(self) -> bool {
        matches!(
            self,
            VisitType::DecisionOnlyPostLoading
                | VisitType::DecisionWithInjection
                | VisitType::MonitoringOnly
        )
    }

    /// Whether this visit type must fall on a working day (§4.1): only
    /// monitoring and mortality/administrative discontinuation visits are
    /// exempt.
    pub fn requires_working_day(self) -> bool {
        !matches!(self, VisitType::MonitoringOnly | VisitType::DiscontinuationVisit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Loading,
    Maintenance,
    Monitoring,
}

/// A required role and headcount for one visit, taken verbatim from the
/// cost/resource specification's `visit_requirements` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceRequirement {
    pub role: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub patient_id: PatientId,
    pub date: NaiveDate,
    pub time_days: i64,
    pub visit_type: VisitType,
    pub injection_given: bool,
    pub disease_state_after: DiseaseState,
    pub vision_after: u8,
    pub interval_days_to_next: Option<i64>,
    pub resource_components: Vec<ResourceRequirement>,
    pub cost_components: BTreeMap<String, f64>,
    pub cost_total: f64,
    pub phase: Phase,
}

impl Visit {
    pub fn duration_minutes(&self, visit_requirements: &BTreeMap<String, u32>) -> Option<u32> {
        // `visit_requirements` keys are rendered visit-type tags; callers
        // look this up via the same key used by the Resource/Cost Tracker.
        visit_requirements.get(&visit_type_key(self.visit_type)).copied()
    }
}

/// Canonical string key for a visit type, used both as the serialized
/// `visit_type` column and as the cost/resource lookup key.
pub fn visit_type_key(visit_type: VisitType) -> String {
    match visit_type {
        VisitType::InitialAssessment => "initial_assessment",
        VisitType::LoadingInjection => "loading_injection",
        VisitType::DecisionOnlyPostLoading => "decision_only_post_loading",
        VisitType::InjectionOnly => "injection_only",
        VisitType::DecisionWithInjection => "decision_with_injection",
        VisitType::MonitoringOnly => "monitoring_only",
        VisitType::DiscontinuationVisit => "discontinuation_visit",
    }
    .to_string()
}
