//! Resource/Cost Tracker (C10)
//!
//! Looks up the role requirements and cost components for a visit type
//! from tables supplied by the cost/resource specification. A visit type
//! absent from either table is an `UnmappedVisitType` hard failure with no
//! fallback — silently charging nothing, or silently staffing nothing, for
//! an unrecognized visit type would corrupt every downstream total.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, NamdError, Result};
use crate::visit::{visit_type_key, ResourceRequirement, Visit, VisitType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostComponent {
    pub name: String,
    pub amount: f64,
}

/// Visit-type keyed cost, staffing, and duration tables, plus the daily
/// capacity of each staffing role (visits one unit of that role can cover
/// per working day), used to turn per-visit requirements into a
/// sessions-needed count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostSpec {
    /// ISO 4217 currency code (e.g. `"GBP"`) every amount in this spec is
    /// denominated in. Carried through to run metadata rather than assumed
    /// by a caller reading `cost_total` off a bare number.
    pub currency: String,
    pub visit_type_components: BTreeMap<String, Vec<CostComponent>>,
    pub visit_requirements: BTreeMap<String, Vec<ResourceRequirement>>,
    pub visit_duration_minutes: BTreeMap<String, u32>,
    pub role_daily_capacity: BTreeMap<String, u32>,
}

impl CostSpec {
    /// Every visit type a protocol can emit (spec.md's closed `VisitType`
    /// set) must appear in both the cost and requirement tables. Checked at
    /// config-load time so a missing entry is `MisconfiguredProtocol`
    /// rather than the runtime `UnmappedVisitType` this module also
    /// guards against defensively.
    pub fn validate_covers_all_visit_types(&self) -> Result<()> {
        for visit_type in ALL_VISIT_TYPES {
            let key = visit_type_key(visit_type);
            if !self.visit_type_components.contains_key(&key) {
                return Err(NamdError::misconfigured(format!(
                    "cost spec is missing visit_type_components entry for '{key}'"
                )));
            }
            if !self.visit_requirements.contains_key(&key) {
                return Err(NamdError::misconfigured(format!(
                    "cost spec is missing visit_requirements entry for '{key}'"
                )));
            }
        }
        Ok(())
    }
}

const ALL_VISIT_TYPES: [VisitType; 7] = [
    VisitType::InitialAssessment,
    VisitType::LoadingInjection,
    VisitType::DecisionOnlyPostLoading,
    VisitType::InjectionOnly,
    VisitType::DecisionWithInjection,
    VisitType::MonitoringOnly,
    VisitType::DiscontinuationVisit,
];

/// Looks up the cost components and total for one visit. Hard-fails with
/// `UnmappedVisitType` if the visit type has no entry — the config-time
/// check above should have already caught this, but the executor cannot
/// assume the spec it was handed was the one validated.
pub fn cost_for_visit(
    spec: &CostSpec,
    visit_type: VisitType,
    context: ErrorContext,
) -> Result<(BTreeMap<String, f64>, f64)> {
    let key = visit_type_key(visit_type);
    let components = spec.visit_type_components.get(&key).ok_or_else(|| {
        NamdError::unmapped_visit_type(format!("no cost components mapped for visit type '{key}'"), context)
    })?;
    let mut amounts = BTreeMap::new();
    let mut total = 0.0;
    for component in components {
        *amounts.entry(component.name.clone()).or_insert(0.0) += component.amount;
        total += component.amount;
    }
    Ok((amounts, total))
}

/// Looks up the staffing requirements for one visit type.
pub fn resources_for_visit(
    spec: &CostSpec,
    visit_type: VisitType,
    context: ErrorContext,
) -> Result<Vec<ResourceRequirement>> {
    let key = visit_type_key(visit_type);
    spec.visit_requirements
        .get(&key)
        .cloned()
        .ok_or_else(|| NamdError::unmapped_visit_type(format!("no resource requirements mapped for visit type '{key}'"), context))
}

/// Aggregates, for every (date, role) pair touched by `visits`, the number
/// of staffing sessions needed: the total headcount required that day for
/// the role, divided by the role's daily capacity and rounded up — a role
/// with spare capacity within a session still needs a whole session
/// booked.
pub fn daily_role_sessions(visits: &[Visit], role_daily_capacity: &BTreeMap<String, u32>) -> BTreeMap<(NaiveDate, String), u32> {
    let mut headcount: BTreeMap<(NaiveDate, String), u32> = BTreeMap::new();
    for visit in visits {
        for requirement in &visit.resource_components {
            *headcount.entry((visit.date, requirement.role.clone())).or_insert(0) += requirement.count;
        }
    }

    headcount
        .into_iter()
        .map(|((date, role), count)| {
            let capacity = role_daily_capacity.get(&role).copied().unwrap_or(1).max(1);
            let sessions = count.div_ceil(capacity);
            ((date, role), sessions)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CostSpec {
        let mut visit_type_components = BTreeMap::new();
        let mut visit_requirements = BTreeMap::new();
        for visit_type in ALL_VISIT_TYPES {
            let key = visit_type_key(visit_type);
            visit_type_components.insert(
                key.clone(),
                vec![CostComponent { name: "consultant".to_string(), amount: 40.0 }],
            );
            visit_requirements.insert(key, vec![ResourceRequirement { role: "nurse".to_string(), count: 1 }]);
        }
        CostSpec {
            currency: "GBP".to_string(),
            visit_type_components,
            visit_requirements,
            visit_duration_minutes: BTreeMap::new(),
            role_daily_capacity: BTreeMap::from([("nurse".to_string(), 10)]),
        }
    }

    #[test]
    fn validate_covers_all_visit_types_passes_when_complete() {
        assert!(spec().validate_covers_all_visit_types().is_ok());
    }

    #[test]
    fn validate_fails_on_missing_entry() {
        let mut s = spec();
        s.visit_requirements.remove(&visit_type_key(VisitType::MonitoringOnly));
        assert!(s.validate_covers_all_visit_types().is_err());
    }

    #[test]
    fn unmapped_visit_type_lookup_fails_at_runtime() {
        let s = CostSpec {
            currency: "GBP".to_string(),
            visit_type_components: BTreeMap::new(),
            visit_requirements: BTreeMap::new(),
            visit_duration_minutes: BTreeMap::new(),
            role_daily_capacity: BTreeMap::new(),
        };
        let result = cost_for_visit(&s, VisitType::InitialAssessment, ErrorContext::new());
        assert!(result.is_err());
    }

    #[test]
    fn daily_sessions_round_up() {
        use crate::disease::DiseaseState;
        use crate::patient::PatientId;
        use crate::visit::Phase;

        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let visits: Vec<Visit> = (0..3)
            .map(|i| Visit {
                patient_id: PatientId::new(i + 1),
                date,
                time_days: 0,
                visit_type: VisitType::InjectionOnly,
                injection_given: true,
                disease_state_after: DiseaseState::Stable,
                vision_after: 60,
                interval_days_to_next: Some(56),
                resource_components: vec![ResourceRequirement { role: "nurse".to_string(), count: 1 }],
                cost_components: BTreeMap::new(),
                cost_total: 0.0,
                phase: Phase::Maintenance,
            })
            .collect();
        let capacity = BTreeMap::from([("nurse".to_string(), 2u32)]);
        let sessions = daily_role_sessions(&visits, &capacity);
        assert_eq!(sessions[&(date, "nurse".to_string())], 2);
    }
}
