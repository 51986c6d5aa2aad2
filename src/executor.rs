//! Visit Executor (C9)
//!
//! Drives one patient through a single visit: catches disease and vision
//! up to the visit date tick by tick, evaluates mortality at every tick
//! along the way, records the visit (costed and staffed), runs the
//! discontinuation/retreatment checks a decision or monitoring visit
//! requires, and asks the Protocol Engine for the next visit. Never reads
//! or writes another patient's state — every call is independent, which is
//! what lets the Runner dispatch patients in parallel.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::clock::{add_days, add_days_working, Calendar};
use crate::config::ProtocolSpec;
use crate::discontinuation::{evaluate_decision, evaluate_mortality, should_retreat, DiscontinuationCategory, DiscontinuationRecord};
use crate::disease::{advance_one_tick as advance_disease_tick, ticks_between, TICK_DAYS};
use crate::error::{ErrorContext, Result};
use crate::patient::Patient;
use crate::protocol::Protocol;
use crate::resources::{cost_for_visit, resources_for_visit, CostSpec};
use crate::rng::PatientRngs;
use crate::vision::advance_one_tick as advance_vision_tick;
use crate::visit::{Phase, Visit, VisitType};

/// Advances disease and vision from the patient's last recorded tick up to
/// (and including) `target_date`, evaluating mortality at every tick.
/// Returns once the patient dies or once caught up to `target_date`;
/// `patient.is_terminated()` tells the caller which happened.
fn advance_ticks_to(
    patient: &mut Patient,
    target_date: NaiveDate,
    spec: &ProtocolSpec,
    rngs: &mut PatientRngs,
) -> Result<()> {
    let mut cursor = patient.last_tick_date();
    let remaining_ticks = ticks_between(0, (target_date - cursor).num_days());

    for _ in 0..remaining_ticks {
        let next_tick = add_days(cursor, TICK_DAYS);

        let treated = patient.last_injection_date().is_some_and(|injected| {
            let days_since = (next_tick - injected).num_days();
            days_since >= 0 && days_since <= spec.treatment_effect_window_days
        });

        let new_state = advance_disease_tick(
            patient.disease_state(),
            &spec.disease_transitions,
            &spec.treatment_effect_multipliers,
            treated,
            &mut rngs.disease,
        )?;

        let loading_bonus = if patient.next_phase() == Phase::Loading {
            spec.loading_vision_bonus
        } else {
            0.0
        };
        let new_vision = advance_vision_tick(
            patient.current_vision(),
            new_state,
            treated,
            patient.response_multiplier(),
            loading_bonus,
            &spec.vision_change_model,
            &spec.hemorrhage_model,
            &mut rngs.vision,
            &mut rngs.hemorrhage,
        );

        patient.set_disease_state(new_state);
        patient.set_current_vision(new_vision);
        patient.set_last_tick_date(next_tick);
        cursor = next_tick;

        if evaluate_mortality(&spec.discontinuation_profile, &mut rngs.discontinuation) {
            if !patient.is_discontinued() {
                patient.apply_discontinuation(DiscontinuationRecord {
                    category: DiscontinuationCategory::Mortality,
                    date: next_tick,
                    monitoring_schedule: Vec::new(),
                    vision_at_discontinuation: patient.current_vision(),
                })?;
            }
            patient.schedule_next(None);
            return Ok(());
        }
    }
    Ok(())
}

fn build_visit(
    patient: &Patient,
    calendar: &Calendar,
    date: NaiveDate,
    visit_type: VisitType,
    phase: Phase,
    interval_days_to_next: Option<i64>,
    cost_spec: &CostSpec,
) -> Result<Visit> {
    let context = ErrorContext::new().with_patient(patient.id()).with_date(date).with_visit_type(visit_type);
    let (cost_components, cost_total) = cost_for_visit(cost_spec, visit_type, context.clone())?;
    let resource_components = resources_for_visit(cost_spec, visit_type, context)?;

    Ok(Visit {
        patient_id: patient.id(),
        date,
        time_days: calendar.time_days(date),
        visit_type,
        injection_given: visit_type.is_injection(),
        disease_state_after: patient.disease_state(),
        vision_after: patient.current_vision(),
        interval_days_to_next,
        resource_components,
        cost_components,
        cost_total,
        phase,
    })
}

/// Executes the patient's currently scheduled visit in full: tick
/// advancement, recording, discontinuation/retreatment evaluation, and
/// scheduling of the next visit.
pub fn execute_visit(
    patient: &mut Patient,
    calendar: &Calendar,
    protocol: &Protocol,
    spec: &ProtocolSpec,
    cost_spec: &CostSpec,
    rngs: &mut PatientRngs,
) -> Result<()> {
    let visit_date = patient.next_visit_date();
    advance_ticks_to(patient, visit_date, spec, rngs)?;

    if patient.is_terminated() {
        let visit = build_visit(
            patient,
            calendar,
            patient.last_tick_date(),
            VisitType::DiscontinuationVisit,
            Phase::Monitoring,
            None,
            cost_spec,
        )?;
        patient.record_visit(visit)?;
        return Ok(());
    }

    let visit_type = patient.next_visit_type();
    let phase = patient.next_phase();
    let was_discontinued = patient.is_discontinued();

    // Computed unconditionally so `interval_days_to_next` always reflects
    // what the protocol would have scheduled, even on visits where a
    // discontinuation or monitoring outcome overrides it below.
    let protocol_next = protocol.decide_next_visit(patient, visit_date);

    let visit = build_visit(patient, calendar, visit_date, visit_type, phase, Some(protocol_next.interval_days), cost_spec)?;
    patient.record_visit(visit)?;

    if visit_type.is_decision_point() && !was_discontinued {
        patient.refresh_poor_response_streak(spec.discontinuation_profile.poor_response_vision_threshold);

        if let Some(record) = evaluate_decision(patient, visit_date, protocol_next.interval_days, &spec.discontinuation_profile, &mut rngs.discontinuation) {
            schedule_after_discontinuation(patient, &record);
            patient.apply_discontinuation(record)?;
            return Ok(());
        }
    }

    if visit_type == VisitType::MonitoringOnly {
        schedule_after_monitoring(patient, protocol, visit_date, spec)?;
        return Ok(());
    }

    patient.schedule_next(Some((protocol_next.date, protocol_next.visit_type, protocol_next.phase, protocol_next.interval_days)));
    patient.set_consecutive_stable_at_max(protocol_next.consecutive_stable_at_max);
    patient.set_anniversaries_reviewed(protocol_next.anniversaries_reviewed);
    if visit_type == VisitType::LoadingInjection {
        patient.set_loading_visit_index(patient.loading_visit_index() + 1);
    }

    Ok(())
}

fn schedule_after_discontinuation(patient: &mut Patient, record: &DiscontinuationRecord) {
    match record.monitoring_schedule.first() {
        Some(&first_monitor) => {
            patient.schedule_next(Some((first_monitor, VisitType::MonitoringOnly, Phase::Monitoring, 0)));
        }
        None => patient.schedule_next(None),
    }
}

fn schedule_after_monitoring(patient: &mut Patient, protocol: &Protocol, visit_date: NaiveDate, spec: &ProtocolSpec) -> Result<()> {
    let active = patient
        .discontinuation()
        .cloned()
        .ok_or_else(|| crate::error::NamdError::invariant(
            "monitoring visit executed with no active discontinuation record",
            ErrorContext::new().with_patient(patient.id()).with_date(visit_date),
        ))?;

    if should_retreat(&active, patient.current_vision(), &spec.discontinuation_profile) {
        patient.clear_discontinuation();
        let min_interval = protocol.config().min_interval_days;
        let next_date = add_days_working(visit_date, min_interval);
        patient.schedule_next(Some((next_date, VisitType::DecisionWithInjection, Phase::Maintenance, min_interval)));
        return Ok(());
    }

    let next_monitor = active.monitoring_schedule.iter().copied().find(|date| *date > visit_date);
    match next_monitor {
        Some(date) => patient.schedule_next(Some((date, VisitType::MonitoringOnly, Phase::Monitoring, 0))),
        None => patient.schedule_next(None),
    }
    Ok(())
}

/// Aggregated per-visit-type counts and totals for a patient, used by the
/// Runner to build per-patient summary rows for the Result Writer without
/// re-deriving them from raw visits downstream.
pub fn summarize_costs(visits: &[Visit]) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    for visit in visits {
        for (component, amount) in &visit.cost_components {
            *totals.entry(component.clone()).or_insert(0.0) += amount;
        }
    }
    totals
}
