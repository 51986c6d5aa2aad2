//! Fixed-Interval (Treat-and-Treat) maintenance policy.
//!
//! Maintenance visits are `injection_only` on a fixed cadence with no
//! per-visit clinical decision. Once a year, the visit nearest an
//! enrollment anniversary (within the configured tolerance window) is
//! instead a `decision_only_post_loading` review — the only visit type in
//! the closed visit-type set that matches "decision without injection",
//! so it is reused here under the `Maintenance` phase rather than the
//! `Loading` phase that otherwise tags it.

use chrono::NaiveDate;

use crate::clock::add_days_working;
use crate::patient::Patient;
use crate::visit::{Phase, VisitType};

use super::{NextVisit, ProtocolBehavior, ProtocolConfig};

#[derive(Debug, Clone)]
pub struct FixedInterval {
    config: ProtocolConfig,
}

impl FixedInterval {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }
}

impl ProtocolBehavior for FixedInterval {
    fn decide_maintenance_visit(&self, patient: &Patient, current_date: NaiveDate) -> NextVisit {
        let config = &self.config;
        let candidate_date = add_days_working(current_date, config.maintenance_interval_days);

        let days_since_enrollment = (candidate_date - patient.enrollment_date()).num_days();
        let next_anniversary_number = patient.anniversaries_reviewed() as i64 + 1;
        let anniversary_day = next_anniversary_number * 365;
        let distance = (days_since_enrollment - anniversary_day).abs();

        if distance <= config.annual_review_window_days {
            NextVisit {
                date: candidate_date,
                visit_type: VisitType::DecisionOnlyPostLoading,
                phase: Phase::Maintenance,
                interval_days: config.maintenance_interval_days,
                consecutive_stable_at_max: patient.consecutive_stable_at_max(),
                anniversaries_reviewed: patient.anniversaries_reviewed() + 1,
            }
        } else {
            NextVisit {
                date: candidate_date,
                visit_type: VisitType::InjectionOnly,
                phase: Phase::Maintenance,
                interval_days: config.maintenance_interval_days,
                consecutive_stable_at_max: patient.consecutive_stable_at_max(),
                anniversaries_reviewed: patient.anniversaries_reviewed(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patient::PatientId;
    use crate::vision::ResponseType;

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            protocol_type: super::super::ProtocolType::FixedInterval,
            loading_doses: 3,
            loading_interval_days: 28,
            min_interval_days: 56,
            max_interval_days: 56,
            extension_days: 0,
            shortening_days: 0,
            maintenance_interval_days: 56,
            annual_review_window_days: 14,
        }
    }

    fn patient(enrollment: NaiveDate) -> Patient {
        Patient::new(PatientId::new(1), 70, enrollment, ResponseType::Average, 1.0)
    }

    #[test]
    fn regular_visit_is_injection_only() {
        let protocol = FixedInterval::new(config());
        let enrollment = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let p = patient(enrollment);
        let next = protocol.decide_maintenance_visit(&p, enrollment + chrono::Days::new(100));
        assert_eq!(next.visit_type, VisitType::InjectionOnly);
        assert_eq!(next.anniversaries_reviewed, 0);
    }

    #[test]
    fn anniversary_visit_is_decision_only() {
        let protocol = FixedInterval::new(config());
        let enrollment = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let p = patient(enrollment);
        // current_date chosen so candidate_date lands within the window of
        // the first anniversary (365 days after enrollment).
        let current_date = enrollment + chrono::Days::new(365 - 56);
        let next = protocol.decide_maintenance_visit(&p, current_date);
        assert_eq!(next.visit_type, VisitType::DecisionOnlyPostLoading);
        assert_eq!(next.anniversaries_reviewed, 1);
    }
}
