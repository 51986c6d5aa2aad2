//! Universal invariants the engine must hold for every seed and protocol.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use proptest::prelude::*;

use namd_sim::config::ProtocolSpec;
use namd_sim::discontinuation::DiscontinuationProfile;
use namd_sim::disease::{advance_one_tick, DiseaseState, TransitionMatrix};
use namd_sim::protocol::{ProtocolConfig, ProtocolType};
use namd_sim::recruitment::{EnrollmentShape, RecruitmentMode, RecruitmentSpec, ResponseTypeWeights};
use namd_sim::resources::{CostComponent, CostSpec};
use namd_sim::rng::{RandomSource, Substream};
use namd_sim::visit::{visit_type_key, ResourceRequirement, VisitType};
use namd_sim::vision::{HemorrhageModel, VisionChangeModel, VisionScenario};
use namd_sim::{run, CancellationToken, PatientId};

fn stable_matrix() -> TransitionMatrix {
    [
        [0.1, 0.6, 0.2, 0.1],
        [0.05, 0.75, 0.15, 0.05],
        [0.05, 0.2, 0.6, 0.15],
        [0.02, 0.08, 0.3, 0.6],
    ]
}

fn vision_model() -> VisionChangeModel {
    VisionChangeModel {
        naive_untreated: VisionScenario { mean: -3.0, std: 2.0 },
        naive_treated: VisionScenario { mean: 1.0, std: 1.5 },
        stable_untreated: VisionScenario { mean: -1.0, std: 1.5 },
        stable_treated: VisionScenario { mean: 0.5, std: 1.0 },
        active_untreated: VisionScenario { mean: -3.0, std: 2.0 },
        active_treated: VisionScenario { mean: -0.5, std: 1.5 },
        highly_active_untreated: VisionScenario { mean: -6.0, std: 3.0 },
        highly_active_treated: VisionScenario { mean: -1.5, std: 2.0 },
    }
}

fn discontinuation_profile() -> DiscontinuationProfile {
    DiscontinuationProfile {
        mortality_annual_probability: 0.01,
        poor_response_vision_threshold: 15,
        poor_response_consecutive_visits: 3,
        poor_response_monitoring_weeks: vec![8, 16],
        system_discontinuation_annual_probability: 0.02,
        system_discontinuation_monitoring_weeks: vec![8],
        reauthorization_failure_annual_probability: 0.02,
        reauthorization_failure_monitoring_weeks: vec![8],
        premature_per_visit_probability: 0.005,
        premature_monitoring_weeks: vec![],
        stable_max_interval_consecutive_threshold: 3,
        stable_max_interval_monitoring_weeks: vec![8, 16, 24],
        retreatment_vision_loss_threshold: 10,
        annual_review_window_days: 14,
    }
}

fn protocol_spec(protocol_type: ProtocolType) -> ProtocolSpec {
    let (min_interval, max_interval) = match protocol_type {
        ProtocolType::TreatAndExtend => (28, 112),
        ProtocolType::FixedInterval => (56, 56),
    };
    ProtocolSpec {
        protocol: ProtocolConfig {
            protocol_type,
            loading_doses: 3,
            loading_interval_days: 28,
            min_interval_days: min_interval,
            max_interval_days: max_interval,
            extension_days: 14,
            shortening_days: 14,
            maintenance_interval_days: 56,
            annual_review_window_days: 14,
        },
        disease_transitions: stable_matrix(),
        treatment_effect_multipliers: [[1.0; 4]; 4],
        treatment_effect_window_days: 90,
        vision_change_model: vision_model(),
        hemorrhage_model: HemorrhageModel { probability: 0.01, mean_loss: 10.0 },
        loading_vision_bonus: 1.0,
        discontinuation_profile: discontinuation_profile(),
    }
}

fn cost_spec() -> CostSpec {
    let visit_types = [
        VisitType::InitialAssessment,
        VisitType::LoadingInjection,
        VisitType::DecisionOnlyPostLoading,
        VisitType::InjectionOnly,
        VisitType::DecisionWithInjection,
        VisitType::MonitoringOnly,
        VisitType::DiscontinuationVisit,
    ];
    let mut visit_type_components = BTreeMap::new();
    let mut visit_requirements = BTreeMap::new();
    for vt in visit_types {
        let key = visit_type_key(vt);
        visit_type_components.insert(key.clone(), vec![CostComponent { name: "clinic".to_string(), amount: 50.0 }]);
        visit_requirements.insert(key, vec![ResourceRequirement { role: "nurse".to_string(), count: 1 }]);
    }
    CostSpec {
        currency: "GBP".to_string(),
        visit_type_components,
        visit_requirements,
        visit_duration_minutes: BTreeMap::new(),
        role_daily_capacity: BTreeMap::from([("nurse".to_string(), 20)]),
    }
}

fn recruitment_spec(total: u32) -> RecruitmentSpec {
    RecruitmentSpec {
        start_date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
        run_duration_years: 1.0,
        mode: RecruitmentMode::FixedTotal { total, shape: EnrollmentShape::Uniform },
        window_days: 30,
        baseline_vision_mean: 65.0,
        baseline_vision_std: 6.0,
        response_type_weights: ResponseTypeWeights { good: 0.3, average: 0.5, poor: 0.2 },
        response_multiplier_good: 1.2,
        response_multiplier_average: 1.0,
        response_multiplier_poor: 0.8,
    }
}

/// Parses the per-visit CSV into `(patient_id, date, vision_after)` rows, in
/// file order. None of this fixture's fields contain a comma, so a plain
/// split suffices.
fn parse_visits(path: &std::path::Path) -> Vec<(String, String, u8)> {
    let contents = std::fs::read_to_string(path).unwrap();
    contents
        .lines()
        .skip(1)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            (fields[0].to_string(), fields[1].to_string(), fields[7].parse::<u8>().unwrap())
        })
        .collect()
}

fn parse_patients(path: &std::path::Path) -> Vec<Vec<String>> {
    let contents = std::fs::read_to_string(path).unwrap();
    contents
        .lines()
        .skip(1)
        .filter(|l| !l.is_empty())
        .map(|line| line.split(',').map(|s| s.to_string()).collect())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// For all seeds and both protocols, running twice produces byte-identical output.
    #[test]
    fn same_seed_same_protocol_is_byte_identical(seed in 0u64..10_000, te in any::<bool>()) {
        let protocol_type = if te { ProtocolType::TreatAndExtend } else { ProtocolType::FixedInterval };
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        run(protocol_spec(protocol_type), cost_spec(), recruitment_spec(10), dir_a.path(), seed, CancellationToken::new(), None).unwrap();
        run(protocol_spec(protocol_type), cost_spec(), recruitment_spec(10), dir_b.path(), seed, CancellationToken::new(), None).unwrap();

        let visits_a = std::fs::read_to_string(dir_a.path().join("visits.csv")).unwrap();
        let visits_b = std::fs::read_to_string(dir_b.path().join("visits.csv")).unwrap();
        prop_assert_eq!(visits_a, visits_b);
    }

    /// Vision is always in [0, 100] and visit dates are strictly increasing per patient.
    #[test]
    fn vision_in_bounds_and_dates_strictly_increasing(seed in 0u64..10_000, te in any::<bool>()) {
        let protocol_type = if te { ProtocolType::TreatAndExtend } else { ProtocolType::FixedInterval };
        let dir = tempfile::tempdir().unwrap();
        run(protocol_spec(protocol_type), cost_spec(), recruitment_spec(8), dir.path(), seed, CancellationToken::new(), None).unwrap();

        let rows = parse_visits(&dir.path().join("visits.csv"));
        let mut last_date: BTreeMap<String, String> = BTreeMap::new();
        for (patient_id, date, vision) in rows {
            prop_assert!(vision <= 100);
            if let Some(prev) = last_date.get(&patient_id) {
                prop_assert!(&date > prev, "dates must strictly increase for {}", patient_id);
            }
            last_date.insert(patient_id, date);
        }
    }

    /// Two protocols sharing a seed draw identical enrollment, baseline
    /// vision, and response type for every patient (paired comparison).
    #[test]
    fn paired_protocols_share_intrinsic_draws(seed in 0u64..10_000) {
        let dir_te = tempfile::tempdir().unwrap();
        let dir_tt = tempfile::tempdir().unwrap();

        run(protocol_spec(ProtocolType::TreatAndExtend), cost_spec(), recruitment_spec(10), dir_te.path(), seed, CancellationToken::new(), None).unwrap();
        run(protocol_spec(ProtocolType::FixedInterval), cost_spec(), recruitment_spec(10), dir_tt.path(), seed, CancellationToken::new(), None).unwrap();

        let patients_te = parse_patients(&dir_te.path().join("patients.csv"));
        let patients_tt = parse_patients(&dir_tt.path().join("patients.csv"));
        prop_assert_eq!(patients_te.len(), patients_tt.len());

        for (row_te, row_tt) in patients_te.iter().zip(patients_tt.iter()) {
            // columns: patient_id, enrollment_date, baseline_vision, ...
            prop_assert_eq!(&row_te[0], &row_tt[0], "patient_id");
            prop_assert_eq!(&row_te[1], &row_tt[1], "enrollment_date");
            prop_assert_eq!(&row_te[2], &row_tt[2], "baseline_vision");
            prop_assert_eq!(&row_te[4], &row_tt[4], "response_type");
        }
    }

    /// Disease transition rows renormalize to a valid distribution after the
    /// treatment-effect multiplier is applied: drawing from a treated row
    /// never errors and always returns one of the four disease states.
    #[test]
    fn treated_rows_renormalize_to_a_valid_distribution(
        row_weights in prop::array::uniform4(0.01f64..1.0),
        multiplier_weights in prop::array::uniform4(0.1f64..5.0),
        state_idx in 0usize..4,
    ) {
        let row_sum: f64 = row_weights.iter().sum();
        let normalized_row = row_weights.map(|w| w / row_sum);

        let mut matrix: TransitionMatrix = [[0.0; 4]; 4];
        for row in matrix.iter_mut() {
            *row = normalized_row;
        }
        let mut multipliers: TransitionMatrix = [[1.0; 4]; 4];
        multipliers[state_idx] = multiplier_weights;

        let rs = RandomSource::new(seed_for(row_weights, multiplier_weights));
        let mut rng = rs.patient_stream(Substream::DiseaseTransitions, PatientId::new(1));

        for _ in 0..200 {
            let result = advance_one_tick(DiseaseState::from_index(state_idx), &matrix, &multipliers, true, &mut rng);
            prop_assert!(result.is_ok());
        }
    }
}

/// Derives a deterministic seed from arbitrary proptest-generated floats so
/// the treated-row property test doesn't need its own `seed` parameter.
fn seed_for(a: [f64; 4], b: [f64; 4]) -> u64 {
    let mut bits = 0u64;
    for v in a.iter().chain(b.iter()) {
        bits = bits.wrapping_mul(31).wrapping_add(v.to_bits());
    }
    bits
}
