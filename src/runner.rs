//! Runner/Orchestrator (C12)
//!
//! Owns the whole run: enrolls the cohort, drives a `BinaryHeap`-backed
//! event queue keyed by `(date, patient_id)` so visits execute in global
//! date order across the cohort, and hands finished patients to the
//! Result Writer. Cancellation is checked between events and produces a
//! `RunOutcome::Partial` rather than an `Err` — only true failures
//! (misconfiguration, an unmapped visit type, an invariant violation, or
//! result-writer I/O failure) propagate through `Result`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::clock::Calendar;
use crate::config::ProtocolSpec;
use crate::error::Result;
use crate::executor::execute_visit;
use crate::patient::{Patient, PatientId};
use crate::protocol::Protocol;
use crate::recruitment::{enroll_cohort, RecruitmentSpec};
use crate::resources::CostSpec;
use crate::rng::{PatientRngs, RandomSource};
use crate::writer::{Progress, ResultWriter, SCHEMA_VERSION};

/// A minimal cooperative cancellation handle — an `Arc<AtomicBool>`, no
/// async runtime needed for this synchronous simulation loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Partial { last_day: i64 },
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub output_dir: PathBuf,
}

/// Writes the full run-metadata row set required of every run: schema
/// version, seed, engine, protocol identifier and checksum, the run
/// horizon, the recruitment parameters that produced the cohort, and a
/// JSON snapshot of all three input specifications. Shared between the
/// sequential and parallel paths so neither can drift out of sync with
/// the other's metadata set.
fn write_run_metadata(
    writer: &mut ResultWriter,
    protocol_spec: &ProtocolSpec,
    cost_spec: &CostSpec,
    recruitment_spec: &RecruitmentSpec,
    calendar: &Calendar,
    seed: u64,
    engine: &str,
    n_patients_enrolled: usize,
) -> Result<()> {
    writer.write_metadata("schema_version", SCHEMA_VERSION)?;
    writer.write_metadata("seed", &seed.to_string())?;
    writer.write_metadata("engine", engine)?;
    writer.write_metadata("protocol_type", &format!("{:?}", protocol_spec.protocol.protocol_type))?;
    writer.write_metadata("protocol_checksum", &format!("{:016x}", protocol_spec.checksum()))?;
    writer.write_metadata("start_date", &calendar.start_date().to_string())?;
    writer.write_metadata("end_date", &calendar.end_date().to_string())?;
    writer.write_metadata("duration_days", &calendar.duration_days().to_string())?;
    writer.write_metadata("recruitment_mode", &format!("{:?}", recruitment_spec.mode))?;
    writer.write_metadata("cohort_size", &n_patients_enrolled.to_string())?;
    writer.write_metadata(
        "protocol_config_json",
        &serde_json::to_string(protocol_spec).expect("ProtocolSpec is always serializable"),
    )?;
    writer.write_metadata(
        "cost_config_json",
        &serde_json::to_string(cost_spec).expect("CostSpec is always serializable"),
    )?;
    writer.write_metadata(
        "recruitment_config_json",
        &serde_json::to_string(recruitment_spec).expect("RecruitmentSpec is always serializable"),
    )?;
    Ok(())
}

/// Full control surface: loads nothing itself (the caller loads and
/// validates the three specifications), runs the simulation, and writes
/// output to `output_dir`.
pub fn run(
    protocol_spec: ProtocolSpec,
    cost_spec: CostSpec,
    recruitment_spec: RecruitmentSpec,
    output_dir: &Path,
    seed: u64,
    cancellation_token: CancellationToken,
    mut progress_callback: Option<Box<dyn FnMut(Progress) + Send>>,
) -> Result<RunOutcome> {
    protocol_spec.validate()?;
    cost_spec.validate_covers_all_visit_types()?;

    let calendar = Calendar::new(recruitment_spec.start_date, recruitment_spec.run_duration_years);
    let random_source = RandomSource::new(seed);
    let protocol = Protocol::new(protocol_spec.protocol.clone());

    info!(seed, start = %calendar.start_date(), end = %calendar.end_date(), "starting run");

    let cohort = enroll_cohort(&recruitment_spec, calendar.start_date(), &random_source);

    let mut patients: BTreeMap<PatientId, Patient> = BTreeMap::new();
    let mut rngs: BTreeMap<PatientId, PatientRngs> = BTreeMap::new();
    let mut heap: BinaryHeap<Reverse<(NaiveDate, PatientId)>> = BinaryHeap::new();

    for (id, draw) in cohort {
        if calendar.has_elapsed(draw.date) {
            continue;
        }
        let patient = Patient::new(id, draw.baseline_vision, draw.date, draw.response_type, draw.response_multiplier);
        heap.push(Reverse((patient.next_visit_date(), id)));
        rngs.insert(id, random_source.patient_rngs(id));
        patients.insert(id, patient);
    }

    let mut writer = ResultWriter::create(output_dir)?;
    write_run_metadata(&mut writer, &protocol_spec, &cost_spec, &recruitment_spec, &calendar, seed, "sequential", patients.len())?;

    let mut last_day = 0i64;
    let mut cancelled = false;

    while let Some(Reverse((date, id))) = heap.pop() {
        if cancellation_token.is_cancelled() {
            cancelled = true;
            break;
        }
        if calendar.has_elapsed(date) {
            continue;
        }
        last_day = calendar.time_days(date);

        let patient = patients.get_mut(&id).expect("patient exists for every queued event");
        let patient_rngs = rngs.get_mut(&id).expect("rngs exist for every queued event");

        if let Err(err) = execute_visit(patient, &calendar, &protocol, &protocol_spec, &cost_spec, patient_rngs) {
            warn!(patient_id = %id, date = %date, error = %err, "aborting run on executor failure");
            writer.abort();
            return Err(err);
        }

        if !patient.is_terminated() {
            heap.push(Reverse((patient.next_visit_date(), id)));
        }
    }

    for patient in patients.values() {
        match writer.write_patient(patient) {
            Ok(progress) => {
                if let Some(callback) = progress_callback.as_mut() {
                    callback(progress);
                }
            }
            Err(err) => {
                writer.abort();
                return Err(err);
            }
        }
    }

    if cancelled {
        writer.finalize()?;
        info!(last_day, "run cancelled, partial output written");
        return Ok(RunOutcome {
            status: RunStatus::Partial { last_day },
            output_dir: output_dir.to_path_buf(),
        });
    }

    writer.finalize()?;
    info!(patients = patients.len(), "run complete");
    Ok(RunOutcome {
        status: RunStatus::Success,
        output_dir: output_dir.to_path_buf(),
    })
}

/// Runs one patient to completion (termination, cancellation, or the end
/// of the simulated horizon), independent of every other patient. This is
/// what the `parallel` feature's worker pool calls per patient — since a
/// patient's draws depend only on `(seed, patient id)`, never on
/// scheduling order, running patients out of order or concurrently
/// produces byte-identical per-patient output to the sequential,
/// heap-ordered path above.
fn simulate_patient_to_completion(
    mut patient: Patient,
    rngs: &mut PatientRngs,
    calendar: &Calendar,
    protocol: &Protocol,
    spec: &ProtocolSpec,
    cost_spec: &CostSpec,
    cancellation_token: &CancellationToken,
) -> Result<Patient> {
    while !patient.is_terminated()
        && !calendar.has_elapsed(patient.next_visit_date())
        && !cancellation_token.is_cancelled()
    {
        execute_visit(&mut patient, calendar, protocol, spec, cost_spec, rngs)?;
    }
    Ok(patient)
}

#[cfg(feature = "parallel")]
pub mod parallel {
    use super::*;
    use rayon::prelude::*;
    use std::sync::mpsc;

    /// Parallel counterpart of [`super::run`]: each patient is simulated
    /// independently on the `rayon` thread pool, then merged into a
    /// single-writer channel the Runner drains in patient-ID order before
    /// handing batches to the Result Writer — preserving the deterministic
    /// output ordering the sequential path produces via its event heap.
    pub fn run_parallel(
        protocol_spec: ProtocolSpec,
        cost_spec: CostSpec,
        recruitment_spec: RecruitmentSpec,
        output_dir: &Path,
        seed: u64,
        cancellation_token: CancellationToken,
        mut progress_callback: Option<Box<dyn FnMut(Progress) + Send>>,
    ) -> Result<RunOutcome> {
        protocol_spec.validate()?;
        cost_spec.validate_covers_all_visit_types()?;

        let calendar = Calendar::new(recruitment_spec.start_date, recruitment_spec.run_duration_years);
        let random_source = RandomSource::new(seed);
        let protocol = Protocol::new(protocol_spec.protocol.clone());

        let cohort = enroll_cohort(&recruitment_spec, calendar.start_date(), &random_source);
        let live_cohort: Vec<_> = cohort.into_iter().filter(|(_, draw)| !calendar.has_elapsed(draw.date)).collect();
        let live_cohort_len = live_cohort.len();

        let (tx, rx) = mpsc::channel::<Result<Patient>>();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                live_cohort.into_par_iter().for_each_with(tx, |tx, (id, draw)| {
                    let patient = Patient::new(id, draw.baseline_vision, draw.date, draw.response_type, draw.response_multiplier);
                    let mut patient_rngs = random_source.patient_rngs(id);
                    let result = simulate_patient_to_completion(
                        patient, &mut patient_rngs, &calendar, &protocol, &protocol_spec, &cost_spec, &cancellation_token,
                    );
                    let _ = tx.send(result);
                });
            });

            let mut writer = ResultWriter::create(output_dir)?;
            write_run_metadata(&mut writer, &protocol_spec, &cost_spec, &recruitment_spec, &calendar, seed, "parallel", live_cohort_len)?;

            let mut finished: BTreeMap<PatientId, Patient> = BTreeMap::new();
            for result in rx {
                match result {
                    Ok(patient) => {
                        finished.insert(patient.id(), patient);
                    }
                    Err(err) => {
                        writer.abort();
                        return Err(err);
                    }
                }
            }

            for patient in finished.values() {
                match writer.write_patient(patient) {
                    Ok(progress) => {
                        if let Some(callback) = progress_callback.as_mut() {
                            callback(progress);
                        }
                    }
                    Err(err) => {
                        writer.abort();
                        return Err(err);
                    }
                }
            }

            if cancellation_token.is_cancelled() {
                writer.finalize()?;
                return Ok(RunOutcome {
                    status: RunStatus::Partial { last_day: calendar.duration_days() },
                    output_dir: output_dir.to_path_buf(),
                });
            }

            writer.finalize()?;
            Ok(RunOutcome {
                status: RunStatus::Success,
                output_dir: output_dir.to_path_buf(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discontinuation::DiscontinuationProfile;
    use crate::disease::TransitionMatrix;
    use crate::protocol::{ProtocolConfig, ProtocolType};
    use crate::recruitment::{EnrollmentShape, RecruitmentMode, ResponseTypeWeights};
    use crate::resources::CostComponent;
    use crate::vision::{HemorrhageModel, VisionChangeModel, VisionScenario};
    use std::collections::BTreeMap as Map;

    fn stable_matrix() -> TransitionMatrix {
        [
            [0.1, 0.6, 0.2, 0.1],
            [0.05, 0.75, 0.15, 0.05],
            [0.05, 0.2, 0.6, 0.15],
            [0.02, 0.08, 0.3, 0.6],
        ]
    }

    fn protocol_spec() -> ProtocolSpec {
        ProtocolSpec {
            protocol: ProtocolConfig {
                protocol_type: ProtocolType::TreatAndExtend,
                loading_doses: 3,
                loading_interval_days: 28,
                min_interval_days: 28,
                max_interval_days: 112,
                extension_days: 14,
                shortening_days: 14,
                maintenance_interval_days: 56,
                annual_review_window_days: 14,
            },
            disease_transitions: stable_matrix(),
            treatment_effect_multipliers: [[1.0; 4]; 4],
            treatment_effect_window_days: 90,
            vision_change_model: VisionChangeModel {
                naive_untreated: VisionScenario { mean: -3.0, std: 2.0 },
                naive_treated: VisionScenario { mean: 1.0, std: 1.5 },
                stable_untreated: VisionScenario { mean: -1.0, std: 1.5 },
                stable_treated: VisionScenario { mean: 0.5, std: 1.0 },
                active_untreated: VisionScenario { mean: -3.0, std: 2.0 },
                active_treated: VisionScenario { mean: -0.5, std: 1.5 },
                highly_active_untreated: VisionScenario { mean: -6.0, std: 3.0 },
                highly_active_treated: VisionScenario { mean: -1.5, std: 2.0 },
            },
            hemorrhage_model: HemorrhageModel { probability: 0.01, mean_loss: 10.0 },
            loading_vision_bonus: 1.0,
            discontinuation_profile: DiscontinuationProfile {
                mortality_annual_probability: 0.01,
                poor_response_vision_threshold: 20,
                poor_response_consecutive_visits: 3,
                poor_response_monitoring_weeks: vec![],
                system_discontinuation_annual_probability: 0.0,
                system_discontinuation_monitoring_weeks: vec![],
                reauthorization_failure_annual_probability: 0.0,
                reauthorization_failure_monitoring_weeks: vec![],
                premature_per_visit_probability: 0.0,
                premature_monitoring_weeks: vec![],
                stable_max_interval_consecutive_threshold: 100,
                stable_max_interval_monitoring_weeks: vec![],
                retreatment_vision_loss_threshold: 10,
                annual_review_window_days: 14,
            },
        }
    }

    fn cost_spec() -> CostSpec {
        use crate::visit::{visit_type_key, ResourceRequirement, VisitType};
        let visit_types = [
            VisitType::InitialAssessment,
            VisitType::LoadingInjection,
            VisitType::DecisionOnlyPostLoading,
            VisitType::InjectionOnly,
            VisitType::DecisionWithInjection,
            VisitType::MonitoringOnly,
            VisitType::DiscontinuationVisit,
        ];
        let mut visit_type_components = Map::new();
        let mut visit_requirements = Map::new();
        for vt in visit_types {
            let key = visit_type_key(vt);
            visit_type_components.insert(key.clone(), vec![CostComponent { name: "clinic".to_string(), amount: 50.0 }]);
            visit_requirements.insert(key, vec![ResourceRequirement { role: "nurse".to_string(), count: 1 }]);
        }
        CostSpec {
            currency: "GBP".to_string(),
            visit_type_components,
            visit_requirements,
            visit_duration_minutes: Map::new(),
            role_daily_capacity: Map::from([("nurse".to_string(), 20)]),
        }
    }

    fn recruitment_spec() -> RecruitmentSpec {
        RecruitmentSpec {
            start_date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            run_duration_years: 1.0,
            mode: RecruitmentMode::FixedTotal { total: 5, shape: EnrollmentShape::Uniform },
            window_days: 30,
            baseline_vision_mean: 65.0,
            baseline_vision_std: 5.0,
            response_type_weights: ResponseTypeWeights { good: 0.3, average: 0.5, poor: 0.2 },
            response_multiplier_good: 1.2,
            response_multiplier_average: 1.0,
            response_multiplier_poor: 0.8,
        }
    }

    #[test]
    fn full_run_produces_success_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(
            protocol_spec(),
            cost_spec(),
            recruitment_spec(),
            dir.path(),
            7,
            CancellationToken::new(),
            None,
        )
        .unwrap();
        assert_eq!(outcome.status, RunStatus::Success);
        assert!(dir.path().join("visits.csv").exists());
        assert!(dir.path().join("patients.csv").exists());
    }

    #[test]
    fn cancelling_immediately_yields_partial_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let outcome = run(protocol_spec(), cost_spec(), recruitment_spec(), dir.path(), 7, token, None).unwrap();
        assert!(matches!(outcome.status, RunStatus::Partial { .. }));
    }

    #[test]
    fn run_metadata_carries_schema_version_checksum_and_horizon() {
        let dir = tempfile::tempdir().unwrap();
        run(protocol_spec(), cost_spec(), recruitment_spec(), dir.path(), 7, CancellationToken::new(), None).unwrap();

        let metadata = std::fs::read_to_string(dir.path().join("run_metadata.csv")).unwrap();
        let keys: Vec<&str> = metadata.lines().skip(1).map(|line| line.split(',').next().unwrap()).collect();

        for expected in [
            "schema_version",
            "engine",
            "protocol_type",
            "protocol_checksum",
            "duration_days",
            "recruitment_mode",
            "cohort_size",
            "protocol_config_json",
            "cost_config_json",
            "recruitment_config_json",
        ] {
            assert!(keys.contains(&expected), "missing run_metadata key: {expected}");
        }
    }

    #[test]
    fn zero_length_duration_still_runs_the_enrollment_day_visit() {
        let dir = tempfile::tempdir().unwrap();
        let mut recruitment = recruitment_spec();
        recruitment.run_duration_years = 0.0;
        // A zero-width enrollment window forces every draw onto the start
        // date itself, so the zero-length-duration boundary case is hit
        // deterministically rather than depending on the timing RNG.
        recruitment.window_days = 0;

        let outcome = run(protocol_spec(), cost_spec(), recruitment, dir.path(), 7, CancellationToken::new(), None).unwrap();
        assert_eq!(outcome.status, RunStatus::Success);

        let visits = std::fs::read_to_string(dir.path().join("visits.csv")).unwrap();
        assert!(visits.lines().count() > 1, "zero-length duration should still emit the day-0 initial_assessment visit");
    }

    #[test]
    fn same_seed_produces_identical_output_files() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        run(protocol_spec(), cost_spec(), recruitment_spec(), dir_a.path(), 123, CancellationToken::new(), None).unwrap();
        run(protocol_spec(), cost_spec(), recruitment_spec(), dir_b.path(), 123, CancellationToken::new(), None).unwrap();

        let visits_a = std::fs::read_to_string(dir_a.path().join("visits.csv")).unwrap();
        let visits_b = std::fs::read_to_string(dir_b.path().join("visits.csv")).unwrap();
        assert_eq!(visits_a, visits_b);
    }
}
