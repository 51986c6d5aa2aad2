//! Result Writer (C11)
//!
//! Hand-rolled columnar (CSV-style) output. No `csv`/`parquet`/`arrow`
//! crate is pulled in for this — one column-escaping helper and a
//! buffered writer cover everything three flat tables need. Rows are
//! flushed every `DEFAULT_CHUNK_ROWS` rows; every table is written to a
//! `.tmp` staging file first and renamed into place only once every row
//! has been written successfully, so a run that fails partway never
//! leaves a half-written file where a caller might mistake it for
//! complete output.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::patient::Patient;
use crate::visit::{visit_type_key, Visit};

pub const DEFAULT_CHUNK_ROWS: usize = 5_000;

/// Bumped whenever a column is added, removed, or reordered in any of the
/// three emitted datasets. Written into `run_metadata.csv` on every run so
/// a downstream reader can detect a layout it doesn't understand instead
/// of silently misparsing it.
pub const SCHEMA_VERSION: &str = "1";

/// Reported after every patient completes, so a caller can drive a
/// progress bar or cancel a long run between patients.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub patients_written: usize,
    pub visits_written: usize,
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

struct StagedWriter {
    staging_path: PathBuf,
    final_path: PathBuf,
    writer: BufWriter<File>,
    rows_since_flush: usize,
}

impl StagedWriter {
    fn create(final_path: PathBuf) -> Result<Self> {
        let staging_path = final_path.with_extension("csv.tmp");
        let file = File::create(&staging_path)?;
        Ok(Self {
            staging_path,
            final_path,
            writer: BufWriter::new(file),
            rows_since_flush: 0,
        })
    }

    fn write_row(&mut self, fields: &[String]) -> Result<()> {
        let line = fields.iter().map(|f| escape_csv_field(f)).collect::<Vec<_>>().join(",");
        writeln!(self.writer, "{line}")?;
        self.rows_since_flush += 1;
        if self.rows_since_flush >= DEFAULT_CHUNK_ROWS {
            self.writer.flush()?;
            self.rows_since_flush = 0;
        }
        Ok(())
    }

    fn finalize(mut self) -> Result<()> {
        self.writer.flush()?;
        drop(self.writer);
        fs::rename(&self.staging_path, &self.final_path)?;
        Ok(())
    }

    fn abort(self) {
        drop(self.writer);
        let _ = fs::remove_file(&self.staging_path);
    }
}

fn cost_breakdown(components: &BTreeMap<String, f64>) -> String {
    components.iter().map(|(k, v)| format!("{k}:{v}")).collect::<Vec<_>>().join(";")
}

fn resource_breakdown(components: &[crate::visit::ResourceRequirement]) -> String {
    components.iter().map(|r| format!("{}:{}", r.role, r.count)).collect::<Vec<_>>().join(";")
}

fn visit_header() -> Vec<String> {
    [
        "patient_id",
        "date",
        "time_days",
        "visit_type",
        "phase",
        "injection_given",
        "disease_state_after",
        "vision_after",
        "interval_days_to_next",
        "cost_total",
        "cost_breakdown",
        "resource_breakdown",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn visit_row(visit: &Visit) -> Vec<String> {
    vec![
        visit.patient_id.to_string(),
        visit.date.to_string(),
        visit.time_days.to_string(),
        visit_type_key(visit.visit_type),
        format!("{:?}", visit.phase),
        visit.injection_given.to_string(),
        format!("{:?}", visit.disease_state_after),
        visit.vision_after.to_string(),
        visit.interval_days_to_next.map(|d| d.to_string()).unwrap_or_default(),
        visit.cost_total.to_string(),
        cost_breakdown(&visit.cost_components),
        resource_breakdown(&visit.resource_components),
    ]
}

fn patient_header() -> Vec<String> {
    [
        "patient_id",
        "enrollment_date",
        "baseline_vision",
        "final_vision",
        "response_type",
        "total_injections",
        "total_cost",
        "visit_count",
        "discontinued",
        "discontinuation_category",
        "discontinuation_date",
        "terminated",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn patient_row(patient: &Patient) -> Vec<String> {
    let (category, date) = match patient.discontinuation() {
        Some(record) => (format!("{:?}", record.category), record.date.to_string()),
        None => (String::new(), String::new()),
    };
    vec![
        patient.id().to_string(),
        patient.enrollment_date().to_string(),
        patient.baseline_vision().to_string(),
        patient.current_vision().to_string(),
        patient.response_type().label().to_string(),
        patient.total_injections().to_string(),
        patient.total_cost().to_string(),
        patient.visits().len().to_string(),
        patient.is_discontinued().to_string(),
        category,
        date,
        patient.is_terminated().to_string(),
    ]
}

/// Owns the three staged output files (`visits.csv`, `patients.csv`,
/// `run_metadata.csv`) for one run.
pub struct ResultWriter {
    visits: StagedWriter,
    patients: StagedWriter,
    metadata: StagedWriter,
    patients_written: usize,
    visits_written: usize,
}

impl ResultWriter {
    pub fn create(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir)?;

        let mut visits = StagedWriter::create(output_dir.join("visits.csv"))?;
        visits.write_row(&visit_header())?;

        let mut patients = StagedWriter::create(output_dir.join("patients.csv"))?;
        patients.write_row(&patient_header())?;

        let mut metadata = StagedWriter::create(output_dir.join("run_metadata.csv"))?;
        metadata.write_row(&["key".to_string(), "value".to_string()])?;

        Ok(Self {
            visits,
            patients,
            metadata,
            patients_written: 0,
            visits_written: 0,
        })
    }

    pub fn write_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.metadata.write_row(&[key.to_string(), value.to_string()])
    }

    /// Writes every visit for one patient, then the patient's own summary
    /// row, and returns the running totals for a progress callback.
    pub fn write_patient(&mut self, patient: &Patient) -> Result<Progress> {
        for visit in patient.visits() {
            self.visits.write_row(&visit_row(visit))?;
            self.visits_written += 1;
        }
        self.patients.write_row(&patient_row(patient))?;
        self.patients_written += 1;

        Ok(Progress {
            patients_written: self.patients_written,
            visits_written: self.visits_written,
        })
    }

    pub fn finalize(self) -> Result<()> {
        self.visits.finalize()?;
        self.patients.finalize()?;
        self.metadata.finalize()?;
        Ok(())
    }

    /// Removes every staging file without renaming anything into place —
    /// used when a run is cancelled or fails before `finalize`.
    pub fn abort(self) {
        self.visits.abort();
        self.patients.abort();
        self.metadata.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use crate::vision::ResponseType;

    #[test]
    fn finalize_renames_staging_files_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ResultWriter::create(dir.path()).unwrap();
        writer.write_metadata("seed", "42").unwrap();

        let patient = Patient::new(
            crate::patient::PatientId::new(1),
            65,
            NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            ResponseType::Average,
            1.0,
        );
        let progress = writer.write_patient(&patient).unwrap();
        assert_eq!(progress.patients_written, 1);
        writer.finalize().unwrap();

        assert!(dir.path().join("visits.csv").exists());
        assert!(dir.path().join("patients.csv").exists());
        assert!(dir.path().join("run_metadata.csv").exists());
        assert!(!dir.path().join("visits.csv.tmp").exists());
    }

    #[test]
    fn abort_leaves_no_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::create(dir.path()).unwrap();
        writer.abort();
        assert!(!dir.path().join("visits.csv").exists());
        assert!(!dir.path().join("visits.csv.tmp").exists());
    }

    #[test]
    fn escapes_commas_and_quotes() {
        assert_eq!(escape_csv_field("plain"), "plain");
        assert_eq!(escape_csv_field("a,b"), "\"a,b\"");
        assert_eq!(escape_csv_field("a\"b"), "\"a\"\"b\"");
    }
}
