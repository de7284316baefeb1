//! Series records and the result of one scan pass.

use std::collections::{BTreeSet, HashMap};

use camino::Utf8PathBuf;

use crate::sanitize::sanitize;
use crate::types::{PatientId, SeriesUid, StudyUid};

/// One acquisition: the set of slice files sharing a series UID.
/// Built once during a scan pass and immutable afterwards; dimension
/// agreement between its files is checked later, at validation time.
#[derive(Debug, Clone)]
pub struct Series {
    pub uid: SeriesUid,
    pub description: String,
    pub modality: String,
    pub patient_id: PatientId,
    pub study_uid: StudyUid,
    pub series_number: Option<i32>,
    pub acquisition_date: Option<time::Date>,
    pub files: Vec<Utf8PathBuf>,
}

impl Series {
    /// Display name used in output paths, `S{number:03}_{description}`.
    /// Falls back to the modality when the description is empty.
    pub fn series_name(&self) -> String {
        let mut parts = Vec::new();
        if let Some(number) = self.series_number {
            parts.push(format!("S{number:03}"));
        }
        if self.description.trim().is_empty() {
            parts.push(self.modality.clone());
        } else {
            parts.push(sanitize(self.description.trim()));
        }
        parts.join("_")
    }
}

/// Per-patient aggregate built up during a scan.
#[derive(Debug, Clone, Default)]
pub struct PatientSummary {
    pub studies: BTreeSet<StudyUid>,
    pub modalities: BTreeSet<String>,
    pub series_count: usize,
}

/// Everything one call to [`SeriesScanner::scan`](crate::SeriesScanner::scan)
/// produced. Warnings are per-file and non-fatal; the scan always runs to
/// completion.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub total_files: usize,
    pub valid_files: usize,
    pub patients: HashMap<PatientId, PatientSummary>,
    pub series_by_modality: HashMap<String, Vec<Series>>,
    pub warnings: Vec<String>,
}

impl ScanResult {
    pub fn total_series(&self) -> usize {
        self.series_by_modality.values().map(Vec::len).sum()
    }

    /// One-line summary for the log.
    pub fn summary(&self) -> String {
        format!(
            "{} of {} files valid, {} series across {} patients, {} warnings",
            self.valid_files,
            self.total_files,
            self.total_series(),
            self.patients.len(),
            self.warnings.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(number: Option<i32>, description: &str, modality: &str) -> Series {
        Series {
            uid: SeriesUid::from("1.2.3"),
            description: description.to_string(),
            modality: modality.to_string(),
            patient_id: PatientId::from("P1"),
            study_uid: StudyUid::from("1.2"),
            series_number: number,
            acquisition_date: None,
            files: vec![],
        }
    }

    #[test]
    fn test_series_name_with_number_and_description() {
        assert_eq!(
            series(Some(3), "Ax T1 post", "MR").series_name(),
            "S003_Ax_T1_post"
        );
    }

    #[test]
    fn test_series_name_falls_back_to_modality() {
        assert_eq!(series(None, "  ", "CT").series_name(), "CT");
    }
}
