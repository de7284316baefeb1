//! Directory scanning: discover slice files, group them into series and
//! summarize what was found. Scan problems are warnings, never fatal.

use std::collections::{HashMap, HashSet};
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::reader::{SeriesReader, SliceHeader};
use crate::series::{PatientSummary, ScanResult, Series};
use crate::types::{PatientId, SeriesUid};

/// File extensions accepted without sniffing. Extensionless files are
/// checked for the DICM magic bytes instead.
const SLICE_EXTENSIONS: [&str; 3] = ["dcm", "dicom", "ima"];

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub recursive: bool,
    pub max_depth: usize,
    pub patient_filter: Option<Vec<PatientId>>,
    /// Modality tag strings, compared case-insensitively.
    pub modality_filter: Option<Vec<String>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            max_depth: 10,
            patient_filter: None,
            modality_filter: None,
        }
    }
}

/// Walks a directory tree and groups slice files into [Series] records.
/// Holds no state across calls.
pub struct SeriesScanner<'a> {
    reader: &'a dyn SeriesReader,
    allowed_modalities: HashSet<String>,
}

impl<'a> SeriesScanner<'a> {
    pub fn new(reader: &'a dyn SeriesReader, allowed_modalities: &[String]) -> Self {
        Self {
            reader,
            allowed_modalities: allowed_modalities
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
        }
    }

    pub fn scan(&self, root: &Utf8Path, options: &ScanOptions) -> std::io::Result<ScanResult> {
        fs_err::metadata(root)?;
        tracing::info!(root = root.as_str(), "scanning directory");

        let mut result = ScanResult::default();
        let mut grouped: HashMap<SeriesUid, Vec<(Utf8PathBuf, SliceHeader)>> = HashMap::new();
        // Grouping order is walk order; keep it stable.
        let mut group_order: Vec<SeriesUid> = Vec::new();

        for path in self.candidate_files(root, options) {
            result.total_files += 1;
            let header = match self.reader.read_header(&path) {
                Ok(header) => header,
                Err(e) => {
                    result.warnings.push(format!("{path}: {e}"));
                    continue;
                }
            };
            if header.series_uid.as_str().is_empty()
                || header.modality.is_empty()
                || header.patient_id.as_str().is_empty()
                || header.study_uid.as_str().is_empty()
            {
                result
                    .warnings
                    .push(format!("{path}: missing required header fields"));
                continue;
            }
            result.valid_files += 1;

            if let Some(patients) = &options.patient_filter {
                if !patients.contains(&header.patient_id) {
                    continue;
                }
            }
            if let Some(modalities) = &options.modality_filter {
                if !modalities
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(&header.modality))
                {
                    continue;
                }
            }
            // Outside the allow-list: dropped from grouping, still counted
            // in the totals above.
            if !self
                .allowed_modalities
                .contains(&header.modality.to_ascii_uppercase())
            {
                continue;
            }

            let entry = grouped.entry(header.series_uid.clone()).or_default();
            if entry.is_empty() {
                group_order.push(header.series_uid.clone());
            }
            entry.push((path, header));
        }

        for uid in group_order {
            let files = grouped.remove(&uid).unwrap_or_default();
            let Some((_, first)) = files.first() else {
                continue;
            };
            let series = Series {
                uid,
                description: first.series_description.clone(),
                modality: first.modality.to_ascii_uppercase(),
                patient_id: first.patient_id.clone(),
                study_uid: first.study_uid.clone(),
                series_number: first.series_number,
                acquisition_date: first.acquisition_date,
                files: files.iter().map(|(path, _)| path.clone()).collect(),
            };

            let patient = result.patients.entry(series.patient_id.clone()).or_insert_with(
                PatientSummary::default,
            );
            patient.studies.insert(series.study_uid.clone());
            patient.modalities.insert(series.modality.clone());
            patient.series_count += 1;

            result
                .series_by_modality
                .entry(series.modality.clone())
                .or_default()
                .push(series);
        }

        tracing::info!(summary = %result.summary(), "scan finished");
        Ok(result)
    }

    /// Depth-bounded walk yielding files that look like slice files.
    /// Unreadable directory entries become warnings at the caller; here they
    /// are simply skipped.
    fn candidate_files(&self, root: &Utf8Path, options: &ScanOptions) -> Vec<Utf8PathBuf> {
        let max_depth = if options.recursive {
            options.max_depth.max(1)
        } else {
            1
        };
        WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
            .filter(|path| is_candidate(path))
            .collect()
    }
}

pub(crate) fn is_candidate(path: &Utf8Path) -> bool {
    // UID-named files have dot-separated numeric "extensions"; anything
    // without a known extension gets the magic check.
    match path.extension() {
        Some(ext) if SLICE_EXTENSIONS
            .iter()
            .any(|known| ext.eq_ignore_ascii_case(known)) =>
        {
            true
        }
        _ => has_dicm_magic(path),
    }
}

/// DICOM part-10 files carry "DICM" at offset 128.
fn has_dicm_magic(path: &Utf8Path) -> bool {
    let Ok(mut file) = fs_err::File::open(path) else {
        return false;
    };
    let mut preamble = [0u8; 132];
    if file.read_exact(&mut preamble).is_err() {
        return false;
    }
    &preamble[128..132] == b"DICM"
}
