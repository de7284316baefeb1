//! Turning a scan result into task submissions.

use camino::{Utf8Path, Utf8PathBuf};

use crate::converter::ConversionParams;
use crate::manager::TaskSpec;
use crate::modality::Modality;
use crate::naming::OutputTemplate;
use crate::series::{ScanResult, Series};
use crate::types::SeriesUid;

/// One spec per discovered series, output paths rendered from the naming
/// template. `selected` restricts submission to the listed series.
pub fn generate_tasks(
    scan: &ScanResult,
    output_root: &Utf8Path,
    template: &OutputTemplate,
    selected: Option<&[SeriesUid]>,
    params: &ConversionParams,
) -> Vec<TaskSpec> {
    let mut specs = Vec::new();
    for series in scan.series_by_modality.values().flatten() {
        if selected.is_some_and(|uids| !uids.contains(&series.uid)) {
            continue;
        }
        let Some(modality) = Modality::from_tag(&series.modality) else {
            tracing::warn!(
                uid = series.uid.as_str(),
                tag = series.modality.as_str(),
                "series has no converter, skipping"
            );
            continue;
        };
        specs.push(TaskSpec {
            input: series_input(series),
            output: template.render(series, output_root),
            modality: Some(modality),
            params: params.clone(),
            priority: priority_of(modality, series.files.len()),
        });
    }
    tracing::info!(tasks = specs.len(), "generated conversion tasks");
    specs
}

/// Tomographic series run first, and bigger series edge ahead of smaller
/// ones so the long work starts early.
fn priority_of(modality: Modality, file_count: usize) -> i32 {
    let base = match modality {
        Modality::Ct | Modality::Mri => 10,
        Modality::Mammography | Modality::Radiotherapy => 0,
    };
    base + (file_count / 10).min(5) as i32
}

/// A lone file is passed directly; a multi-file series is passed as its
/// directory.
fn series_input(series: &Series) -> Utf8PathBuf {
    match series.files.as_slice() {
        [only] => only.clone(),
        files => files
            .first()
            .and_then(|f| f.parent())
            .map(|dir| dir.to_owned())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PatientId, StudyUid};

    fn series(uid: &str, modality: &str, files: &[&str]) -> Series {
        Series {
            uid: SeriesUid::from(uid),
            description: "desc".to_string(),
            modality: modality.to_string(),
            patient_id: PatientId::from("P1"),
            study_uid: StudyUid::from("1.9"),
            series_number: Some(1),
            acquisition_date: None,
            files: files.iter().map(Utf8PathBuf::from).collect(),
        }
    }

    fn scan_with(series_list: Vec<Series>) -> ScanResult {
        let mut scan = ScanResult::default();
        for s in series_list {
            scan.series_by_modality
                .entry(s.modality.clone())
                .or_default()
                .push(s);
        }
        scan
    }

    #[test]
    fn test_ct_outranks_mammography_and_size_breaks_ties() {
        let files: Vec<String> = (0..30).map(|i| format!("/d/ct/{i}.dcm")).collect();
        let file_refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let scan = scan_with(vec![
            series("1.1", "CT", &file_refs),
            series("1.2", "MG", &["/d/mg/a.dcm"]),
        ]);
        let specs = generate_tasks(
            &scan,
            Utf8Path::new("/out"),
            &OutputTemplate::default(),
            None,
            &ConversionParams::default(),
        );
        let by_uid = |m: Modality| specs.iter().find(|s| s.modality == Some(m)).unwrap();
        assert_eq!(by_uid(Modality::Ct).priority, 13);
        assert_eq!(by_uid(Modality::Mammography).priority, 0);
    }

    #[test]
    fn test_size_bonus_is_capped() {
        assert_eq!(priority_of(Modality::Ct, 1000), 15);
        assert_eq!(priority_of(Modality::Radiotherapy, 1000), 5);
    }

    #[test]
    fn test_selected_uids_restrict_submission() {
        let scan = scan_with(vec![
            series("1.1", "CT", &["/d/a/1.dcm", "/d/a/2.dcm"]),
            series("1.2", "CT", &["/d/b/1.dcm", "/d/b/2.dcm"]),
        ]);
        let wanted = [SeriesUid::from("1.2")];
        let specs = generate_tasks(
            &scan,
            Utf8Path::new("/out"),
            &OutputTemplate::default(),
            Some(&wanted),
            &ConversionParams::default(),
        );
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].input, Utf8PathBuf::from("/d/b"));
    }

    #[test]
    fn test_single_file_series_passes_the_file() {
        let scan = scan_with(vec![series("1.3", "RTSTRUCT", &["/d/rt/rs.dcm"])]);
        let specs = generate_tasks(
            &scan,
            Utf8Path::new("/out"),
            &OutputTemplate::default(),
            None,
            &ConversionParams::default(),
        );
        assert_eq!(specs[0].input, Utf8PathBuf::from("/d/rt/rs.dcm"));
        assert_eq!(specs[0].modality, Some(Modality::Radiotherapy));
    }

    #[test]
    fn test_output_path_comes_from_template() {
        let scan = scan_with(vec![series("1.1", "CT", &["/d/a/1.dcm", "/d/a/2.dcm"])]);
        let specs = generate_tasks(
            &scan,
            Utf8Path::new("/out"),
            &OutputTemplate::default(),
            None,
            &ConversionParams::default(),
        );
        assert_eq!(specs[0].output, Utf8PathBuf::from("/out/P1/S001_desc.nii.gz"));
    }
}
