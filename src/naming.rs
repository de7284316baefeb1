//! Output path rendering from a naming template.

use camino::{Utf8Path, Utf8PathBuf};
use time::macros::format_description;

use crate::sanitize::sanitize;
use crate::series::Series;

pub const DEFAULT_TEMPLATE: &str = "{patient_id}/{series_name}";

/// An output naming template with substitutable tokens:
/// `{patient_id}`, `{study_uid}`, `{series_uid}`, `{series_name}`,
/// `{series_number}`, `{modality}`, `{study_date}`.
///
/// A template referencing an unknown token falls back to the deterministic
/// default, `{patient_id}/{series_name}`.
#[derive(Debug, Clone)]
pub struct OutputTemplate(String);

impl OutputTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Render the output path for one series under `output_root`.
    /// `.nii.gz` is appended when the rendered name carries no extension.
    pub fn render(&self, series: &Series, output_root: &Utf8Path) -> Utf8PathBuf {
        let relative = match substitute(&self.0, series) {
            Ok(rendered) => rendered,
            Err(token) => {
                tracing::warn!(token = token.as_str(), template = self.0.as_str(), "unknown template token");
                substitute(DEFAULT_TEMPLATE, series)
                    .unwrap_or_else(|_| unreachable!("default template has known tokens"))
            }
        };
        let path = output_root.join(relative);
        if path.as_str().ends_with(".nii") || path.as_str().ends_with(".nii.gz") {
            path
        } else {
            Utf8PathBuf::from(format!("{path}.nii.gz"))
        }
    }
}

impl Default for OutputTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

/// Expand `{token}` occurrences; returns the offending token on failure.
fn substitute(template: &str, series: &Series) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let Some(len) = rest[start..].find('}') else {
            // Unbalanced brace: keep the literal text.
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let token = &rest[start + 1..start + len];
        out.push_str(&expand(token, series).ok_or_else(|| token.to_string())?);
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn expand(token: &str, series: &Series) -> Option<String> {
    let value = match token {
        "patient_id" => sanitize(series.patient_id.as_str()),
        // UIDs are unwieldy in paths; keep the leading 8 characters.
        "study_uid" => short_uid(series.study_uid.as_str()),
        "series_uid" => short_uid(series.uid.as_str()),
        "series_name" => series.series_name(),
        "series_number" => match series.series_number {
            Some(number) => format!("S{number:03}"),
            None => "S000".to_string(),
        },
        "modality" => series.modality.clone(),
        "study_date" => series
            .acquisition_date
            .and_then(|d| d.format(format_description!("[year][month][day]")).ok())
            .unwrap_or_else(|| "unknown".to_string()),
        _ => return None,
    };
    Some(value)
}

fn short_uid(uid: &str) -> String {
    sanitize(uid.chars().take(8).collect::<String>().trim_matches('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PatientId, SeriesUid, StudyUid};
    use pretty_assertions::assert_eq;
    use time::macros::date;

    fn series() -> Series {
        Series {
            uid: SeriesUid::from("1.2.840.10008.999"),
            description: "Ax T1".to_string(),
            modality: "MR".to_string(),
            patient_id: PatientId::from("P 01"),
            study_uid: StudyUid::from("1.2.840.4"),
            series_number: Some(7),
            acquisition_date: Some(date!(2024 - 05 - 17)),
            files: vec![],
        }
    }

    #[test]
    fn test_render_all_tokens() {
        let template =
            OutputTemplate::new("{patient_id}/{study_date}/{modality}_{series_number}_{series_name}");
        let path = template.render(&series(), Utf8Path::new("/out"));
        assert_eq!(path, "/out/P_01/20240517/MR_S007_S007_Ax_T1.nii.gz");
    }

    #[test]
    fn test_uid_tokens_are_shortened() {
        let template = OutputTemplate::new("{study_uid}/{series_uid}");
        let path = template.render(&series(), Utf8Path::new("/out"));
        assert_eq!(path, "/out/1.2.840/1.2.840.nii.gz");
    }

    #[test]
    fn test_unknown_token_falls_back_to_default() {
        let template = OutputTemplate::new("{nope}/{series_name}");
        let path = template.render(&series(), Utf8Path::new("/out"));
        assert_eq!(path, "/out/P_01/S007_Ax_T1.nii.gz");
    }

    #[test]
    fn test_extension_in_template_is_kept() {
        let template = OutputTemplate::new("{patient_id}/volume.nii");
        let path = template.render(&series(), Utf8Path::new("/out"));
        assert_eq!(path, "/out/P_01/volume.nii");
    }
}
