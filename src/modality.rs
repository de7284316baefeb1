//! Modality detection and converter routing.

use std::collections::HashMap;

use crate::converter::Converter;
use crate::ct::CtConverter;
use crate::error::TaskError;
use crate::mammography::MammographyConverter;
use crate::mri::MriConverter;
use crate::rtstruct::RtStructConverter;

/// The closed set of supported conversion targets. New modalities are added
/// here and in the routing table, not by subclassing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    Ct,
    Mri,
    Mammography,
    Radiotherapy,
}

impl Modality {
    /// All modalities, in detection precedence order.
    pub const ALL: [Modality; 4] = [
        Modality::Ct,
        Modality::Mri,
        Modality::Mammography,
        Modality::Radiotherapy,
    ];

    /// Resolve an explicit modality tag from header metadata.
    pub fn from_tag(tag: &str) -> Option<Modality> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "CT" | "CBCT" => Some(Modality::Ct),
            "MR" | "MRI" => Some(Modality::Mri),
            "MG" => Some(Modality::Mammography),
            "RT" | "RTSTRUCT" | "RTPLAN" | "RTDOSE" => Some(Modality::Radiotherapy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Ct => "CT",
            Modality::Mri => "MRI",
            Modality::Mammography => "MG",
            Modality::Radiotherapy => "RT",
        }
    }

    /// Route to the converter implementing this modality's pipeline.
    pub fn converter(&self) -> Box<dyn Converter> {
        match self {
            Modality::Ct => Box::new(CtConverter),
            Modality::Mri => Box::new(MriConverter),
            Modality::Mammography => Box::new(MammographyConverter),
            Modality::Radiotherapy => Box::new(RtStructConverter),
        }
    }
}

/// Per-modality detection keywords, matched against path and description
/// tokens. Configurable through [`Settings`](crate::settings::Settings);
/// these defaults mirror the supported acquisition protocols.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(transparent)]
pub struct KeywordTables(pub HashMap<Modality, Vec<String>>);

impl Default for KeywordTables {
    fn default() -> Self {
        let mut map = HashMap::new();
        let insert = |map: &mut HashMap<_, _>, m: Modality, words: &[&str]| {
            map.insert(m, words.iter().map(|w| w.to_string()).collect());
        };
        insert(&mut map, Modality::Ct, &["CT", "HEAD-CT"]);
        insert(
            &mut map,
            Modality::Mri,
            &["MRI", "MR", "DCE", "DWI", "ADC", "T1", "T2", "FLAIR"],
        );
        insert(
            &mut map,
            Modality::Mammography,
            &["MG", "MAMMOGRAPHY", "BREAST", "MLO", "CC"],
        );
        insert(
            &mut map,
            Modality::Radiotherapy,
            &["RT", "RTSTRUCT", "RTPLAN", "RTDOSE"],
        );
        Self(map)
    }
}

impl KeywordTables {
    /// First modality (in [`Modality::ALL`] order) with a keyword matching
    /// a token of `text`. Tokens are compared whole, so "RTSTRUCT" does not
    /// trip the "CT" keyword.
    fn keyword_match(&self, text: &str) -> Option<Modality> {
        let upper = text.to_ascii_uppercase();
        let tokens: Vec<&str> = upper
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .filter(|t| !t.is_empty())
            .collect();
        for modality in Modality::ALL {
            let Some(keywords) = self.0.get(&modality) else {
                continue;
            };
            for keyword in keywords {
                let hit = tokens
                    .iter()
                    .any(|t| *t == keyword || t.split('-').any(|sub| sub == keyword));
                if hit {
                    return Some(modality);
                }
            }
        }
        None
    }
}

/// Deterministic detection precedence: explicit header tag, then path
/// keywords, then descriptive header fields. Failure at every step is an
/// [`TaskError::UnsupportedModality`].
pub fn detect(
    explicit_tag: Option<&str>,
    path: &str,
    descriptions: &[&str],
    tables: &KeywordTables,
) -> Result<Modality, TaskError> {
    if let Some(modality) = explicit_tag.and_then(Modality::from_tag) {
        return Ok(modality);
    }
    if let Some(modality) = tables.keyword_match(path) {
        return Ok(modality);
    }
    for description in descriptions {
        if let Some(modality) = tables.keyword_match(description) {
            return Ok(modality);
        }
    }
    Err(TaskError::UnsupportedModality(format!(
        "could not detect modality of {path}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/data/patient1/HEAD-CT/slice001.dcm", Modality::Ct)]
    #[case("/data/p2/ax_T1_post/1.dcm", Modality::Mri)]
    #[case("/data/p3/L-MLO/img.dcm", Modality::Mammography)]
    #[case("/data/p4/RTSTRUCT/rs.dcm", Modality::Radiotherapy)]
    fn test_detect_from_path(#[case] path: &str, #[case] expected: Modality) {
        let got = detect(None, path, &[], &KeywordTables::default()).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_explicit_tag_wins_over_path() {
        let got = detect(
            Some("MR"),
            "/data/CT/file.dcm",
            &[],
            &KeywordTables::default(),
        )
        .unwrap();
        assert_eq!(got, Modality::Mri);
    }

    #[test]
    fn test_rtstruct_token_does_not_trip_ct() {
        let got = detect(
            None,
            "/incoming/rtstruct/file.dcm",
            &[],
            &KeywordTables::default(),
        )
        .unwrap();
        assert_eq!(got, Modality::Radiotherapy);
    }

    #[test]
    fn test_description_is_last_resort() {
        let got = detect(
            None,
            "/incoming/series9/file0.dcm",
            &["Breast screening"],
            &KeywordTables::default(),
        )
        .unwrap();
        assert_eq!(got, Modality::Mammography);
    }

    #[test]
    fn test_detection_failure_is_unsupported_modality() {
        let err = detect(None, "/incoming/unknown", &[], &KeywordTables::default()).unwrap_err();
        assert!(matches!(err, TaskError::UnsupportedModality(_)));
    }

    #[test]
    fn test_keyword_tables_deserialize_from_config() {
        let mut map = HashMap::new();
        map.insert(Modality::Ct, vec!["PSEUDOCT".to_string()]);
        let tables: KeywordTables =
            figment::Figment::from(figment::providers::Serialized::defaults(map))
                .extract()
                .unwrap();
        let got = detect(None, "/incoming/PSEUDOCT/file.dcm", &[], &tables).unwrap();
        assert_eq!(got, Modality::Ct);
        assert!(
            detect(None, "/incoming/HEAD-CT/f.dcm", &[], &tables).is_err(),
            "configured tables replace the defaults"
        );
    }

    #[test]
    fn test_unknown_tag_falls_through_to_keywords() {
        let got = detect(
            Some("US"),
            "/incoming/DWI/file.dcm",
            &[],
            &KeywordTables::default(),
        )
        .unwrap();
        assert_eq!(got, Modality::Mri);
    }
}
