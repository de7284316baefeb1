//! Engine settings, configurable using environment variables.

use std::num::NonZeroUsize;

use camino::Utf8PathBuf;
use serde::Deserialize;

use crate::modality::KeywordTables;
use crate::naming::DEFAULT_TEMPLATE;

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Directory scanned for DICOM series.
    pub input_root: Utf8PathBuf,
    /// Directory the converted volumes are written under.
    pub output_root: Utf8PathBuf,
    #[serde(default = "default_workers")]
    pub workers: NonZeroUsize,
    /// Comma-separated modality tags the scanner keeps.
    #[serde(default = "default_modalities")]
    pub modalities: String,
    #[serde(default = "default_template")]
    pub naming_template: String,
    #[serde(default = "default_scan_depth")]
    pub scan_depth: usize,
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Finished task records kept in memory after cleanup.
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
    /// Per-modality detection keyword tables, replacing the built-in ones
    /// when set.
    #[serde(default)]
    pub keywords: KeywordTables,
}

impl Settings {
    pub fn allowed_modalities(&self) -> Vec<String> {
        self.modalities
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn default_workers() -> NonZeroUsize {
    NonZeroUsize::new(4).unwrap()
}

fn default_modalities() -> String {
    "CT,CBCT,MR,MRI,MG,RT,RTSTRUCT".to_string()
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_scan_depth() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_keep_recent() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("CT,MR", &["CT", "MR"])]
    #[case(" CT , MR ,", &["CT", "MR"])]
    #[case("", &[])]
    fn test_modality_list_parsing(#[case] given: &str, #[case] expected: &[&str]) {
        let settings = Settings {
            input_root: "/in".into(),
            output_root: "/out".into(),
            workers: default_workers(),
            modalities: given.to_string(),
            naming_template: default_template(),
            scan_depth: default_scan_depth(),
            recursive: true,
            keep_recent: default_keep_recent(),
            keywords: KeywordTables::default(),
        };
        assert_eq!(settings.allowed_modalities(), expected);
    }

    #[test]
    fn test_keyword_tables_default_when_unset() {
        let settings: Settings = figment::Figment::from(figment::providers::Serialized::defaults(
            std::collections::HashMap::from([("input_root", "/in"), ("output_root", "/out")]),
        ))
        .extract()
        .unwrap();
        assert!(
            !settings.keywords.0.is_empty(),
            "built-in keyword tables apply when none are configured"
        );
    }
}
