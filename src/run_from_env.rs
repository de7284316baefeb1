//! Wires the whole engine together: scan, generate tasks, convert, report.

use std::sync::Arc;

use crate::batch;
use crate::config::get_config;
use crate::converter::ConversionParams;
use crate::dicom_file::DicomFileReader;
use crate::manager::{Collaborators, ConversionManager};
use crate::naming::OutputTemplate;
use crate::scanner::{ScanOptions, SeriesScanner};
use crate::settings::Settings;
use crate::transform::NoopTransform;
use crate::volume::NiftiVolumeWriter;

/// Runs one batch conversion using configuration from environment
/// variables (`DICOM2NII_` prefix).
pub fn run_from_env() -> anyhow::Result<()> {
    let settings: Settings = get_config().extract()?;
    run_batch(&settings)
}

pub fn run_batch(settings: &Settings) -> anyhow::Result<()> {
    let reader = Arc::new(DicomFileReader);
    let allowed = settings.allowed_modalities();

    let scan = SeriesScanner::new(reader.as_ref(), &allowed).scan(
        &settings.input_root,
        &ScanOptions {
            recursive: settings.recursive,
            max_depth: settings.scan_depth,
            patient_filter: None,
            modality_filter: None,
        },
    )?;
    for warning in &scan.warnings {
        tracing::warn!(warning = warning.as_str(), "scan warning");
    }

    let template = OutputTemplate::new(settings.naming_template.as_str());
    let specs = batch::generate_tasks(
        &scan,
        &settings.output_root,
        &template,
        None,
        &ConversionParams::default(),
    );
    if specs.is_empty() {
        tracing::info!("no convertible series found");
        return Ok(());
    }
    let total = specs.len();

    let mut manager = ConversionManager::new(
        settings.workers,
        Collaborators {
            reader: reader.clone(),
            structures: reader,
            writer: Arc::new(NiftiVolumeWriter),
            transform: Arc::new(NoopTransform),
        },
        settings.keywords.clone(),
    );
    manager.on_completion(|task| {
        tracing::info!(task = %task.id, status = ?task.status, output = task.output.as_str(), "task finished");
    });
    manager.add_batch(specs);
    manager.wait_for_completion(None);

    let stats = manager.statistics();
    manager.cleanup_completed(settings.keep_recent);
    tracing::info!(
        total,
        completed = stats.completed,
        failed = stats.failed,
        cancelled = stats.cancelled,
        average_seconds = stats.average_time_per_task.as_secs_f64(),
        "batch finished"
    );
    manager.shutdown();

    if stats.failed > 0 {
        anyhow::bail!("{} of {total} conversion tasks failed", stats.failed);
    }
    Ok(())
}
