//! The conversion pipeline contract shared by every modality converter,
//! plus the helpers they all lean on: slice ordering, geometry validation
//! and volume stacking.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use ndarray::{Array3, s};
use regex::Regex;

use crate::contour::Structure;
use crate::error::TaskError;
use crate::modality::Modality;
use crate::preprocess;
use crate::reader::{ReadError, SeriesReader, SliceHeader};
use crate::scanner::is_candidate;
use crate::transform::{Interpolation, Normalization, Transform};
use crate::volume::{Affine, Volume, VolumeWriter};

/// Reads named regions-of-interest out of a structure set file.
pub trait StructureSetSource: Send + Sync {
    fn read_structures(&self, path: &Utf8Path) -> Result<Vec<Structure>, ReadError>;
}

/// The collaborators a converter works against.
pub struct PipelineEnv<'a> {
    pub reader: &'a dyn SeriesReader,
    pub structures: &'a dyn StructureSetSource,
    pub writer: &'a dyn VolumeWriter,
    pub transform: &'a dyn Transform,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Discretization {
    FixedWidth(f64),
    FixedCount(u32),
}

/// Free-form conversion parameters carried by each task.
#[derive(Debug, Clone)]
pub struct ConversionParams {
    pub apply_rescale: bool,
    pub orientation_correction: bool,
    /// Mammography only; ignored elsewhere.
    pub scrub_edges: bool,
    pub target_spacing: Option<[f64; 3]>,
    pub interpolation: Interpolation,
    /// MRI only; ignored elsewhere.
    pub bias_field_correction: bool,
    pub normalization: Option<Normalization>,
    pub discretization: Option<Discretization>,
    /// Series whose grid structure-set masks are rasterized onto, usually
    /// the planning CT. Without one, masks get a bounding grid derived from
    /// the contour points.
    pub reference_series: Option<Utf8PathBuf>,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            apply_rescale: true,
            orientation_correction: true,
            scrub_edges: true,
            target_spacing: None,
            interpolation: Interpolation::Linear,
            bias_field_correction: false,
            normalization: None,
            discretization: None,
            reference_series: None,
        }
    }
}

/// Per-series metadata from the reference (first ordered) file.
#[derive(Debug, Clone)]
pub struct SeriesMetadata {
    pub rows: u32,
    pub columns: u32,
    /// Row and column spacing in millimeters.
    pub pixel_spacing: [f64; 2],
    pub slice_spacing: f64,
    pub orientation: Option<[f64; 6]>,
    pub position_z: f64,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    pub modality_tag: String,
    pub description: String,
}

impl SeriesMetadata {
    /// Affine for a volume of this geometry, after any respacing.
    pub fn affine(&self, spacing: [f64; 3]) -> Affine {
        let origin = [0.0, 0.0, self.position_z];
        match self.orientation {
            // Volume spacing is (column, row, slice); the orientation
            // constructor wants (row, column) in-plane spacing.
            Some(orientation) => {
                Affine::from_orientation(orientation, [spacing[1], spacing[0]], spacing[2], origin)
            }
            None => Affine::from_spacing(spacing, origin),
        }
    }
}

/// Progress sink and cancellation flag for one running task. Cancellation
/// is cooperative: the pipeline polls [`ConversionContext::checkpoint`]
/// between stages.
pub struct ConversionContext<'a> {
    progress: &'a (dyn Fn(f32, &str) + 'a),
    cancelled: &'a AtomicBool,
}

impl<'a> ConversionContext<'a> {
    pub fn new(progress: &'a (dyn Fn(f32, &str) + 'a), cancelled: &'a AtomicBool) -> Self {
        Self {
            progress,
            cancelled,
        }
    }

    pub fn report(&self, fraction: f32, message: &str) {
        (self.progress)(fraction.clamp(0.0, 1.0), message);
    }

    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.cancelled.load(Ordering::Relaxed) {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One modality's implementation of the conversion pipeline. The default
/// methods implement the common multi-slice behavior; variants override
/// the stages that differ.
pub trait Converter: Send {
    fn modality(&self) -> Modality;

    /// Ordered slice files for the input (a series directory or a single
    /// file). Ordered by instance number, falling back to the last integer
    /// token of the filename; ties keep input order.
    fn discover_files(
        &self,
        env: &PipelineEnv,
        input: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, TaskError> {
        let files = list_slice_files(input)?;
        Ok(order_slices(env.reader, files))
    }

    /// Every file after the first must match the reference dimensions and,
    /// when present, pixel spacing within a small tolerance.
    fn validate(&self, env: &PipelineEnv, files: &[Utf8PathBuf]) -> Result<(), TaskError> {
        validate_geometry(env.reader, files)
    }

    fn extract_metadata(
        &self,
        env: &PipelineEnv,
        files: &[Utf8PathBuf],
    ) -> Result<SeriesMetadata, TaskError> {
        extract_metadata(env.reader, files)
    }

    /// Stack per-file grids into a volume, applying
    /// `pixel * slope + intercept` when rescale is enabled.
    fn build_volume(
        &self,
        env: &PipelineEnv,
        files: &[Utf8PathBuf],
        meta: &SeriesMetadata,
        params: &ConversionParams,
    ) -> Result<Volume, TaskError> {
        stack_slices(env.reader, files, meta, params)
    }

    /// Modality orientation rule; identity by default.
    fn orientation_correct(&self, volume: Volume, _meta: &SeriesMetadata) -> Volume {
        volume
    }

    /// The fixed preprocessing order: orientation correction, edge
    /// scrubbing, resampling, bias-field correction, normalization,
    /// discretization.
    fn preprocess(
        &self,
        env: &PipelineEnv,
        mut volume: Volume,
        meta: &SeriesMetadata,
        params: &ConversionParams,
        ctx: &ConversionContext,
    ) -> Result<Volume, TaskError> {
        if params.orientation_correction {
            volume = self.orientation_correct(volume, meta);
        }
        if params.scrub_edges && self.modality() == Modality::Mammography {
            preprocess::scrub_edges(&mut volume);
        }
        ctx.checkpoint()?;
        if let Some(target) = params.target_spacing {
            volume = env
                .transform
                .resample(volume, target, params.interpolation)
                .map_err(|e| TaskError::Conversion(e.to_string()))?;
        }
        if params.bias_field_correction && self.modality() == Modality::Mri {
            volume = env
                .transform
                .bias_field_correct(volume)
                .map_err(|e| TaskError::Conversion(e.to_string()))?;
        }
        if let Some(method) = params.normalization {
            volume = env
                .transform
                .normalize(volume, method)
                .map_err(|e| TaskError::Conversion(e.to_string()))?;
        }
        ctx.checkpoint()?;
        match params.discretization {
            Some(Discretization::FixedWidth(width)) => {
                preprocess::discretize_fixed_width(&mut volume.data, width)
            }
            Some(Discretization::FixedCount(bins)) => {
                preprocess::discretize_fixed_count(&mut volume.data, bins)
            }
            None => {}
        }
        Ok(volume)
    }

    fn persist(
        &self,
        env: &PipelineEnv,
        volume: &Volume,
        meta: &SeriesMetadata,
        output: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, TaskError> {
        let affine = meta.affine(volume.spacing);
        env.writer.write(volume, &affine, output)?;
        Ok(vec![output.to_owned()])
    }

    /// Drive the whole pipeline for one task, reporting coarse progress and
    /// polling cancellation between stages.
    fn convert(
        &self,
        env: &PipelineEnv,
        input: &Utf8Path,
        output: &Utf8Path,
        params: &ConversionParams,
        ctx: &ConversionContext,
    ) -> Result<Vec<Utf8PathBuf>, TaskError> {
        ctx.report(0.0, "discovering slice files");
        let files = self.discover_files(env, input)?;
        if files.is_empty() {
            return Err(TaskError::Conversion(format!(
                "no slice files found under {input}"
            )));
        }
        ctx.checkpoint()?;
        ctx.report(0.2, "validating geometry");
        self.validate(env, &files)?;
        ctx.checkpoint()?;
        ctx.report(0.4, "extracting metadata");
        let meta = self.extract_metadata(env, &files)?;
        ctx.checkpoint()?;
        ctx.report(0.6, "building volume");
        let volume = self.build_volume(env, &files, &meta, params)?;
        ctx.checkpoint()?;
        ctx.report(0.8, "preprocessing");
        let volume = self.preprocess(env, volume, &meta, params, ctx)?;
        ctx.checkpoint()?;
        let outputs = self.persist(env, &volume, &meta, output)?;
        ctx.report(1.0, "conversion complete");
        Ok(outputs)
    }
}

/// Files under `input` that look like slice files; `input` may also be a
/// single file. One directory level, walk order by name.
pub(crate) fn list_slice_files(input: &Utf8Path) -> Result<Vec<Utf8PathBuf>, TaskError> {
    let metadata = fs_err::metadata(input)?;
    if metadata.is_file() {
        return Ok(vec![input.to_owned()]);
    }
    let mut files = Vec::new();
    for entry in fs_err::read_dir(input)? {
        let entry = entry?;
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        if entry.file_type()?.is_file() && is_candidate(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Stable sort by instance number with the filename fallback, so ties keep
/// input order.
pub(crate) fn order_slices(reader: &dyn SeriesReader, files: Vec<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut keyed: Vec<(i64, Utf8PathBuf)> = files
        .into_iter()
        .map(|path| {
            let key = reader
                .read_header(&path)
                .ok()
                .and_then(|h| h.instance_number.map(i64::from))
                .or_else(|| last_integer_token(&path))
                .unwrap_or(0);
            (key, path)
        })
        .collect();
    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, path)| path).collect()
}

/// The last integer-like token of the file stem, e.g. `slice_012.dcm` -> 12.
fn last_integer_token(path: &Utf8Path) -> Option<i64> {
    static INTEGER_RE: OnceLock<Regex> = OnceLock::new();
    let re = INTEGER_RE.get_or_init(|| Regex::new(r"\d+").unwrap());
    let stem = path.file_stem()?;
    re.find_iter(stem).last()?.as_str().parse().ok()
}

pub(crate) fn validate_geometry(
    reader: &dyn SeriesReader,
    files: &[Utf8PathBuf],
) -> Result<(), TaskError> {
    const SPACING_TOLERANCE: f64 = 1e-6;
    let Some(first) = files.first() else {
        return Err(TaskError::Validation("empty file list".to_string()));
    };
    let reference = reader.read_header(first)?;
    for path in &files[1..] {
        let header = reader.read_header(path)?;
        if header.rows != reference.rows || header.columns != reference.columns {
            return Err(TaskError::Validation(format!(
                "{path}: dimensions {}x{} differ from reference {}x{}",
                header.rows, header.columns, reference.rows, reference.columns
            )));
        }
        if let (Some(a), Some(b)) = (header.pixel_spacing, reference.pixel_spacing) {
            if (a[0] - b[0]).abs() > SPACING_TOLERANCE || (a[1] - b[1]).abs() > SPACING_TOLERANCE {
                return Err(TaskError::Validation(format!(
                    "{path}: pixel spacing {a:?} differs from reference {b:?}"
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn extract_metadata(
    reader: &dyn SeriesReader,
    files: &[Utf8PathBuf],
) -> Result<SeriesMetadata, TaskError> {
    let Some(first) = files.first() else {
        return Err(TaskError::Validation("empty file list".to_string()));
    };
    let reference = reader.read_header(first)?;
    let slice_spacing = slice_spacing(reader, files, &reference);
    Ok(SeriesMetadata {
        rows: reference.rows,
        columns: reference.columns,
        pixel_spacing: reference.pixel_spacing.unwrap_or([1.0, 1.0]),
        slice_spacing,
        orientation: reference.orientation,
        position_z: reference.position_z.unwrap_or(0.0),
        rescale_slope: reference.rescale_slope.unwrap_or(1.0),
        rescale_intercept: reference.rescale_intercept.unwrap_or(0.0),
        modality_tag: reference.modality,
        description: reference.series_description,
    })
}

/// Prefer the measured z step between the first two slices; the declared
/// slice thickness is the fallback.
fn slice_spacing(
    reader: &dyn SeriesReader,
    files: &[Utf8PathBuf],
    reference: &SliceHeader,
) -> f64 {
    let measured = files.get(1).and_then(|second| {
        let z0 = reference.position_z?;
        let z1 = reader.read_header(second).ok()?.position_z?;
        let step = (z1 - z0).abs();
        (step > f64::EPSILON).then_some(step)
    });
    measured.or(reference.slice_thickness).unwrap_or(1.0)
}

pub(crate) fn stack_slices(
    reader: &dyn SeriesReader,
    files: &[Utf8PathBuf],
    meta: &SeriesMetadata,
    params: &ConversionParams,
) -> Result<Volume, TaskError> {
    let (rows, columns) = (meta.rows as usize, meta.columns as usize);
    let mut data = Array3::<f32>::zeros((files.len(), rows, columns));
    for (k, path) in files.iter().enumerate() {
        let mut slice = reader.read_pixels(path)?;
        if slice.dim() != (rows, columns) {
            return Err(TaskError::Validation(format!(
                "{path}: pixel grid {:?} does not match header {rows}x{columns}",
                slice.dim()
            )));
        }
        if params.apply_rescale {
            let (slope, intercept) = (meta.rescale_slope as f32, meta.rescale_intercept as f32);
            slice.mapv_inplace(|v| v * slope + intercept);
        }
        data.slice_mut(s![k, .., ..]).assign(&slice);
    }
    let spacing = [
        meta.pixel_spacing[1],
        meta.pixel_spacing[0],
        meta.slice_spacing,
    ];
    Ok(Volume::new(data, spacing))
}
