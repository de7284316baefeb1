//! The series-reader seam: everything the pipeline needs to know about a
//! slice file without committing to a particular DICOM implementation.

use camino::Utf8Path;
use ndarray::Array2;

use crate::types::{PatientId, SeriesUid, StudyUid};

/// Header fields of one slice file.
///
/// `series_uid`, `modality`, `patient_id` and `study_uid` are required for
/// grouping; a file missing any of them is skipped by the scanner with a
/// warning. Everything else is best-effort.
#[derive(Debug, Clone)]
pub struct SliceHeader {
    pub series_uid: SeriesUid,
    pub modality: String,
    pub patient_id: PatientId,
    pub study_uid: StudyUid,
    pub series_description: String,
    pub series_number: Option<i32>,
    pub instance_number: Option<i32>,
    pub acquisition_date: Option<time::Date>,
    pub rows: u32,
    pub columns: u32,
    /// Row and column spacing in millimeters.
    pub pixel_spacing: Option<[f64; 2]>,
    pub slice_thickness: Option<f64>,
    /// z component of the image position, in millimeters.
    pub position_z: Option<f64>,
    /// Direction cosines of the first row and first column.
    pub orientation: Option<[f64; 6]>,
    pub rescale_slope: Option<f64>,
    pub rescale_intercept: Option<f64>,
    /// Dose grid scaling factor, present on radiotherapy dose files.
    pub dose_grid_scaling: Option<f64>,
}

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("file does not have the required tag: \"{0}\"")]
    MissingTag(&'static str),

    #[error("malformed file {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Reads header fields and pixel grids from slice files.
///
/// Implementations must be callable from multiple worker threads at once.
pub trait SeriesReader: Send + Sync {
    fn read_header(&self, path: &Utf8Path) -> Result<SliceHeader, ReadError>;

    /// Raw pixel values of one slice as `(rows, columns)`, without rescale
    /// applied.
    fn read_pixels(&self, path: &Utf8Path) -> Result<Array2<f32>, ReadError>;
}
