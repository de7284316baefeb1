//! Shared fakes for unit tests: an in-memory series reader and header
//! builders. Keyed by file name so tests can use scratch directories.

use std::collections::HashMap;
use std::sync::Mutex;

use camino::Utf8Path;
use ndarray::Array2;

use crate::contour::Structure;
use crate::converter::StructureSetSource;
use crate::reader::{ReadError, SeriesReader, SliceHeader};
use crate::types::{PatientId, SeriesUid, StudyUid};

pub(crate) fn header(series_uid: &str, modality: &str, patient: &str) -> SliceHeader {
    SliceHeader {
        series_uid: SeriesUid::from(series_uid),
        modality: modality.to_string(),
        patient_id: PatientId::from(patient),
        study_uid: StudyUid::from("1.9"),
        series_description: String::new(),
        series_number: None,
        instance_number: None,
        acquisition_date: None,
        rows: 4,
        columns: 4,
        pixel_spacing: Some([1.0, 1.0]),
        slice_thickness: Some(1.0),
        position_z: None,
        orientation: None,
        rescale_slope: None,
        rescale_intercept: None,
        dose_grid_scaling: None,
    }
}

#[derive(Default)]
pub(crate) struct MockReader {
    pub headers: HashMap<String, SliceHeader>,
    pub pixels: HashMap<String, Array2<f32>>,
    /// File names which fail with a read error.
    pub unreadable: Vec<String>,
    /// Record of header reads, for assertions on ordering.
    pub header_reads: Mutex<Vec<String>>,
}

impl MockReader {
    pub fn insert(&mut self, name: &str, header: SliceHeader) {
        let rows = header.rows as usize;
        let columns = header.columns as usize;
        self.headers.insert(name.to_string(), header);
        self.pixels
            .entry(name.to_string())
            .or_insert_with(|| Array2::zeros((rows, columns)));
    }

    fn name_of(path: &Utf8Path) -> String {
        path.file_name().unwrap_or_default().to_string()
    }
}

/// Structure source for pipelines that never touch structure sets.
pub(crate) struct EmptyStructureSource;

impl StructureSetSource for EmptyStructureSource {
    fn read_structures(&self, _path: &Utf8Path) -> Result<Vec<Structure>, ReadError> {
        Ok(Vec::new())
    }
}

/// Structure source serving a fixed set regardless of path.
pub(crate) struct FixedStructureSource(pub Vec<Structure>);

impl StructureSetSource for FixedStructureSource {
    fn read_structures(&self, _path: &Utf8Path) -> Result<Vec<Structure>, ReadError> {
        Ok(self.0.clone())
    }
}

impl SeriesReader for MockReader {
    fn read_header(&self, path: &Utf8Path) -> Result<SliceHeader, ReadError> {
        let name = Self::name_of(path);
        self.header_reads.lock().unwrap().push(name.clone());
        if self.unreadable.contains(&name) {
            return Err(ReadError::Malformed {
                path: path.to_string(),
                reason: "not a DICOM file".to_string(),
            });
        }
        self.headers
            .get(&name)
            .cloned()
            .ok_or_else(|| ReadError::Malformed {
                path: path.to_string(),
                reason: "unknown test file".to_string(),
            })
    }

    fn read_pixels(&self, path: &Utf8Path) -> Result<Array2<f32>, ReadError> {
        self.pixels
            .get(&Self::name_of(path))
            .cloned()
            .ok_or_else(|| ReadError::Malformed {
                path: path.to_string(),
                reason: "unknown test file".to_string(),
            })
    }
}
