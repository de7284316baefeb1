//! DICOM-backed implementations of the reader seams, built on dicom-rs.
//! Header fields are best-effort: a missing optional tag becomes `None`,
//! and the scanner decides what is required.

use std::collections::HashMap;

use camino::Utf8Path;
use dicom::core::Tag;
use dicom::object::{open_file, FileDicomObject, InMemDicomObject};
use dicom::pixeldata::PixelDecoder;
use dicom_dictionary_std::tags;
use ndarray::Array2;
use time::macros::format_description;

use crate::contour::{Contour, Structure};
use crate::converter::StructureSetSource;
use crate::reader::{ReadError, SeriesReader, SliceHeader};
use crate::types::{PatientId, SeriesUid, StudyUid};

type Object = FileDicomObject<InMemDicomObject>;

pub struct DicomFileReader;

impl SeriesReader for DicomFileReader {
    fn read_header(&self, path: &Utf8Path) -> Result<SliceHeader, ReadError> {
        let obj = open(path)?;
        let ds: &InMemDicomObject = &obj;
        Ok(SliceHeader {
            series_uid: SeriesUid::from(string(ds, tags::SERIES_INSTANCE_UID).unwrap_or_default()),
            modality: string(ds, tags::MODALITY).unwrap_or_default(),
            patient_id: PatientId::from(string(ds, tags::PATIENT_ID).unwrap_or_default()),
            study_uid: StudyUid::from(string(ds, tags::STUDY_INSTANCE_UID).unwrap_or_default()),
            series_description: string(ds, tags::SERIES_DESCRIPTION).unwrap_or_default(),
            series_number: int(ds, tags::SERIES_NUMBER),
            instance_number: int(ds, tags::INSTANCE_NUMBER),
            acquisition_date: string(ds, tags::ACQUISITION_DATE)
                .or_else(|| string(ds, tags::STUDY_DATE))
                .and_then(|raw| parse_date(&raw)),
            rows: int(ds, tags::ROWS).ok_or(ReadError::MissingTag("Rows"))? as u32,
            columns: int(ds, tags::COLUMNS).ok_or(ReadError::MissingTag("Columns"))? as u32,
            pixel_spacing: floats(ds, tags::PIXEL_SPACING)
                .and_then(|v| <[f64; 2]>::try_from(v.as_slice()).ok()),
            slice_thickness: float(ds, tags::SLICE_THICKNESS),
            position_z: floats(ds, tags::IMAGE_POSITION_PATIENT)
                .and_then(|v| v.get(2).copied()),
            orientation: floats(ds, tags::IMAGE_ORIENTATION_PATIENT)
                .and_then(|v| <[f64; 6]>::try_from(v.as_slice()).ok()),
            rescale_slope: float(ds, tags::RESCALE_SLOPE),
            rescale_intercept: float(ds, tags::RESCALE_INTERCEPT),
            dose_grid_scaling: float(ds, tags::DOSE_GRID_SCALING),
        })
    }

    fn read_pixels(&self, path: &Utf8Path) -> Result<Array2<f32>, ReadError> {
        let obj = open(path)?;
        let decoded = obj
            .decode_pixel_data()
            .map_err(|e| malformed(path, &e.to_string()))?;
        let (rows, columns) = (decoded.rows() as usize, decoded.columns() as usize);
        let values = decoded
            .to_vec::<f32>()
            .map_err(|e| malformed(path, &e.to_string()))?;
        if values.len() < rows * columns {
            return Err(malformed(path, "pixel data shorter than Rows x Columns"));
        }
        // Multi-frame objects keep only the first frame.
        let frame: Vec<f32> = values.into_iter().take(rows * columns).collect();
        Array2::from_shape_vec((rows, columns), frame)
            .map_err(|e| malformed(path, &e.to_string()))
    }
}

impl StructureSetSource for DicomFileReader {
    fn read_structures(&self, path: &Utf8Path) -> Result<Vec<Structure>, ReadError> {
        let obj = open(path)?;
        let ds: &InMemDicomObject = &obj;

        let mut names: HashMap<u32, String> = HashMap::new();
        for item in sequence(ds, tags::STRUCTURE_SET_ROI_SEQUENCE) {
            if let (Some(number), Some(name)) =
                (uint(item, tags::ROI_NUMBER), string(item, tags::ROI_NAME))
            {
                names.insert(number, name);
            }
        }
        let mut interpreted: HashMap<u32, String> = HashMap::new();
        for item in sequence(ds, tags::RTROI_OBSERVATIONS_SEQUENCE) {
            if let (Some(number), Some(kind)) = (
                uint(item, tags::REFERENCED_ROI_NUMBER),
                string(item, tags::RTROI_INTERPRETED_TYPE),
            ) {
                interpreted.insert(number, kind);
            }
        }

        let mut structures = Vec::new();
        for item in sequence(ds, tags::ROI_CONTOUR_SEQUENCE) {
            let Some(roi_number) = uint(item, tags::REFERENCED_ROI_NUMBER) else {
                continue;
            };
            let color = floats(item, tags::ROI_DISPLAY_COLOR)
                .and_then(|v| {
                    let rgb: Vec<u8> = v.iter().map(|c| c.clamp(0.0, 255.0) as u8).collect();
                    <[u8; 3]>::try_from(rgb.as_slice()).ok()
                })
                .unwrap_or([0, 0, 0]);
            let contours = sequence(item, tags::CONTOUR_SEQUENCE)
                .filter_map(|c| floats(c, tags::CONTOUR_DATA))
                .map(|data| Contour {
                    points: data.chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect(),
                })
                .collect();
            structures.push(Structure {
                roi_number,
                name: names
                    .get(&roi_number)
                    .cloned()
                    .unwrap_or_else(|| format!("ROI-{roi_number}")),
                color,
                interpreted_type: interpreted.get(&roi_number).cloned().unwrap_or_default(),
                contours,
            });
        }
        Ok(structures)
    }
}

fn open(path: &Utf8Path) -> Result<Object, ReadError> {
    open_file(path.as_std_path()).map_err(|e| malformed(path, &e.to_string()))
}

fn malformed(path: &Utf8Path, reason: &str) -> ReadError {
    ReadError::Malformed {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn string(ds: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = ds.element(tag).ok()?.to_str().ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn int(ds: &InMemDicomObject, tag: Tag) -> Option<i32> {
    ds.element(tag).ok()?.to_int::<i32>().ok()
}

fn uint(ds: &InMemDicomObject, tag: Tag) -> Option<u32> {
    ds.element(tag).ok()?.to_int::<u32>().ok()
}

fn float(ds: &InMemDicomObject, tag: Tag) -> Option<f64> {
    ds.element(tag).ok()?.to_float64().ok()
}

fn floats(ds: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    ds.element(tag).ok()?.to_multi_float64().ok()
}

fn sequence(ds: &InMemDicomObject, tag: Tag) -> impl Iterator<Item = &InMemDicomObject> {
    ds.element(tag)
        .ok()
        .and_then(|element| element.items())
        .into_iter()
        .flatten()
}

/// DICOM DA values are `YYYYMMDD`.
fn parse_date(raw: &str) -> Option<time::Date> {
    time::Date::parse(raw.trim(), format_description!("[year][month][day]")).ok()
}
