//! Volumetric grids and the voxel-to-physical affine map.

use camino::Utf8Path;
#[cfg(test)]
use camino::Utf8PathBuf;
use ndarray::Array3;
use nifti::{NiftiHeader, writer::WriterOptions};

/// A numeric volume, indexed as `(slice, row, column)`. Single-slice
/// modalities (mammography) are kept as depth-1 volumes.
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Array3<f32>,
    /// Column, row and slice spacing in millimeters.
    pub spacing: [f64; 3],
}

impl Volume {
    pub fn new(data: Array3<f32>, spacing: [f64; 3]) -> Self {
        Self { data, spacing }
    }

    /// `(slices, rows, columns)`
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }
}

/// The linear map between voxel indices and physical millimeter space.
///
/// Voxel coordinates are ordered `(column, row, slice)`: physical position
/// is `origin + c * linear[·][0] + r * linear[·][1] + k * linear[·][2]`,
/// i.e. the columns of `linear` are the physical steps per voxel increment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub linear: [[f64; 3]; 3],
    pub origin: [f64; 3],
}

impl Affine {
    /// Axis-aligned affine from voxel spacing and a physical origin.
    pub fn from_spacing(spacing: [f64; 3], origin: [f64; 3]) -> Self {
        let mut linear = [[0.0; 3]; 3];
        for i in 0..3 {
            linear[i][i] = spacing[i];
        }
        Self { linear, origin }
    }

    /// Affine from direction cosines of the slice plane. The slice direction
    /// is the cross product of the row and column cosines.
    pub fn from_orientation(
        orientation: [f64; 6],
        spacing: [f64; 2],
        slice_spacing: f64,
        origin: [f64; 3],
    ) -> Self {
        let row = [orientation[0], orientation[1], orientation[2]];
        let col = [orientation[3], orientation[4], orientation[5]];
        let normal = [
            row[1] * col[2] - row[2] * col[1],
            row[2] * col[0] - row[0] * col[2],
            row[0] * col[1] - row[1] * col[0],
        ];
        let mut linear = [[0.0; 3]; 3];
        for i in 0..3 {
            // A column step moves along the row direction and vice versa.
            linear[i][0] = row[i] * spacing[1];
            linear[i][1] = col[i] * spacing[0];
            linear[i][2] = normal[i] * slice_spacing;
        }
        Self { linear, origin }
    }

    /// Map voxel `(column, row, slice)` to a physical point.
    pub fn voxel_to_physical(&self, voxel: [f64; 3]) -> [f64; 3] {
        let mut out = self.origin;
        for i in 0..3 {
            for (j, v) in voxel.iter().enumerate() {
                out[i] += self.linear[i][j] * v;
            }
        }
        out
    }

    /// Map a physical point to continuous voxel coordinates.
    /// `None` if the linear part is singular.
    pub fn physical_to_voxel(&self, point: [f64; 3]) -> Option<[f64; 3]> {
        let inv = invert_3x3(&self.linear)?;
        let d = [
            point[0] - self.origin[0],
            point[1] - self.origin[1],
            point[2] - self.origin[2],
        ];
        let mut out = [0.0; 3];
        for i in 0..3 {
            for j in 0..3 {
                out[i] += inv[i][j] * d[j];
            }
        }
        Some(out)
    }
}

fn invert_3x3(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let mut inv = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            let a = m[(j + 1) % 3][(i + 1) % 3];
            let b = m[(j + 2) % 3][(i + 2) % 3];
            let c = m[(j + 1) % 3][(i + 2) % 3];
            let d = m[(j + 2) % 3][(i + 1) % 3];
            inv[i][j] = (a * b - c * d) * inv_det;
        }
    }
    Some(inv)
}

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),
}

/// Writes a volume and its affine to a file. Implementations must be
/// callable from multiple worker threads at once.
pub trait VolumeWriter: Send + Sync {
    fn write(&self, volume: &Volume, affine: &Affine, path: &Utf8Path) -> Result<(), WriteError>;
}

/// Default writer producing NIfTI-1 files.
pub struct NiftiVolumeWriter;

impl VolumeWriter for NiftiVolumeWriter {
    fn write(&self, volume: &Volume, affine: &Affine, path: &Utf8Path) -> Result<(), WriteError> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let header = header_with_affine(volume, affine);
        WriterOptions::new(path)
            .reference_header(&header)
            .write_nifti(&volume.data)?;
        tracing::debug!(path = path.as_str(), "wrote volume");
        Ok(())
    }
}

fn header_with_affine(volume: &Volume, affine: &Affine) -> NiftiHeader {
    let mut header = NiftiHeader::default();
    header.pixdim = [
        1.0,
        volume.spacing[0] as f32,
        volume.spacing[1] as f32,
        volume.spacing[2] as f32,
        0.0,
        0.0,
        0.0,
        0.0,
    ];
    header.sform_code = 1;
    header.srow_x = srow(affine, 0);
    header.srow_y = srow(affine, 1);
    header.srow_z = srow(affine, 2);
    header
}

fn srow(affine: &Affine, i: usize) -> [f32; 4] {
    [
        affine.linear[i][0] as f32,
        affine.linear[i][1] as f32,
        affine.linear[i][2] as f32,
        affine.origin[i] as f32,
    ]
}

/// Collects written volumes instead of touching the filesystem.
#[cfg(test)]
pub(crate) struct RecordingWriter(pub std::sync::Mutex<Vec<(Utf8PathBuf, Volume)>>);

#[cfg(test)]
impl RecordingWriter {
    pub fn new() -> Self {
        Self(std::sync::Mutex::new(Vec::new()))
    }

    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        self.0.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.0.lock().unwrap().iter().map(|(_, v)| v.clone()).collect()
    }
}

#[cfg(test)]
impl VolumeWriter for RecordingWriter {
    fn write(&self, volume: &Volume, _affine: &Affine, path: &Utf8Path) -> Result<(), WriteError> {
        self.0.lock().unwrap().push((path.to_owned(), volume.clone()));
        Ok(())
    }
}
