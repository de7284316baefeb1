//! Rasterization of contour-based regions-of-interest into voxel masks.
//!
//! Fill rule: **even-odd**. A voxel is set iff its center lies inside an odd
//! number of contour polygons on its slice, so a contour drawn inside
//! another one punches a hole (donut-shaped regions come out hollow).
//! Slice lookup rounds **half-up** on the continuous slice coordinate: a
//! contour lying exactly between two slices maps to the higher index.

use ndarray::Array3;

use crate::volume::Affine;

/// One closed planar polygon, in physical millimeter coordinates.
/// The contour is implicitly closed; the last point connects to the first.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub points: Vec<[f64; 3]>,
}

/// A named region-of-interest from a structure set.
#[derive(Debug, Clone)]
pub struct Structure {
    pub roi_number: u32,
    pub name: String,
    pub color: [u8; 3],
    pub interpreted_type: String,
    pub contours: Vec<Contour>,
}

/// Rasterize one structure against a reference grid.
///
/// `shape` is `(slices, rows, columns)` and `affine` maps voxel
/// `(column, row, slice)` indices to physical space. Contours whose plane
/// falls outside the grid are skipped with a warning, never an error.
pub fn rasterize(
    structure: &Structure,
    shape: (usize, usize, usize),
    affine: &Affine,
) -> (Array3<u8>, Vec<String>) {
    let (slices, rows, cols) = shape;
    let mut mask = Array3::<u8>::zeros(shape);
    let mut warnings = Vec::new();

    for contour in &structure.contours {
        if contour.points.len() < 3 {
            warnings.push(format!(
                "structure {:?}: contour with {} points ignored",
                structure.name,
                contour.points.len()
            ));
            continue;
        }
        let Some(polygon) = to_voxel_polygon(contour, affine) else {
            warnings.push(format!(
                "structure {:?}: reference affine is singular",
                structure.name
            ));
            continue;
        };
        // Planar contour: the slice coordinate of the first point stands in
        // for the whole polygon. Round half-up.
        let slice_coord = polygon[0][2];
        let slice_index = (slice_coord + 0.5).floor();
        if slice_index < 0.0 || slice_index >= slices as f64 {
            warnings.push(format!(
                "structure {:?}: contour at slice coordinate {slice_coord:.2} \
                 is outside the reference grid",
                structure.name
            ));
            continue;
        }
        let k = slice_index as usize;
        let mut plane = mask.index_axis_mut(ndarray::Axis(0), k);
        fill_even_odd(&polygon, &mut plane, rows, cols);
    }
    (mask, warnings)
}

fn to_voxel_polygon(contour: &Contour, affine: &Affine) -> Option<Vec<[f64; 3]>> {
    contour
        .points
        .iter()
        .map(|p| affine.physical_to_voxel(*p))
        .collect()
}

/// Scanline fill with even-odd parity. Each voxel whose center crosses an
/// odd number of edges to the left toggles; contributions from multiple
/// contours on the same slice XOR into the plane.
fn fill_even_odd(
    polygon: &[[f64; 3]],
    plane: &mut ndarray::ArrayViewMut2<u8>,
    rows: usize,
    cols: usize,
) {
    let n = polygon.len();
    for r in 0..rows {
        let y = r as f64;
        let mut crossings: Vec<f64> = Vec::new();
        for i in 0..n {
            let [x1, y1, _] = polygon[i];
            let [x2, y2, _] = polygon[(i + 1) % n];
            // Half-open rule on the vertical span so a vertex is counted
            // exactly once.
            if (y1 <= y && y < y2) || (y2 <= y && y < y1) {
                crossings.push(x1 + (y - y1) * (x2 - x1) / (y2 - y1));
            }
        }
        crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        for pair in crossings.chunks_exact(2) {
            // Voxel centers in [enter, exit).
            let start = pair[0].ceil().max(0.0) as usize;
            let end = pair[1].ceil().min(cols as f64).max(0.0) as usize;
            for c in start..end {
                plane[(r, c)] ^= 1;
            }
        }
    }
}
