//! In-plane grid operations applied before the delegated transforms:
//! orientation correction, edge-artifact scrubbing and discretization.

use ndarray::Array3;

use crate::volume::Volume;

/// Quarter turn counter-clockwise, applied to every slice.
/// Swaps the in-plane spacing components accordingly.
pub fn rotate_ccw(volume: Volume) -> Volume {
    let (depth, rows, cols) = volume.data.dim();
    let src = volume.data;
    let data = Array3::from_shape_fn((depth, cols, rows), |(k, i, j)| src[(k, j, cols - 1 - i)]);
    Volume {
        data,
        spacing: [volume.spacing[1], volume.spacing[0], volume.spacing[2]],
    }
}

/// Quarter turn clockwise, applied to every slice.
pub fn rotate_cw(volume: Volume) -> Volume {
    let (depth, rows, cols) = volume.data.dim();
    let src = volume.data;
    let data = Array3::from_shape_fn((depth, cols, rows), |(k, i, j)| src[(k, rows - 1 - j, i)]);
    Volume {
        data,
        spacing: [volume.spacing[1], volume.spacing[0], volume.spacing[2]],
    }
}

/// Mirror every slice left-right.
pub fn mirror_lr(volume: Volume) -> Volume {
    let (depth, rows, cols) = volume.data.dim();
    let src = volume.data;
    let data = Array3::from_shape_fn((depth, rows, cols), |(k, i, j)| src[(k, i, cols - 1 - j)]);
    Volume { data, ..volume }
}

/// Zero out detector edge artifacts: the top and bottom 10% of rows and the
/// left and right 5% of columns are set to the grid minimum, which acts as
/// the background value. Mammography only.
pub fn scrub_edges(volume: &mut Volume) {
    let (_, rows, cols) = volume.data.dim();
    let background = volume.data.iter().copied().fold(f32::INFINITY, f32::min);
    if !background.is_finite() {
        return;
    }
    let margin_rows = rows / 10;
    let margin_cols = cols / 20;
    for ((_, r, c), v) in volume.data.indexed_iter_mut() {
        if r < margin_rows || r >= rows - margin_rows || c < margin_cols || c >= cols - margin_cols
        {
            *v = background;
        }
    }
}

/// Map each value to `floor((v - min) / width)`.
pub fn discretize_fixed_width(data: &mut Array3<f32>, width: f64) {
    let min = data.iter().copied().fold(f32::INFINITY, f32::min) as f64;
    if !min.is_finite() || width <= 0.0 {
        return;
    }
    data.mapv_inplace(|v| ((v as f64 - min) / width).floor() as f32);
}

/// Partition `[min, max]` into `bins` equal-width bins and map each value to
/// its bin index. The top edge clamps into the last bin.
pub fn discretize_fixed_count(data: &mut Array3<f32>, bins: u32) {
    if bins == 0 {
        return;
    }
    let min = data.iter().copied().fold(f32::INFINITY, f32::min) as f64;
    let max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    if !min.is_finite() || max <= min {
        data.mapv_inplace(|_| 0.0);
        return;
    }
    let width = (max - min) / bins as f64;
    data.mapv_inplace(|v| {
        let idx = ((v as f64 - min) / width).floor() as i64;
        idx.min(bins as i64 - 1).max(0) as f32
    });
}
