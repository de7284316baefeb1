//! Radiotherapy conversion. RT files are not one homogeneous family: a
//! structure set holds named contour-based regions-of-interest, a dose file
//! holds a scaled pixel grid, and a plan holds no voxels at all. This
//! converter replaces the common driver and dispatches on the modality tag
//! of the input file.

use camino::{Utf8Path, Utf8PathBuf};

use crate::contour::{self, Structure};
use crate::converter::{
    extract_metadata, list_slice_files, order_slices, stack_slices, ConversionContext,
    ConversionParams, Converter, PipelineEnv,
};
use crate::error::TaskError;
use crate::modality::Modality;
use crate::reader::SliceHeader;
use crate::sanitize::sanitize;
use crate::volume::{Affine, Volume};

pub struct RtStructConverter;

impl Converter for RtStructConverter {
    fn modality(&self) -> Modality {
        Modality::Radiotherapy
    }

    fn convert(
        &self,
        env: &PipelineEnv,
        input: &Utf8Path,
        output: &Utf8Path,
        params: &ConversionParams,
        ctx: &ConversionContext,
    ) -> Result<Vec<Utf8PathBuf>, TaskError> {
        ctx.report(0.0, "reading radiotherapy file");
        let files = list_slice_files(input)?;
        let Some(file) = files.first() else {
            return Err(TaskError::Conversion(format!(
                "no radiotherapy file found under {input}"
            )));
        };
        // An unreadable header still gets the structure-set path; structure
        // sources have their own parsing and error out with more detail.
        let header = env.reader.read_header(file).ok();
        let sub_modality = header
            .as_ref()
            .map(|h| h.modality.to_ascii_uppercase())
            .unwrap_or_default();
        ctx.checkpoint()?;
        match sub_modality.as_str() {
            "RTDOSE" => convert_dose(env, &files, output, ctx),
            "RTPLAN" => summarize_plan(header.as_ref(), output, ctx),
            _ => convert_structures(env, file, output, params, ctx),
        }
    }
}

fn convert_structures(
    env: &PipelineEnv,
    file: &Utf8Path,
    output: &Utf8Path,
    params: &ConversionParams,
    ctx: &ConversionContext,
) -> Result<Vec<Utf8PathBuf>, TaskError> {
    let structures = env.structures.read_structures(file)?;
    if structures.is_empty() {
        return Err(TaskError::Conversion(format!(
            "{file}: structure set holds no regions"
        )));
    }
    ctx.checkpoint()?;

    ctx.report(0.1, "building reference grid");
    let (shape, affine, spacing) = match &params.reference_series {
        Some(series) => reference_from_series(env, series)?,
        None => {
            let spacing = params.target_spacing.unwrap_or([1.0, 1.0, 1.0]);
            let (shape, affine) = bounding_grid(&structures, spacing)?;
            (shape, affine, spacing)
        }
    };
    tracing::debug!(
        regions = structures.len(),
        ?shape,
        "rasterizing structure set"
    );

    let mut outputs = Vec::with_capacity(structures.len());
    let stem = output_stem(output);
    for (index, structure) in structures.iter().enumerate() {
        ctx.checkpoint()?;
        let fraction = 0.1 + 0.9 * index as f32 / structures.len() as f32;
        ctx.report(fraction, &format!("rasterizing {:?}", structure.name));

        let (mask, warnings) = contour::rasterize(structure, shape, &affine);
        for warning in warnings {
            tracing::warn!(structure = structure.name.as_str(), warning = %warning);
        }
        let volume = Volume::new(mask.mapv(f32::from), spacing);
        let path = Utf8PathBuf::from(format!(
            "{stem}_struct_{}.nii.gz",
            sanitize(&structure.name)
        ));
        env.writer.write(&volume, &affine, &path)?;
        outputs.push(path);
    }
    ctx.report(1.0, "structure set complete");
    Ok(outputs)
}

/// Dose grids are stacked like an image series, scaled by the dose grid
/// scaling factor instead of the rescale slope.
fn convert_dose(
    env: &PipelineEnv,
    files: &[Utf8PathBuf],
    output: &Utf8Path,
    ctx: &ConversionContext,
) -> Result<Vec<Utf8PathBuf>, TaskError> {
    ctx.report(0.3, "building dose grid");
    let meta = extract_metadata(env.reader, files)?;
    let scaling = env
        .reader
        .read_header(&files[0])?
        .dose_grid_scaling
        .unwrap_or(1.0) as f32;
    let raw = ConversionParams {
        apply_rescale: false,
        ..Default::default()
    };
    let mut volume = stack_slices(env.reader, files, &meta, &raw)?;
    volume.data.mapv_inplace(|v| v * scaling);
    ctx.checkpoint()?;

    ctx.report(0.8, "writing dose volume");
    let affine = meta.affine(volume.spacing);
    let path = Utf8PathBuf::from(format!("{}_dose.nii.gz", output_stem(output)));
    env.writer.write(&volume, &affine, &path)?;
    ctx.report(1.0, "dose grid complete");
    Ok(vec![path])
}

/// Plans carry no voxel payload; their descriptive fields go into a text
/// summary next to where the volume would have been.
fn summarize_plan(
    header: Option<&SliceHeader>,
    output: &Utf8Path,
    ctx: &ConversionContext,
) -> Result<Vec<Utf8PathBuf>, TaskError> {
    ctx.report(0.5, "summarizing treatment plan");
    let mut text = String::from("RT Plan Information\n==================\n");
    let name = header
        .map(|h| h.series_description.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown");
    text.push_str(&format!("plan_name: {name}\n"));
    match header.and_then(|h| h.acquisition_date) {
        Some(date) => text.push_str(&format!("plan_date: {date}\n")),
        None => text.push_str("plan_date: Unknown\n"),
    }

    let path = Utf8PathBuf::from(format!("{}_plan_info.txt", output_stem(output)));
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(&path, text)?;
    ctx.report(1.0, "plan summary complete");
    Ok(vec![path])
}

/// Grid of the series the masks should align with, usually the planning CT:
/// its slice count, in-plane dimensions and affine.
fn reference_from_series(
    env: &PipelineEnv,
    series: &Utf8Path,
) -> Result<((usize, usize, usize), Affine, [f64; 3]), TaskError> {
    let files = order_slices(env.reader, list_slice_files(series)?);
    if files.is_empty() {
        return Err(TaskError::Validation(format!(
            "reference series {series} has no slice files"
        )));
    }
    let meta = extract_metadata(env.reader, &files)?;
    let spacing = [
        meta.pixel_spacing[1],
        meta.pixel_spacing[0],
        meta.slice_spacing,
    ];
    let shape = (files.len(), meta.rows as usize, meta.columns as usize);
    Ok((shape, meta.affine(spacing), spacing))
}

/// Fallback grid when no reference series is configured: axis-aligned,
/// covering every contour point with one voxel of margin on each side.
/// Shape is `(slices, rows, columns)`.
fn bounding_grid(
    structures: &[Structure],
    spacing: [f64; 3],
) -> Result<((usize, usize, usize), Affine), TaskError> {
    let points = structures
        .iter()
        .flat_map(|s| s.contours.iter())
        .flat_map(|c| c.points.iter());
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for point in points {
        for axis in 0..3 {
            min[axis] = min[axis].min(point[axis]);
            max[axis] = max[axis].max(point[axis]);
        }
    }
    if !min.iter().all(|v| v.is_finite()) {
        return Err(TaskError::Validation(
            "structure set has no contour points".to_string(),
        ));
    }
    let origin = [
        min[0] - spacing[0],
        min[1] - spacing[1],
        min[2] - spacing[2],
    ];
    let extent = |axis: usize| ((max[axis] - min[axis]) / spacing[axis]).ceil() as usize + 3;
    // Voxel order is (column, row, slice) against physical (x, y, z).
    let shape = (extent(2), extent(1), extent(0));
    Ok((shape, Affine::from_spacing(spacing, origin)))
}

fn output_stem(output: &Utf8Path) -> &str {
    let s = output.as_str();
    s.strip_suffix(".nii.gz")
        .or_else(|| s.strip_suffix(".nii"))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::Contour;
    use crate::testing::{header, FixedStructureSource, MockReader};
    use crate::transform::NoopTransform;
    use crate::volume::RecordingWriter;
    use std::sync::atomic::AtomicBool;

    fn structure(name: &str, z: f64) -> Structure {
        Structure {
            roi_number: 1,
            name: name.to_string(),
            color: [0, 255, 0],
            interpreted_type: "ORGAN".to_string(),
            contours: vec![Contour {
                points: vec![
                    [0.0, 0.0, z],
                    [0.0, 10.0, z],
                    [10.0, 10.0, z],
                    [10.0, 0.0, z],
                ],
            }],
        }
    }

    fn run(
        reader: &MockReader,
        structures: Vec<Structure>,
        input: &Utf8Path,
        params: &ConversionParams,
    ) -> (Result<Vec<Utf8PathBuf>, TaskError>, RecordingWriter) {
        let source = FixedStructureSource(structures);
        let writer = RecordingWriter::new();
        let cancelled = AtomicBool::new(false);
        let progress = |_: f32, _: &str| {};
        let result = {
            let env = PipelineEnv {
                reader,
                structures: &source,
                writer: &writer,
                transform: &NoopTransform,
            };
            let ctx = ConversionContext::new(&progress, &cancelled);
            RtStructConverter.convert(
                &env,
                input,
                Utf8Path::new("/out/P1/S001_rtstruct.nii.gz"),
                params,
                &ctx,
            )
        };
        (result, writer)
    }

    fn convert(structures: Vec<Structure>) -> Result<Vec<Utf8PathBuf>, TaskError> {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        fs_err::File::create(root.join("rs.dcm")).unwrap();
        let reader = MockReader::default();
        run(&reader, structures, root, &ConversionParams::default()).0
    }

    #[test]
    fn test_one_mask_file_per_region() {
        let outputs = convert(vec![structure("PTV", 0.0), structure("Left Lung", 4.0)]).unwrap();
        assert_eq!(
            outputs,
            vec![
                Utf8PathBuf::from("/out/P1/S001_rtstruct_struct_PTV.nii.gz"),
                Utf8PathBuf::from("/out/P1/S001_rtstruct_struct_Left_Lung.nii.gz"),
            ]
        );
    }

    #[test]
    fn test_empty_structure_set_is_an_error() {
        let err = convert(vec![]).unwrap_err();
        assert!(matches!(err, TaskError::Conversion(_)));
    }

    #[test]
    fn test_dose_file_converts_to_scaled_volume() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        fs_err::File::create(root.join("rd.dcm")).unwrap();

        let mut reader = MockReader::default();
        let mut h = header("1.5", "RTDOSE", "P1");
        h.rows = 1;
        h.columns = 2;
        h.dose_grid_scaling = Some(0.5);
        reader.insert("rd.dcm", h);
        reader
            .pixels
            .insert("rd.dcm".into(), ndarray::arr2(&[[10.0, 20.0]]));

        let (result, writer) = run(&reader, vec![], root, &ConversionParams::default());
        let outputs = result.unwrap();
        assert_eq!(
            outputs,
            vec![Utf8PathBuf::from("/out/P1/S001_rtstruct_dose.nii.gz")]
        );
        let dose = &writer.volumes()[0];
        assert_eq!(dose.data[(0, 0, 0)], 5.0);
        assert_eq!(dose.data[(0, 0, 1)], 10.0);
    }

    #[test]
    fn test_plan_file_produces_text_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let out_root = tempfile::tempdir().unwrap();
        let out_dir = Utf8Path::from_path(out_root.path()).unwrap();
        fs_err::File::create(root.join("rp.dcm")).unwrap();

        let mut reader = MockReader::default();
        let mut h = header("1.6", "RTPLAN", "P1");
        h.series_description = "Breast plan".to_string();
        reader.insert("rp.dcm", h);

        let source = FixedStructureSource(vec![]);
        let writer = RecordingWriter::new();
        let env = PipelineEnv {
            reader: &reader,
            structures: &source,
            writer: &writer,
            transform: &NoopTransform,
        };
        let cancelled = AtomicBool::new(false);
        let progress = |_: f32, _: &str| {};
        let ctx = ConversionContext::new(&progress, &cancelled);
        let outputs = RtStructConverter
            .convert(
                &env,
                root,
                &out_dir.join("plan.nii.gz"),
                &ConversionParams::default(),
                &ctx,
            )
            .unwrap();

        assert_eq!(outputs, vec![out_dir.join("plan_plan_info.txt")]);
        let text = fs_err::read_to_string(&outputs[0]).unwrap();
        assert!(text.contains("plan_name: Breast plan"));
        assert!(writer.paths().is_empty(), "plans produce no volume");
    }

    #[test]
    fn test_masks_align_to_reference_series_grid() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        fs_err::File::create(root.join("rs.dcm")).unwrap();
        let ct_dir = root.join("planning_ct");
        fs_err::create_dir(&ct_dir).unwrap();

        let mut reader = MockReader::default();
        for (i, z) in [(1, 0.0), (2, 2.0), (3, 4.0)] {
            let mut h = header("1.2.ct", "CT", "P1");
            h.instance_number = Some(i);
            h.position_z = Some(z);
            h.pixel_spacing = Some([0.5, 0.5]);
            let name = format!("ct{i}.dcm");
            fs_err::File::create(ct_dir.join(&name)).unwrap();
            reader.insert(&name, h);
        }

        let params = ConversionParams {
            reference_series: Some(ct_dir.clone()),
            ..Default::default()
        };
        let (result, writer) = run(&reader, vec![structure("PTV", 0.0)], root, &params);
        result.unwrap();

        let mask = &writer.volumes()[0];
        assert_eq!(mask.shape(), (3, 4, 4), "grid matches the planning CT");
        assert_eq!(mask.spacing, [0.5, 0.5, 2.0]);
    }

    #[test]
    fn test_empty_reference_series_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        fs_err::File::create(root.join("rs.dcm")).unwrap();
        let empty = root.join("missing_ct");
        fs_err::create_dir(&empty).unwrap();

        let reader = MockReader::default();
        let params = ConversionParams {
            reference_series: Some(empty),
            ..Default::default()
        };
        let (result, _) = run(&reader, vec![structure("PTV", 0.0)], root, &params);
        assert!(matches!(result.unwrap_err(), TaskError::Validation(_)));
    }

    #[test]
    fn test_bounding_grid_covers_all_contours_with_margin() {
        let structures = vec![structure("A", 0.0), structure("B", 8.0)];
        let (shape, affine) = bounding_grid(&structures, [1.0, 1.0, 1.0]).unwrap();
        let (slices, rows, cols) = shape;
        assert_eq!((slices, rows, cols), (11, 13, 13));
        assert_eq!(affine.origin, [-1.0, -1.0, -1.0]);

        // Every contour point maps inside the grid.
        for s in &structures {
            for c in &s.contours {
                for p in &c.points {
                    let v = affine.physical_to_voxel(*p).unwrap();
                    assert!(v[0] > 0.0 && v[0] < cols as f64);
                    assert!(v[1] > 0.0 && v[1] < rows as f64);
                    assert!(v[2] > 0.0 && v[2] < slices as f64);
                }
            }
        }
    }
}
