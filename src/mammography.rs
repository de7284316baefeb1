//! Mammography conversion. One image per series: the single projection is
//! kept as a depth-1 volume, rotated a quarter turn counter-clockwise into
//! viewing orientation, and the detector edge artifacts are scrubbed by the
//! common preprocessing chain.

use crate::converter::{Converter, PipelineEnv, SeriesMetadata};
use crate::error::TaskError;
use crate::modality::Modality;
use crate::preprocess;
use crate::volume::Volume;
use camino::Utf8PathBuf;

pub struct MammographyConverter;

impl Converter for MammographyConverter {
    fn modality(&self) -> Modality {
        Modality::Mammography
    }

    /// Each view (CC, MLO) is its own series with exactly one image.
    fn validate(&self, _env: &PipelineEnv, files: &[Utf8PathBuf]) -> Result<(), TaskError> {
        if files.len() != 1 {
            return Err(TaskError::Validation(format!(
                "mammography series must hold exactly one image, found {}",
                files.len()
            )));
        }
        Ok(())
    }

    fn orientation_correct(&self, volume: Volume, _meta: &SeriesMetadata) -> Volume {
        preprocess::rotate_ccw(volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{ConversionContext, ConversionParams};
    use crate::testing::{header, EmptyStructureSource, MockReader};
    use crate::transform::NoopTransform;
    use crate::volume::RecordingWriter;
    use camino::Utf8Path;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_single_image_becomes_depth_one_volume() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let mut reader = MockReader::default();
        fs_err::File::create(root.join("mlo.dcm")).unwrap();
        let mut h = header("1.4", "MG", "P3");
        h.rows = 20;
        h.columns = 20;
        reader.insert("mlo.dcm", h);

        let writer = RecordingWriter::new();
        let env = PipelineEnv {
            reader: &reader,
            structures: &EmptyStructureSource,
            writer: &writer,
            transform: &NoopTransform,
        };
        let cancelled = AtomicBool::new(false);
        let progress = |_: f32, _: &str| {};
        let ctx = ConversionContext::new(&progress, &cancelled);

        let outputs = MammographyConverter
            .convert(
                &env,
                root,
                Utf8Path::new("/out/P3/mlo.nii.gz"),
                &ConversionParams::default(),
                &ctx,
            )
            .unwrap();
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn test_multiple_images_fail_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let mut reader = MockReader::default();
        for name in ["cc.dcm", "mlo.dcm"] {
            fs_err::File::create(root.join(name)).unwrap();
            reader.insert(name, header("1.4", "MG", "P3"));
        }

        let writer = RecordingWriter::new();
        let env = PipelineEnv {
            reader: &reader,
            structures: &EmptyStructureSource,
            writer: &writer,
            transform: &NoopTransform,
        };
        let cancelled = AtomicBool::new(false);
        let progress = |_: f32, _: &str| {};
        let ctx = ConversionContext::new(&progress, &cancelled);

        let err = MammographyConverter
            .convert(
                &env,
                root,
                Utf8Path::new("/out/P3/mg.nii.gz"),
                &ConversionParams::default(),
                &ctx,
            )
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }
}
