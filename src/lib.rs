mod batch;
mod config;
mod contour;
mod converter;
mod ct;
mod dicom_file;
mod error;
mod mammography;
mod manager;
mod modality;
mod mri;
mod naming;
mod preprocess;
mod queue;
mod reader;
mod rtstruct;
mod run_from_env;
mod sanitize;
mod scanner;
mod series;
mod settings;
mod task;
#[cfg(test)]
mod testing;
mod transform;
mod types;
mod volume;

pub use batch::generate_tasks;
pub use config::get_config;
pub use contour::{rasterize, Contour, Structure};
pub use converter::{
    ConversionContext, ConversionParams, Converter, Discretization, PipelineEnv, SeriesMetadata,
    StructureSetSource,
};
pub use ct::CtConverter;
pub use dicom_file::DicomFileReader;
pub use error::TaskError;
pub use mammography::MammographyConverter;
pub use manager::{Collaborators, ConversionManager, QueueStatus, TaskSpec};
pub use modality::{detect, KeywordTables, Modality};
pub use mri::MriConverter;
pub use naming::{OutputTemplate, DEFAULT_TEMPLATE};
pub use queue::TaskQueue;
pub use reader::{ReadError, SeriesReader, SliceHeader};
pub use rtstruct::RtStructConverter;
pub use run_from_env::{run_batch, run_from_env};
pub use scanner::{ScanOptions, SeriesScanner};
pub use series::{PatientSummary, ScanResult, Series};
pub use settings::Settings;
pub use task::{ConversionStats, ConversionTask, TaskId, TaskStatus};
pub use transform::{Interpolation, Normalization, NoopTransform, Transform, TransformError};
pub use types::{PatientId, SeriesUid, StudyUid};
pub use volume::{Affine, NiftiVolumeWriter, Volume, VolumeWriter, WriteError};
