//! Narrow contracts for the heavy image math the pipeline delegates.

use crate::volume::Volume;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    Linear,
    Cubic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    ZScore,
    MinMax,
}

#[derive(thiserror::Error, Debug)]
#[error("transform failed: {0}")]
pub struct TransformError(pub String);

/// Resampling, bias-field correction and intensity normalization.
///
/// The pipeline only specifies the invocation contract; the math lives
/// behind this trait.
pub trait Transform: Send + Sync {
    fn resample(
        &self,
        volume: Volume,
        target_spacing: [f64; 3],
        interpolation: Interpolation,
    ) -> Result<Volume, TransformError>;

    fn bias_field_correct(&self, volume: Volume) -> Result<Volume, TransformError>;

    fn normalize(&self, volume: Volume, method: Normalization) -> Result<Volume, TransformError>;
}

/// Pass-through implementation. `resample` only relabels the spacing;
/// suitable for wiring tests and for callers that resample elsewhere.
pub struct NoopTransform;

impl Transform for NoopTransform {
    fn resample(
        &self,
        mut volume: Volume,
        target_spacing: [f64; 3],
        _interpolation: Interpolation,
    ) -> Result<Volume, TransformError> {
        volume.spacing = target_spacing;
        Ok(volume)
    }

    fn bias_field_correct(&self, volume: Volume) -> Result<Volume, TransformError> {
        Ok(volume)
    }

    fn normalize(&self, volume: Volume, _method: Normalization) -> Result<Volume, TransformError> {
        Ok(volume)
    }
}
