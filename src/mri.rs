//! MRI series conversion. Dynamic and diffusion acquisitions (DCE, DWI and
//! ADC maps) come off the scanner rotated a quarter turn; orientation
//! correction rotates them clockwise and mirrors left-right so they line up
//! with the anatomical series. Bias-field correction, when requested, is
//! applied by the delegated transform.

use crate::converter::{Converter, SeriesMetadata};
use crate::modality::Modality;
use crate::preprocess;
use crate::volume::Volume;

/// Description tokens marking acquisitions that need the quarter-turn fix.
const ROTATED_SEQUENCES: [&str; 3] = ["DCE", "DWI", "ADC"];

pub struct MriConverter;

impl MriConverter {
    fn needs_rotation(description: &str) -> bool {
        let upper = description.to_ascii_uppercase();
        upper
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| ROTATED_SEQUENCES.contains(&token))
    }
}

impl Converter for MriConverter {
    fn modality(&self) -> Modality {
        Modality::Mri
    }

    fn orientation_correct(&self, volume: Volume, meta: &SeriesMetadata) -> Volume {
        if Self::needs_rotation(&meta.description) {
            preprocess::mirror_lr(preprocess::rotate_cw(volume))
        } else {
            volume
        }
    }
}
