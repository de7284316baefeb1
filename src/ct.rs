//! CT series conversion. The common pipeline applies unchanged: CT slices
//! are stacked in acquisition orientation and rescaled to Hounsfield units
//! by the slope and intercept from the header.

use crate::converter::Converter;
use crate::modality::Modality;

pub struct CtConverter;

impl Converter for CtConverter {
    fn modality(&self) -> Modality {
        Modality::Ct
    }
}
