use aliri_braid::braid;

/// Series instance UID: the acquisition identifier which groups slice files
/// into one series.
#[braid(serde)]
pub struct SeriesUid;

/// Study instance UID.
#[braid(serde)]
pub struct StudyUid;

/// Patient identifier from the source metadata.
#[braid(serde)]
pub struct PatientId;
