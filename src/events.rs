use crate::model::{ImageId, ImageRecord};

/// Live change notification from the image catalog.
#[derive(Debug, Clone)]
pub enum CatalogEvent {
    RecordAdded(ImageRecord),
    RecordRemoved(ImageId),
}

/// Request to probe an image's pixel dimensions.
#[derive(Debug, Clone)]
pub struct ResolveAspect(pub ImageRecord);

/// Successful dimension probe, reduced to a width/height ratio.
#[derive(Debug, Clone)]
pub struct AspectResolved {
    pub id: ImageId,
    pub ratio: f32,
}
