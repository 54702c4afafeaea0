use std::collections::HashMap;

use crate::model::{ImageId, ImageRecord, Slide};

/// Ratios strictly below 1 are portrait; square images and images whose
/// ratio has not resolved yet never pair.
fn is_portrait(aspects: &HashMap<ImageId, f32>, id: &ImageId) -> bool {
    aspects.get(id).is_some_and(|ratio| *ratio < 1.0)
}

/// Group an ordered snapshot into slides. Pure over its inputs and rebuilt
/// from scratch on every call; flattening the member ids of the output
/// always reproduces the input order exactly.
pub fn pair(
    ordered: &[ImageRecord],
    aspects: &HashMap<ImageId, f32>,
    pairing_enabled: bool,
) -> Vec<Slide> {
    if !pairing_enabled {
        return ordered
            .iter()
            .map(|record| Slide::Single(record.id.clone()))
            .collect();
    }

    let mut slides = Vec::with_capacity(ordered.len());
    let mut i = 0;
    while i < ordered.len() {
        let current = &ordered[i];
        let pairable_next = is_portrait(aspects, &current.id)
            .then(|| ordered.get(i + 1))
            .flatten()
            .filter(|next| is_portrait(aspects, &next.id));
        match pairable_next {
            Some(next) => {
                slides.push(Slide::Pair(current.id.clone(), next.id.clone()));
                i += 2;
            }
            None => {
                slides.push(Slide::Single(current.id.clone()));
                i += 1;
            }
        }
    }
    slides
}
