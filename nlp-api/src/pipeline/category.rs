//! Projection of entities onto the caller's requested categories

use nlp_common::{Category, Entity};

/// Keep entities whose external label is one of `categories`
///
/// Labels are mapped to their camelCase form first (unknown labels are kept
/// as-is); comparison is exact. Order is preserved.
pub fn filter(entities: &[Entity], categories: &[String]) -> Vec<Entity> {
    entities
        .iter()
        .filter_map(|entity| {
            let label = Category::external_label(&entity.label);
            categories.contains(&label).then(|| Entity {
                label,
                ..entity.clone()
            })
        })
        .collect()
}
