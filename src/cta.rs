//! CTA Consistency Fixer
//!
//! A call-to-action is a label sitting on a shape. After metrics are
//! reconciled the label may drift; this pass re-centers it on the shape.
//! Anything other than exactly one label plus one shape is left alone.

use serde::{Deserialize, Serialize};

use crate::scene::{Role, Scene};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CtaOutcome {
    Aligned { label_id: String, shape_id: String },
    /// Zero, one, or three-plus call-to-action elements.
    Skipped { count: usize },
    /// Two elements, but not one text and one shape.
    Ambiguous { ids: Vec<String> },
}

pub fn fix_cta(scene: &mut Scene) -> CtaOutcome {
    let cta: Vec<usize> = scene
        .objects
        .iter()
        .enumerate()
        .filter(|(_, e)| e.role() == Role::CallToAction)
        .map(|(i, _)| i)
        .collect();

    let [first, second] = cta[..] else {
        if cta.len() > 2 {
            tracing::warn!(count = cta.len(), "more than two call-to-action elements, left as is");
        }
        return CtaOutcome::Skipped { count: cta.len() };
    };

    let ids = || vec![scene.objects[first].id().to_string(), scene.objects[second].id().to_string()];
    let (label, shape) = match (scene.objects[first].is_text_like(), scene.objects[second].is_text_like()) {
        (true, false) => (first, second),
        (false, true) => (second, first),
        _ => {
            tracing::warn!(ids = ?ids(), "cannot tell call-to-action label from shape");
            return CtaOutcome::Ambiguous { ids: ids() };
        }
    };

    let (Some(label_box), Some(shape_box)) = (scene.objects[label].geometry(), scene.objects[shape].geometry()) else {
        tracing::warn!(ids = ?ids(), "call-to-action element without geometry");
        return CtaOutcome::Ambiguous { ids: ids() };
    };

    let (center_x, center_y) = shape_box.center();
    scene.objects[label].set_origin(
        center_x - label_box.width / 2.0,
        center_y - label_box.height / 2.0,
    );

    CtaOutcome::Aligned {
        label_id: scene.objects[label].id().to_string(),
        shape_id: scene.objects[shape].id().to_string(),
    }
}
