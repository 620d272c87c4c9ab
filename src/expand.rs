//! Image Slot Fitting
//!
//! The model proposes a slot for the product image without knowing the
//! picture's proportions. The picture is scaled to fit inside the slot and
//! centered on it.

use thiserror::Error;

use crate::scene::{ElementBody, ImageElement, KnownElement, Scene};

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("Image has zero size: {0}x{1}")]
    EmptyImage(u32, u32),

    #[error("No image element with id '{0}'")]
    MissingSlot(String),
}

/// Scale `natural` to fit the element's slot, keep the slot center, and
/// point the element at `src`.
pub fn fit_image(
    element: &mut ImageElement,
    natural_width: u32,
    natural_height: u32,
    src: &str,
) -> Result<f64, FitError> {
    if natural_width == 0 || natural_height == 0 {
        return Err(FitError::EmptyImage(natural_width, natural_height));
    }

    let slot = element.geometry;
    let (center_x, center_y) = slot.center();
    let scale = (slot.width / natural_width as f64).min(slot.height / natural_height as f64);
    let width = natural_width as f64 * scale;
    let height = natural_height as f64 * scale;

    element.geometry.left = center_x - width / 2.0;
    element.geometry.top = center_y - height / 2.0;
    element.geometry.width = width;
    element.geometry.height = height;
    element.src = Some(src.to_string());
    Ok(scale)
}

/// `fit_image` on the image element `id` inside a scene.
pub fn fit_scene_image(
    scene: &mut Scene,
    id: &str,
    natural_width: u32,
    natural_height: u32,
    src: &str,
) -> Result<f64, FitError> {
    let slot = scene
        .objects
        .iter_mut()
        .filter(|e| e.id() == id)
        .find_map(|e| match e.body_mut() {
            ElementBody::Known(KnownElement::Image(image)) => Some(image),
            _ => None,
        })
        .ok_or_else(|| FitError::MissingSlot(id.to_string()))?;
    fit_image(slot, natural_width, natural_height, src)
}
