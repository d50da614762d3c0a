//! Salient-object segmentation with U²-Net, used to cut a subject out of its
//! background.
//!
//! Input is a 320x320 RGB tensor scaled by the image's brightest channel value
//! and normalised with ImageNet statistics. The first output's first channel is
//! the saliency map; it is min-max stretched to [0, 255], resized back to the
//! source size and used as the alpha channel.

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage, RgbaImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

pub const SEGMENT_INPUT: u32 = 320;

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

pub fn preprocess(img: &DynamicImage) -> Result<Array4<f32>> {
    let side = SEGMENT_INPUT as usize;
    let small = img
        .resize_exact(SEGMENT_INPUT, SEGMENT_INPUT, FilterType::Lanczos3)
        .to_rgb8();
    let peak = small.as_raw().iter().copied().max().unwrap_or(0).max(1) as f32;

    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, px) in small.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px[c] as f32 / peak - MEAN[c]) / STD[c];
        }
    }
    Ok(tensor)
}

/// Stretch a raw saliency map to a grayscale mask. A flat map yields an empty
/// mask.
pub fn mask_from_prediction(pred: &[f32], width: u32, height: u32) -> Result<GrayImage> {
    let len = (width * height) as usize;
    if pred.len() < len {
        anyhow::bail!(
            "saliency map has {} values, expected at least {}",
            pred.len(),
            len
        );
    }
    let pred = &pred[..len];
    let (lo, hi) = pred
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;

    let bytes = pred
        .iter()
        .map(|&v| {
            if range > 0.0 {
                ((v - lo) / range * 255.0) as u8
            } else {
                0
            }
        })
        .collect();
    GrayImage::from_raw(width, height, bytes).context("building mask buffer")
}

/// Run the segmentation model and return a mask the size of `img`.
pub fn predict_mask(session: &mut Session, img: &DynamicImage) -> Result<GrayImage> {
    let input = Value::from_array(preprocess(img)?)?;
    let outputs = session.run(ort::inputs![input])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    log::debug!("segmentation output shape {:?}", shape.iter().collect::<Vec<_>>());

    let mask = mask_from_prediction(data, SEGMENT_INPUT, SEGMENT_INPUT)?;
    let (w, h) = img.dimensions();
    Ok(image::imageops::resize(&mask, w, h, FilterType::Lanczos3))
}

/// Use `mask` as the alpha channel of `img`.
pub fn apply_mask(img: &DynamicImage, mask: &GrayImage) -> Result<RgbaImage> {
    if img.dimensions() != mask.dimensions() {
        anyhow::bail!(
            "mask is {:?} but image is {:?}",
            mask.dimensions(),
            img.dimensions()
        );
    }
    let mut out = img.to_rgba8();
    for (px, m) in out.pixels_mut().zip(mask.pixels()) {
        px[3] = m[0];
    }
    Ok(out)
}

pub fn remove_background(session: &mut Session, img: &DynamicImage) -> Result<RgbaImage> {
    let mask = predict_mask(session, img).context("predicting foreground mask")?;
    apply_mask(img, &mask)
}
