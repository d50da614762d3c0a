use std::fmt;
use std::str::FromStr;

use image::DynamicImage;

use crate::error::FinderError;

/// Target aspect ratio for a crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CropRatio {
    /// 1:1, the largest centred square.
    #[default]
    Square,
    /// 16:9 landscape.
    Wide,
    /// 4:3 landscape.
    Standard,
}

impl CropRatio {
    /// Width and height terms of the ratio.
    fn terms(self) -> (u32, u32) {
        match self {
            CropRatio::Square => (1, 1),
            CropRatio::Wide => (16, 9),
            CropRatio::Standard => (4, 3),
        }
    }
}

impl FromStr for CropRatio {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1:1" | "square" => Ok(CropRatio::Square),
            "16:9" => Ok(CropRatio::Wide),
            "4:3" => Ok(CropRatio::Standard),
            other => Err(FinderError::InvalidRatio(other.to_string())),
        }
    }
}

impl fmt::Display for CropRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.terms();
        write!(f, "{}:{}", w, h)
    }
}

/// Crop region within the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Centred crop region for `ratio`.
///
/// Landscape ratios keep the full width when the image is tall enough and
/// fall back to the full height otherwise.
pub fn crop_region(source_width: u32, source_height: u32, ratio: CropRatio) -> CropRegion {
    let (crop_width, crop_height) = match ratio {
        CropRatio::Square => {
            let side = source_width.min(source_height);
            (side, side)
        }
        _ => {
            let (rw, rh) = ratio.terms();
            let h = (source_width as u64 * rh as u64 / rw as u64) as u32;
            if h <= source_height {
                (source_width, h)
            } else {
                let w = (source_height as u64 * rw as u64 / rh as u64) as u32;
                (w.min(source_width), source_height)
            }
        }
    };

    CropRegion {
        x: (source_width - crop_width) / 2,
        y: (source_height - crop_height) / 2,
        width: crop_width,
        height: crop_height,
    }
}

pub fn crop(img: &DynamicImage, ratio: CropRatio) -> DynamicImage {
    let r = crop_region(img.width(), img.height(), ratio);
    img.crop_imm(r.x, r.y, r.width, r.height)
}
