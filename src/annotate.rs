use image::{Rgb, RgbImage};
use serde::Serialize;

/// An inclusive pixel rectangle on the full-resolution image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaceBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl FaceBox {
    /// Map a detector bbox (`[x, y, w, h]` on an image shrunk by `factor`)
    /// back to full resolution, grow it by `margin` on every side and clamp it
    /// to a `width` x `height` image.
    pub fn from_scaled(bbox: [f32; 4], factor: f32, margin: u32, width: u32, height: u32) -> Self {
        let m = margin as f32;
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;

        let left = (bbox[0] / factor - m).clamp(0.0, max_x);
        let top = (bbox[1] / factor - m).clamp(0.0, max_y);
        let right = ((bbox[0] + bbox[2]) / factor + m).clamp(0.0, max_x);
        let bottom = ((bbox[1] + bbox[3]) / factor + m).clamp(0.0, max_y);

        Self {
            left: left as u32,
            top: top as u32,
            right: (right as u32).max(left as u32),
            bottom: (bottom as u32).max(top as u32),
        }
    }
}

/// Draw a hollow rectangle whose border grows inward by `thickness` pixels.
pub fn draw_box(img: &mut RgbImage, face: &FaceBox, color: Rgb<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let t = thickness.max(1);
    let right = face.right.min(w - 1);
    let bottom = face.bottom.min(h - 1);

    for y in face.top..=bottom {
        for x in face.left..=right {
            let on_border = x < face.left.saturating_add(t)
                || x.saturating_add(t) > right
                || y < face.top.saturating_add(t)
                || y.saturating_add(t) > bottom;
            if on_border {
                img.put_pixel(x, y, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_and_expands() {
        let b = FaceBox::from_scaled([10.0, 20.0, 30.0, 40.0], 0.5, 20, 1000, 1000);
        assert_eq!(
            b,
            FaceBox {
                left: 0,
                top: 20,
                right: 100,
                bottom: 140
            }
        );
    }

    #[test]
    fn clamps_to_image() {
        let b = FaceBox::from_scaled([80.0, 80.0, 50.0, 50.0], 1.0, 20, 100, 120);
        assert_eq!((b.left, b.top), (60, 60));
        assert_eq!((b.right, b.bottom), (99, 119));
    }

    #[test]
    fn draws_border_only() {
        let mut img = RgbImage::new(20, 20);
        let green = Rgb([0, 255, 0]);
        let b = FaceBox {
            left: 2,
            top: 2,
            right: 17,
            bottom: 17,
        };
        draw_box(&mut img, &b, green, 2);

        assert_eq!(*img.get_pixel(2, 2), green);
        assert_eq!(*img.get_pixel(3, 10), green);
        assert_eq!(*img.get_pixel(17, 17), green);
        assert_eq!(*img.get_pixel(16, 10), green);
        assert_eq!(*img.get_pixel(10, 10), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(4, 10), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(1, 1), Rgb([0, 0, 0]));
    }

    #[test]
    fn oversized_thickness_fills_the_box() {
        let mut img = RgbImage::new(10, 10);
        let green = Rgb([0, 255, 0]);
        let b = FaceBox {
            left: 2,
            top: 3,
            right: 7,
            bottom: 8,
        };
        draw_box(&mut img, &b, green, u32::MAX);

        assert_eq!(*img.get_pixel(2, 3), green);
        assert_eq!(*img.get_pixel(5, 5), green);
        assert_eq!(*img.get_pixel(7, 8), green);
        assert_eq!(*img.get_pixel(1, 3), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(8, 8), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(5, 9), Rgb([0, 0, 0]));
    }
}
