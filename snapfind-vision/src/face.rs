use anyhow::Result;
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

use crate::yunet::{HeadOutputs, RawDetection};

/// YuNet input side length.
pub const DETECTOR_INPUT: u32 = 640;
/// SFace input side length.
pub const ENCODER_INPUT: u32 = 112;

/// Canonical eye positions of the 112x112 SFace template.
const TEMPLATE_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
const TEMPLATE_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

/// A detected face in source image pixels.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // right eye, left eye, nose, mouth corners
}

/// An L2-normalised face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    /// Build an embedding from raw model output, normalising it to unit length.
    pub fn from_vec(values: Vec<f32>) -> Self {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        let vector: Array1<f32> = if norm > 0.0 {
            values.into_iter().map(|v| v / norm).collect()
        } else {
            Array1::from(values)
        };
        Self { vector }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    /// Cosine similarity in [-1, 1].
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let denom = self.vector.dot(&self.vector).sqrt() * other.vector.dot(&other.vector).sqrt();
        if denom > 0.0 {
            (self.vector.dot(&other.vector) / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    /// Cosine distance in [0, 2]. Embeddings of different lengths never match,
    /// so they are infinitely far apart.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.len() != other.len() || self.is_empty() {
            return f32::INFINITY;
        }
        1.0 - self.similarity(other)
    }
}

/// Placement of a source image on the square detector canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

impl Letterbox {
    pub fn fit(src_width: u32, src_height: u32, side: u32) -> Self {
        let scale = side as f32 / src_width.max(src_height).max(1) as f32;
        let width = ((src_width as f32 * scale) as u32).clamp(1, side);
        let height = ((src_height as f32 * scale) as u32).clamp(1, side);
        Self {
            scale,
            offset_x: (side - width) / 2,
            offset_y: (side - height) / 2,
            width,
            height,
        }
    }

    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }

    fn map(&self, raw: RawDetection) -> Detection {
        let (x, y) = self.to_source(raw.bbox[0], raw.bbox[1]);
        let mut landmarks = [0.0f32; 10];
        for k in 0..5 {
            let (lx, ly) = self.to_source(raw.landmarks[k * 2], raw.landmarks[k * 2 + 1]);
            landmarks[k * 2] = lx;
            landmarks[k * 2 + 1] = ly;
        }
        Detection {
            bbox: [x, y, raw.bbox[2] / self.scale, raw.bbox[3] / self.scale],
            score: raw.score,
            landmarks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Planar float tensor in [0, 255]. YuNet takes BGR, SFace takes RGB.
fn planar(img: &RgbImage, order: ChannelOrder) -> Result<Array4<f32>> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let (first, last) = match order {
        ChannelOrder::Rgb => (0, 2),
        ChannelOrder::Bgr => (2, 0),
    };
    let mut data = vec![0.0f32; 3 * plane];
    for (i, px) in img.pixels().enumerate() {
        data[i] = px[first] as f32;
        data[plane + i] = px[1] as f32;
        data[2 * plane + i] = px[last] as f32;
    }
    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Detect faces in an image using the YuNet detector.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (src_w, src_h) = img.dimensions();
    let lb = Letterbox::fit(src_w, src_h, DETECTOR_INPUT);

    let resized = img.resize_exact(lb.width, lb.height, FilterType::Triangle);
    let mut canvas = RgbImage::new(DETECTOR_INPUT, DETECTOR_INPUT);
    image::imageops::overlay(
        &mut canvas,
        &resized.to_rgb8(),
        lb.offset_x as i64,
        lb.offset_y as i64,
    );

    let input = Value::from_array(planar(&canvas, ChannelOrder::Bgr)?)?;
    let outputs = session.run(ort::inputs![input])?;

    let mut tensors: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        tensors.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let refs: Vec<(&[i64], &[f32])> = tensors
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let head = HeadOutputs::parse(&refs, DETECTOR_INPUT as usize)?;
    let detections: Vec<Detection> = head
        .decode(score_threshold, DETECTOR_INPUT as usize)
        .into_iter()
        .map(|raw| lb.map(raw))
        .collect();

    log::debug!(
        "{} candidate face(s) above score {:.2} in {}x{} image",
        detections.len(),
        score_threshold,
        src_w,
        src_h
    );

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Non-maximum suppression, highest score first.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for det in sorted {
        if keep
            .iter()
            .all(|k| compute_iou(&k.bbox, &det.bbox) <= iou_threshold)
        {
            keep.push(det);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Warp the face onto the SFace template using a similarity transform fitted
/// to the two eye landmarks.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> RgbImage {
    let src = img.to_rgb8();
    let k = size as f32 / ENCODER_INPUT as f32;

    // YuNet reports the subject's right eye first, which sits on the image left.
    let eye_a = (detection.landmarks[0], detection.landmarks[1]);
    let eye_b = (detection.landmarks[2], detection.landmarks[3]);
    let (src_l, src_r) = if eye_a.0 <= eye_b.0 { (eye_a, eye_b) } else { (eye_b, eye_a) };
    let dst_l = (TEMPLATE_LEFT_EYE.0 * k, TEMPLATE_LEFT_EYE.1 * k);
    let dst_r = (TEMPLATE_RIGHT_EYE.0 * k, TEMPLATE_RIGHT_EYE.1 * k);

    // Inverse map: output pixel -> source pixel, rotation + uniform scale.
    let (sdx, sdy) = (src_r.0 - src_l.0, src_r.1 - src_l.1);
    let (ddx, ddy) = (dst_r.0 - dst_l.0, dst_r.1 - dst_l.1);
    let dst_len2 = (ddx * ddx + ddy * ddy).max(f32::EPSILON);
    let a = (sdx * ddx + sdy * ddy) / dst_len2;
    let b = (sdy * ddx - sdx * ddy) / dst_len2;

    let mut out = RgbImage::new(size, size);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let (u, v) = (x as f32 - dst_l.0, y as f32 - dst_l.1);
        let sx = src_l.0 + a * u - b * v;
        let sy = src_l.1 + b * u + a * v;
        if let Some(p) = image::imageops::interpolate_bilinear(&src, sx, sy) {
            *px = p;
        } else {
            *px = Rgb([0, 0, 0]);
        }
    }
    out
}

/// Encode an aligned face crop with SFace.
pub fn encode_face(session: &mut Session, face: &RgbImage) -> Result<Embedding> {
    let face = if face.dimensions() == (ENCODER_INPUT, ENCODER_INPUT) {
        face.clone()
    } else {
        image::imageops::resize(face, ENCODER_INPUT, ENCODER_INPUT, FilterType::Triangle)
    };

    let input = Value::from_array(planar(&face, ChannelOrder::Rgb)?)?;
    let outputs = session.run(ort::inputs![input])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    Ok(Embedding::from_vec(data[..dim].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);
        assert_eq!(compute_iou(&a, &[100.0, 100.0, 10.0, 10.0]), 0.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = nms(
            &[
                det([12.0, 12.0, 20.0, 20.0], 0.8),
                det([10.0, 10.0, 20.0, 20.0], 0.9),
                det([100.0, 100.0, 20.0, 20.0], 0.85),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.85);
    }

    #[test]
    fn embedding_is_normalised() {
        let e = Embedding::from_vec(vec![3.0, 4.0]);
        assert!((e.vector[0] - 0.6).abs() < 1e-6);
        assert!((e.vector[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn distance_orders_by_angle() {
        let a = Embedding::from_vec(vec![1.0, 0.0]);
        let near = Embedding::from_vec(vec![1.0, 0.2]);
        let orthogonal = Embedding::from_vec(vec![0.0, 1.0]);
        let opposite = Embedding::from_vec(vec![-1.0, 0.0]);

        assert!(a.distance(&a).abs() < 1e-6);
        assert!(a.distance(&near) < a.distance(&orthogonal));
        assert!((a.distance(&orthogonal) - 1.0).abs() < 1e-6);
        assert!((a.distance(&opposite) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_never_match() {
        let a = Embedding::from_vec(vec![1.0, 0.0]);
        let b = Embedding::from_vec(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.distance(&b), f32::INFINITY);
    }

    #[test]
    fn letterbox_round_trips_landscape() {
        let lb = Letterbox::fit(1280, 640, DETECTOR_INPUT);
        assert_eq!((lb.width, lb.height), (640, 320));
        assert_eq!((lb.offset_x, lb.offset_y), (0, 160));

        let (x, y) = lb.to_source(320.0, 160.0 + 100.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 200.0).abs() < 1e-3);
    }

    #[test]
    fn alignment_places_eyes_on_template() {
        // Two bright dots standing in for eyes, level and 60px apart.
        let mut img = RgbImage::new(200, 200);
        img.put_pixel(70, 100, Rgb([255, 255, 255]));
        img.put_pixel(130, 100, Rgb([255, 255, 255]));
        let mut d = det([40.0, 60.0, 120.0, 120.0], 0.9);
        d.landmarks[..4].copy_from_slice(&[130.0, 100.0, 70.0, 100.0]);

        let aligned = align_face(&DynamicImage::ImageRgb8(img), &d, ENCODER_INPUT);
        assert_eq!(aligned.dimensions(), (112, 112));

        let (lx, ly) = (TEMPLATE_LEFT_EYE.0.round() as u32, TEMPLATE_LEFT_EYE.1.round() as u32);
        let brightest = (lx - 1..=lx + 1)
            .flat_map(|x| (ly - 1..=ly + 1).map(move |y| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap();
        assert!(brightest > 0);
    }

    #[test]
    fn detector_and_encoder_channel_orders() {
        let img = RgbImage::from_pixel(2, 1, Rgb([10, 20, 30]));

        let bgr = planar(&img, ChannelOrder::Bgr).unwrap();
        assert_eq!(bgr.shape(), &[1, 3, 1, 2]);
        assert_eq!(
            (bgr[[0, 0, 0, 1]], bgr[[0, 1, 0, 1]], bgr[[0, 2, 0, 1]]),
            (30.0, 20.0, 10.0)
        );

        let rgb = planar(&img, ChannelOrder::Rgb).unwrap();
        assert_eq!(
            (rgb[[0, 0, 0, 0]], rgb[[0, 1, 0, 0]], rgb[[0, 2, 0, 0]]),
            (10.0, 20.0, 30.0)
        );
    }
}
