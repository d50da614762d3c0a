use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, Embedding, ENCODER_INPUT};
use crate::model::ModelPaths;

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.3;

/// One detected face and its embedding.
#[derive(Debug, Clone)]
pub struct FaceEncoding {
    pub detection: Detection,
    pub embedding: Embedding,
}

/// Anything that can find faces in an image and embed them.
///
/// Bounding boxes are reported in the pixel space of the image passed in.
pub trait FaceEncoder {
    fn encode_faces(&mut self, img: &DynamicImage) -> Result<Vec<FaceEncoding>>;
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(&paths.detector)?,
            encoder: crate::model::recog_session(&paths.recognizer)?,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        })
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        Self::new(&ModelPaths::in_dir(dir))
    }

    pub fn with_thresholds(mut self, score_threshold: f32, nms_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self.nms_threshold = nms_threshold;
        self
    }
}

impl FaceEncoder for Pipeline {
    fn encode_faces(&mut self, img: &DynamicImage) -> Result<Vec<FaceEncoding>> {
        let detections = face::detect_faces(
            &mut self.detector,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")?;

        detections
            .into_iter()
            .map(|detection| {
                let aligned = face::align_face(img, &detection, ENCODER_INPUT);
                let embedding =
                    face::encode_face(&mut self.encoder, &aligned).context("encoding face")?;
                Ok(FaceEncoding {
                    detection,
                    embedding,
                })
            })
            .collect()
    }
}
