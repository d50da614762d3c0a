use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};

pub const DETECTOR_MODEL: &str = "face_detection_yunet_2023mar.onnx";
pub const RECOGNITION_MODEL: &str = "face_recognition_sface_2021dec.onnx";
pub const SEGMENTATION_MODEL: &str = "u2net.onnx";

/// Locations of the ONNX models inside a model directory.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    pub segmenter: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL),
            recognizer: dir.join(RECOGNITION_MODEL),
            segmenter: dir.join(SEGMENTATION_MODEL),
        }
    }

    /// True when both face models are present.
    pub fn has_face_models(&self) -> bool {
        self.detector.exists() && self.recognizer.exists()
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load(path: &Path, what: &str) -> Result<Session> {
    if !path.exists() {
        anyhow::bail!("{} model not found at {}", what, path.display());
    }
    log::debug!("loading {} model from {}", what, path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", what, path.display()))
}

pub fn detector_session(path: &Path) -> Result<Session> {
    load(path, "detector")
}

pub fn recog_session(path: &Path) -> Result<Session> {
    load(path, "recognition")
}

pub fn segmenter_session(path: &Path) -> Result<Session> {
    load(path, "segmentation")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_paths_join_dir() {
        let paths = ModelPaths::in_dir(Path::new("/opt/models"));
        assert_eq!(paths.detector, Path::new("/opt/models").join(DETECTOR_MODEL));
        assert_eq!(paths.segmenter, Path::new("/opt/models/u2net.onnx"));
    }

    #[test]
    fn missing_model_is_reported() {
        let Err(err) = detector_session(Path::new("/nonexistent/yunet.onnx")) else {
            panic!("expected a missing model error");
        };
        assert!(err.to_string().contains("detector model not found"));
    }
}
