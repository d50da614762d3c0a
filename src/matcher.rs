//! Search a folder of group photos for faces close to one or more references.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, ImageReader, Rgb, RgbImage};
use log::{debug, info, warn};
use snapfind_vision::{Embedding, FaceEncoder};

use crate::annotate::{draw_box, FaceBox};
use crate::config::{self, Config};
use crate::error::FinderError;

pub const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Knobs for a folder search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub tolerance: f32,
    pub downscale: f32,
    pub margin: u32,
    pub thickness: u32,
    pub color: [u8; 3],
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for MatchOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            tolerance: cfg.tolerance,
            downscale: cfg.downscale,
            margin: cfg.box_margin,
            thickness: cfg.box_thickness,
            color: cfg.box_color,
        }
    }
}

impl MatchOptions {
    pub fn validate(&self) -> Result<(), FinderError> {
        config::validate_tolerance(self.tolerance)?;
        config::validate_downscale(self.downscale)
    }
}

/// A candidate that contained at least one reference face.
#[derive(Debug, Clone)]
pub struct MatchedPhoto {
    pub path: PathBuf,
    pub image: RgbImage,
    pub faces: Vec<FaceBox>,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct MatchReport {
    pub matched: Vec<MatchedPhoto>,
    pub skipped: Vec<SkippedFile>,
}

impl MatchReport {
    pub fn matched_names(&self) -> Vec<String> {
        self.matched.iter().map(|m| file_name(&m.path)).collect()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn is_candidate(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.iter().any(|ok| e.eq_ignore_ascii_case(ok)))
        .unwrap_or(false)
}

/// Image files directly inside `folder`, sorted by name.
pub fn candidate_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(folder)
        .with_context(|| format!("reading folder {}", folder.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("listing {}", folder.display()))?
            .path();
        if path.is_file() && is_candidate(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Decode an image, guessing the format from its contents.
pub fn decode(path: &Path) -> Result<DynamicImage, FinderError> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|source| FinderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    reader
        .decode()
        .map_err(|source| FinderError::UnrecognizedFormat {
            path: path.to_path_buf(),
            source,
        })
}

/// Embedding of the most confident face in a reference image.
pub fn reference_embedding<E: FaceEncoder>(
    encoder: &mut E,
    img: &DynamicImage,
    label: &str,
) -> Result<Embedding> {
    let faces = encoder
        .encode_faces(img)
        .with_context(|| format!("encoding reference {}", label))?;
    let best = faces
        .into_iter()
        .max_by(|a, b| a.detection.score.total_cmp(&b.detection.score))
        .ok_or_else(|| FinderError::NoFaceInReference(label.to_string()))?;
    Ok(best.embedding)
}

pub fn load_reference<E: FaceEncoder>(encoder: &mut E, path: &Path) -> Result<Embedding> {
    let img = decode(path)?;
    reference_embedding(encoder, &img, &file_name(path))
}

pub fn matches_any(references: &[Embedding], face: &Embedding, tolerance: f32) -> bool {
    references.iter().any(|r| r.distance(face) <= tolerance)
}

/// Look for reference faces in one image. Returns the annotated image and the
/// boxes drawn when anything matched.
pub fn match_image<E: FaceEncoder>(
    encoder: &mut E,
    references: &[Embedding],
    img: &DynamicImage,
    opts: &MatchOptions,
) -> Result<Option<(RgbImage, Vec<FaceBox>)>> {
    let (width, height) = (img.width(), img.height());
    let faces = if opts.downscale < 1.0 {
        let w = ((width as f32 * opts.downscale) as u32).max(1);
        let h = ((height as f32 * opts.downscale) as u32).max(1);
        let small = img.resize_exact(w, h, FilterType::Triangle);
        encoder.encode_faces(&small)?
    } else {
        encoder.encode_faces(img)?
    };

    let boxes: Vec<FaceBox> = faces
        .iter()
        .filter(|f| matches_any(references, &f.embedding, opts.tolerance))
        .map(|f| FaceBox::from_scaled(f.detection.bbox, opts.downscale, opts.margin, width, height))
        .collect();
    debug!("{} face(s), {} matched", faces.len(), boxes.len());

    if boxes.is_empty() {
        return Ok(None);
    }

    let mut annotated = img.to_rgb8();
    for b in &boxes {
        draw_box(&mut annotated, b, Rgb(opts.color), opts.thickness);
    }
    Ok(Some((annotated, boxes)))
}

/// Scan every candidate in `folder`. Files that fail to decode or encode are
/// recorded as skipped and the scan carries on.
pub fn match_folder<E: FaceEncoder>(
    encoder: &mut E,
    references: &[Embedding],
    folder: &Path,
    opts: &MatchOptions,
) -> Result<MatchReport> {
    opts.validate()?;
    let files = candidate_files(folder)?;
    info!(
        "Scanning {} photo(s) in {} (tolerance {:.2})",
        files.len(),
        folder.display(),
        opts.tolerance
    );

    let mut report = MatchReport::default();
    for path in files {
        let outcome = decode(&path)
            .map_err(anyhow::Error::from)
            .and_then(|img| match_image(encoder, references, &img, opts));

        match outcome {
            Ok(Some((image, faces))) => {
                info!("{}: {} matching face(s)", file_name(&path), faces.len());
                report.matched.push(MatchedPhoto { path, image, faces });
            }
            Ok(None) => debug!("{}: no match", file_name(&path)),
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                report.skipped.push(SkippedFile {
                    path,
                    reason: format!("{:#}", e),
                });
            }
        }
    }
    Ok(report)
}

/// Embed every selfie and scan `folder` for any of them or the already
/// loaded `references`. A selfie that cannot be read or shows no face aborts
/// the search before any candidate is touched.
pub fn search<E: FaceEncoder>(
    encoder: &mut E,
    selfies: &[PathBuf],
    mut references: Vec<Embedding>,
    folder: &Path,
    opts: &MatchOptions,
) -> Result<MatchReport> {
    opts.validate()?;
    for selfie in selfies {
        let embedding = load_reference(encoder, selfie)
            .with_context(|| format!("loading reference {}", selfie.display()))?;
        info!("Loaded reference face from {}", selfie.display());
        references.push(embedding);
    }
    if references.is_empty() {
        return Err(FinderError::NoReferences.into());
    }
    match_folder(encoder, &references, folder, opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_case_insensitive() {
        assert!(is_candidate(Path::new("a/b/IMG_001.JPG")));
        assert!(is_candidate(Path::new("party.Jpeg")));
        assert!(is_candidate(Path::new("x.png")));
        assert!(!is_candidate(Path::new("notes.txt")));
        assert!(!is_candidate(Path::new("archive.png.zip")));
        assert!(!is_candidate(Path::new("README")));
    }

    #[test]
    fn any_reference_within_tolerance_matches() {
        let refs = vec![
            Embedding::from_vec(vec![1.0, 0.0]),
            Embedding::from_vec(vec![0.0, 1.0]),
        ];
        assert!(matches_any(&refs, &Embedding::from_vec(vec![0.1, 1.0]), 0.05));
        assert!(!matches_any(&refs, &Embedding::from_vec(vec![-1.0, -1.0]), 0.5));
        assert!(!matches_any(&[], &Embedding::from_vec(vec![1.0, 0.0]), 2.0));
    }

    #[test]
    fn options_follow_config() {
        let cfg = Config {
            tolerance: 0.3,
            box_margin: 7,
            ..Config::default()
        };
        let opts = MatchOptions::from(&cfg);
        assert_eq!(opts.tolerance, 0.3);
        assert_eq!(opts.margin, 7);
        assert_eq!(opts.color, [0, 255, 0]);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let opts = MatchOptions {
            downscale: 0.0,
            ..MatchOptions::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(FinderError::InvalidDownscale(_))
        ));
    }
}
