use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use snapfind_vision::Embedding;

use crate::error::FinderError;

/// A reference face saved for later searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: String,
    pub source: String,
    pub embedding: Vec<f32>,
}

impl ReferenceRecord {
    pub fn new(source: impl Into<String>, embedding: &Embedding) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            embedding: embedding.vector.to_vec(),
        }
    }

    pub fn embedding(&self) -> Embedding {
        Embedding::from_vec(self.embedding.clone())
    }
}

pub fn load_records(file: &Path) -> Result<Vec<ReferenceRecord>> {
    if !file.exists() {
        return Ok(vec![]);
    }
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    postcard::from_bytes(&data).with_context(|| format!("decoding {}", file.display()))
}

/// Embeddings stored in `file` for a search. Unlike `load_records`, a missing
/// or empty file is an error.
pub fn load_references(file: &Path) -> Result<Vec<Embedding>> {
    if !file.exists() {
        return Err(FinderError::MissingReferences(file.to_path_buf()).into());
    }
    let records = load_records(file)?;
    if records.is_empty() {
        return Err(FinderError::EmptyReferences(file.to_path_buf()).into());
    }
    log::info!("Loaded {} stored reference(s) from {}", records.len(), file.display());
    Ok(records.iter().map(ReferenceRecord::embedding).collect())
}

pub fn save_record(file: &Path, record: ReferenceRecord) -> Result<()> {
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut records = load_records(file)?;
    records.push(record);
    let data = postcard::to_allocvec(&records)?;
    std::fs::write(file, data).with_context(|| format!("writing {}", file.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("snapfind-store-{}", uuid::Uuid::new_v4()))
            .join("refs.bin")
    }

    #[test]
    fn missing_file_is_empty() {
        assert!(load_records(&scratch()).unwrap().is_empty());
    }

    #[test]
    fn records_accumulate() {
        let file = scratch();
        let a = ReferenceRecord::new("me.jpg", &Embedding::from_vec(vec![1.0, 0.0]));
        let b = ReferenceRecord::new("friend.jpg", &Embedding::from_vec(vec![0.0, 2.0]));
        save_record(&file, a.clone()).unwrap();
        save_record(&file, b.clone()).unwrap();

        let loaded = load_records(&file).unwrap();
        assert_eq!(loaded, vec![a, b]);
        assert_ne!(loaded[0].id, loaded[1].id);
        assert_eq!(loaded[1].embedding().vector.to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let file = scratch();
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, [0xff, 0xff, 0xff]).unwrap();
        assert!(load_records(&file).is_err());
    }

    #[test]
    fn missing_reference_file_is_an_error() {
        let err = load_references(&scratch()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FinderError>(),
            Some(FinderError::MissingReferences(_))
        ));
    }

    #[test]
    fn empty_reference_file_is_an_error() {
        let file = scratch();
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, postcard::to_allocvec(&Vec::<ReferenceRecord>::new()).unwrap())
            .unwrap();
        let err = load_references(&file).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FinderError>(),
            Some(FinderError::EmptyReferences(_))
        ));
    }

    #[test]
    fn stored_references_become_embeddings() {
        let file = scratch();
        save_record(&file, ReferenceRecord::new("me.jpg", &Embedding::from_vec(vec![3.0, 4.0])))
            .unwrap();
        let refs = load_references(&file).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].vector.to_vec(), vec![0.6, 0.8]);
    }
}
