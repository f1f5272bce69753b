use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;

use crate::backend::Backend;
use crate::error::{ClassifierError, Result};
use crate::model::Model;
use crate::safetensors_util::{deserialize_model, serialize_model};

/// Reads and writes single-file model checkpoints.
pub struct ModelStore;

impl ModelStore {
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().is_file()
    }

    /// A missing file is reported as [`ClassifierError::Io`], never as a
    /// corrupt checkpoint.
    pub fn load<B: Backend, P: AsRef<Path>>(path: P, backend: B) -> Result<Model<B>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ClassifierError::io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| ClassifierError::io(path, e))?
            .len();
        if len == 0 {
            return Err(ClassifierError::corrupt(path, "empty file"));
        }
        // SAFETY: the mapping is only read while `file` is open, and callers
        // serialize access to a checkpoint path.
        let buffer = unsafe { MmapOptions::new().map(&file) }
            .map_err(|e| ClassifierError::io(path, e))?;

        let model = deserialize_model(&buffer, backend, path)?;
        log::info!(
            "Loaded checkpoint {:?} with {} layers",
            path,
            model.layers().len()
        );
        Ok(model)
    }

    /// Writes to a sibling temporary file and renames it over `path`, so a
    /// crash never leaves a half-written checkpoint behind.
    pub fn save<B: Backend, P: AsRef<Path>>(model: &Model<B>, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = serialize_model(model, path)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| ClassifierError::io(parent, e))?;
            }
        }

        let tmp = temp_path(path);
        let written = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(&bytes)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&tmp, path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(ClassifierError::io(path, e));
        }

        log::info!("Saved checkpoint to {:?} ({} bytes)", path, bytes.len());
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkpoint".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;
    use crate::tch_backend::TchBackend;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dense_core_store_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn missing_file_is_io_not_found() {
        let path = scratch("does_not_exist.safetensors");
        assert!(!ModelStore::exists(&path));
        match ModelStore::load(&path, TchBackend::cpu()) {
            Err(ClassifierError::Io { source, .. }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound)
            }
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[test]
    fn save_then_load_predicts_identically() {
        let path = scratch("round_trip.safetensors");
        let model = ModelBuilder::build(TchBackend::cpu(), 4, 3, &[6]).unwrap();
        ModelStore::save(&model, &path).unwrap();
        assert!(ModelStore::exists(&path));

        let restored = ModelStore::load(&path, TchBackend::cpu()).unwrap();
        let input = [0.3, -1.2, 4.0, 0.0, 1.0, 1.0, -2.5, 0.75];
        let a = model.predict(&input, 2).unwrap();
        let b = restored.predict(&input, 2).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() <= 1e-6);
        }
        assert_eq!(restored.architecture(), model.architecture());
    }

    #[test]
    fn save_overwrites_and_leaves_no_temp_file() {
        let path = scratch("overwrite/model.safetensors");
        let _ = fs::remove_file(&path);

        let first = ModelBuilder::build(TchBackend::cpu(), 2, 2, &[3]).unwrap();
        ModelStore::save(&first, &path).unwrap();
        let second = ModelBuilder::build(TchBackend::cpu(), 2, 2, &[7]).unwrap();
        ModelStore::save(&second, &path).unwrap();

        let loaded = ModelStore::load(&path, TchBackend::cpu()).unwrap();
        assert_eq!(loaded.architecture(), second.architecture());

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn corrupt_file_is_distinct_from_missing() {
        let path = scratch("corrupt.safetensors");
        fs::write(&path, b"\x08\x00\x00\x00\x00\x00\x00\x00{\"a\":1}").unwrap();
        let err = ModelStore::load(&path, TchBackend::cpu()).unwrap_err();
        assert!(matches!(err, ClassifierError::CorruptCheckpoint { .. }));
    }

    #[test]
    fn unwritable_path_is_io() {
        let blocker = scratch("blocker");
        fs::write(&blocker, b"file, not a directory").unwrap();
        let model = ModelBuilder::build(TchBackend::cpu(), 2, 2, &[]).unwrap();
        let err = ModelStore::save(&model, blocker.join("model.safetensors")).unwrap_err();
        assert!(matches!(err, ClassifierError::Io { .. }));
    }
}
