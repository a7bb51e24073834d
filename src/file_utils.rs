use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

// @module: File and directory utilities

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().is_file()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {}", path.display()))?;
        }
        Ok(())
    }

    // @writes: Bytes to a sibling temp file, fsyncs, then renames over the target
    pub fn atomic_write<P: AsRef<Path>>(path: P, contents: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::ensure_dir(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    // @writes: Pretty JSON atomically
    pub fn atomic_write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value).context("Failed to serialize JSON")?;
        Self::atomic_write(path, &json)
    }

    // @reads: JSON file, None when it does not exist
    pub fn read_json_optional<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<Option<T>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;
        Ok(Some(value))
    }

    // @returns: Total size in bytes of a file or a directory tree
    pub fn path_size<P: AsRef<Path>>(path: P) -> u64 {
        let path = path.as_ref();
        if path.is_file() {
            return fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        }
        WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    // @removes: File or directory tree, Ok(false) when nothing was there
    pub fn remove_path<P: AsRef<Path>>(path: P) -> Result<bool> {
        let path = path.as_ref();
        if path.is_dir() {
            fs::remove_dir_all(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            Ok(true)
        } else if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // @returns: Hex sha256 of a file's contents
    pub fn hash_file<P: AsRef<Path>>(path: P) -> Result<String> {
        let path = path.as_ref();
        let mut file = fs::File::open(path)
            .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    // @returns: Directory-safe name for a model id like `org/model`
    pub fn sanitize_model_id(model_id: &str) -> String {
        model_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
            .collect()
    }

    // @generates: Sibling checkpoint path, `doc.json` -> `doc.partial.json`
    pub fn checkpoint_path<P: AsRef<Path>>(output: P) -> PathBuf {
        let output = output.as_ref();
        let stem = output.file_stem().unwrap_or_default().to_string_lossy();
        let name = match output.extension() {
            Some(ext) => format!("{}.partial.{}", stem, ext.to_string_lossy()),
            None => format!("{}.partial", stem),
        };
        output.with_file_name(name)
    }

    // @generates: Default output path, `doc.json` -> `doc.fr.json`
    pub fn output_path<P: AsRef<Path>>(input: P, target_lang: &str) -> PathBuf {
        let input = input.as_ref();
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let ext = input
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "json".to_string());
        input.with_file_name(format!("{}.{}.{}", stem, target_lang, ext))
    }
}
