//! Input and output assets

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// MIME type of produced assets
pub const OUTPUT_CONTENT_TYPE: &str = "video/mp4";

/// Extension of produced assets
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Read-only handle to the original video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAsset {
    path: PathBuf,
    name: String,
    size: u64,
}

impl SourceAsset {
    /// Open an asset from disk, reading its size from file metadata
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(Error::InvalidInput(format!(
                "not a file: {}",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidInput(format!("no file name: {}", path.display())))?;

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
        })
    }

    /// Describe an asset without touching the filesystem
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the asset's bytes
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(&self.path)?)
    }
}

/// Counters collected during a compression run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionReport {
    /// Frames yielded by the frame source
    pub frames_decoded: u64,
    /// Samples written to the container
    pub samples_written: u64,
    /// Frames the encoder accepted but produced no sample for
    pub frames_dropped: u64,
    /// `ceil(duration * frame_rate)` as estimated before the run
    pub estimated_frames: u64,
    pub original_size: u64,
    pub compressed_size: u64,
}

/// Newly produced MP4 asset
#[derive(Debug, Clone)]
pub struct CompressedAsset {
    pub name: String,
    pub content_type: &'static str,
    pub data: Vec<u8>,
    pub report: CompressionReport,
}

impl CompressedAsset {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Write the asset into `dir` under its own name
    pub fn write_to<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let path = dir.as_ref().join(&self.name);
        std::fs::write(&path, &self.data)?;
        Ok(path)
    }
}

/// Result of a pipeline run
#[derive(Debug, Clone)]
pub enum Output {
    /// Source was already small enough and is returned unmodified
    Original(SourceAsset),
    Compressed(CompressedAsset),
}

impl Output {
    pub fn name(&self) -> &str {
        match self {
            Output::Original(asset) => asset.name(),
            Output::Compressed(asset) => &asset.name,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Output::Original(asset) => asset.size(),
            Output::Compressed(asset) => asset.size(),
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Output::Compressed(_))
    }
}

/// Replace the extension of `name` with `ext`, appending it when there is none
pub fn replace_extension(name: &str, ext: &str) -> String {
    let trimmed = name.trim_end_matches('.');
    let stem = match trimmed.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => trimmed,
    };
    format!("{}.{}", stem, ext)
}
