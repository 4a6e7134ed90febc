//! Compression options

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;

/// Default size below which an asset is passed through untouched
pub const DEFAULT_TARGET_SIZE: u64 = 5 * MIB;

/// Default upload limit
pub const DEFAULT_MAX_SIZE: u64 = 20 * MIB;

/// Default target bitrate (bits per second)
pub const DEFAULT_BITRATE: u32 = 1_000_000;

/// Video extensions accepted as compression input
pub const SUPPORTED_VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "webm", "avi", "mov", "wmv", "flv", "mkv", "m4v", "ogv",
];

/// Check whether a file name carries a supported video extension
pub fn is_supported_video(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => SUPPORTED_VIDEO_EXTENSIONS
            .iter()
            .any(|s| s.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// H.264 profile for the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecProfile {
    /// Constrained baseline, level 3.0 (`avc1.42001E`)
    #[default]
    Baseline,
    Main,
    High,
}

impl CodecProfile {
    /// Profile name understood by libx264
    pub fn x264_name(&self) -> &'static str {
        match self {
            CodecProfile::Baseline => "baseline",
            CodecProfile::Main => "main",
            CodecProfile::High => "high",
        }
    }

    /// RFC 6381 codec string
    pub fn codec_string(&self) -> &'static str {
        match self {
            CodecProfile::Baseline => "avc1.42001E",
            CodecProfile::Main => "avc1.4D401E",
            CodecProfile::High => "avc1.64001E",
        }
    }
}

/// Options for a compression run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressOptions {
    /// Assets at or below this size (bytes) are returned unchanged
    pub target_size: u64,
    /// Upload limit (bytes), advisory
    pub max_size: u64,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Output frame rate; inherits the source rate when unset
    pub framerate: Option<f64>,
    /// Output resolution; passes the source resolution through when unset
    pub resolution: Option<(u32, u32)>,
    /// H.264 profile
    pub profile: CodecProfile,
    /// Seconds between forced keyframes
    pub keyframe_interval_secs: u32,
    /// Path to ffmpeg executable
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_TARGET_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            bitrate: DEFAULT_BITRATE,
            framerate: None,
            resolution: None,
            profile: CodecProfile::default(),
            keyframe_interval_secs: 2,
            ffmpeg_path: None,
        }
    }
}

impl CompressOptions {
    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        self.validate_size_policy()?;
        if self.bitrate == 0 {
            return Err(Error::InvalidInput("bitrate must be positive".to_string()));
        }
        if let Some(fps) = self.framerate {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(Error::InvalidInput(format!("invalid frame rate: {}", fps)));
            }
        }
        if let Some((w, h)) = self.resolution {
            // 4:2:0 chroma needs even dimensions
            if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
                return Err(Error::InvalidInput(format!(
                    "resolution must be non-zero and even: {}x{}",
                    w, h
                )));
            }
        }
        if self.keyframe_interval_secs == 0 {
            return Err(Error::InvalidInput(
                "keyframe interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate only the options the size check reads
    pub fn validate_size_policy(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(Error::InvalidInput("target size must be positive".to_string()));
        }
        if self.max_size < self.target_size {
            return Err(Error::InvalidInput(format!(
                "max size {} is below target size {}",
                self.max_size, self.target_size
            )));
        }
        Ok(())
    }
}
