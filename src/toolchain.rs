//! ffmpeg toolchain discovery
//!
//! Locating ffmpeg/ffprobe and asking ffmpeg for its encoder list costs a few
//! process spawns, so the result is computed once per [`SharedToolchain`] and
//! shared by every clone of the handle.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, OnceLock};

/// Common install locations tried when PATH lookup fails
const FALLBACK_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"];

/// Resolved ffmpeg installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// First line of `ffmpeg -version`
    pub version: Option<String>,
    pub has_libx264: bool,
}

impl Toolchain {
    /// Locate ffmpeg (optionally at a custom path) and its sibling ffprobe
    pub fn discover(ffmpeg_path: Option<&Path>) -> Result<Self> {
        let ffmpeg = find_tool("ffmpeg", ffmpeg_path)?;
        let ffprobe = match sibling_ffprobe(&ffmpeg) {
            Some(path) => path,
            None => find_tool("ffprobe", None)?,
        };

        let version = Command::new(&ffmpeg)
            .arg("-version")
            .stderr(Stdio::null())
            .output()
            .ok()
            .filter(|o| o.status.success())
            .and_then(|o| {
                String::from_utf8_lossy(&o.stdout)
                    .lines()
                    .next()
                    .map(|s| s.to_string())
            });

        let has_libx264 = Command::new(&ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .stderr(Stdio::null())
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains("libx264"))
            .unwrap_or(false);

        tracing::debug!(
            ffmpeg = %ffmpeg.display(),
            ffprobe = %ffprobe.display(),
            has_libx264,
            "discovered ffmpeg toolchain"
        );

        Ok(Self {
            ffmpeg,
            ffprobe,
            version,
            has_libx264,
        })
    }

    /// Fail unless H.264 encoding is possible
    pub fn require_h264(&self) -> Result<()> {
        if self.has_libx264 {
            Ok(())
        } else {
            Err(Error::UnsupportedEnvironment(
                "FFmpeg does not have libx264 support".to_string(),
            ))
        }
    }
}

/// Diagnostic summary of the toolchain probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainReport {
    pub supported: bool,
    pub toolchain: Option<Toolchain>,
    /// Why the toolchain is unusable
    pub reason: Option<String>,
}

/// Lazily discovered toolchain with shared ownership
#[derive(Debug, Clone, Default)]
pub struct SharedToolchain {
    ffmpeg_path: Option<PathBuf>,
    cell: Arc<OnceLock<std::result::Result<Toolchain, String>>>,
}

impl SharedToolchain {
    pub fn new(ffmpeg_path: Option<PathBuf>) -> Self {
        Self {
            ffmpeg_path,
            cell: Arc::new(OnceLock::new()),
        }
    }

    /// Resolve the toolchain, running discovery on first use only
    pub fn get(&self) -> Result<&Toolchain> {
        self.cell
            .get_or_init(|| {
                Toolchain::discover(self.ffmpeg_path.as_deref()).map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|reason| Error::UnsupportedEnvironment(reason.clone()))
    }

    /// Whether discovery has already run
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn report(&self) -> ToolchainReport {
        match self.get() {
            Ok(toolchain) => ToolchainReport {
                supported: toolchain.has_libx264,
                reason: (!toolchain.has_libx264)
                    .then(|| "FFmpeg does not have libx264 support".to_string()),
                toolchain: Some(toolchain.clone()),
            },
            Err(e) => ToolchainReport {
                supported: false,
                toolchain: None,
                reason: Some(e.to_string()),
            },
        }
    }
}

/// Find an executable, preferring a configured path over PATH lookup
fn find_tool(name: &str, custom_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = custom_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::UnsupportedEnvironment(format!(
            "{} not found at: {}",
            name,
            path.display()
        )));
    }

    if let Ok(path) = which::which(name) {
        return Ok(path);
    }

    FALLBACK_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(name))
        .find(|path| path.exists())
        .ok_or_else(|| Error::UnsupportedEnvironment(format!("{} not found in PATH", name)))
}

/// ffprobe living next to the given ffmpeg binary
fn sibling_ffprobe(ffmpeg: &Path) -> Option<PathBuf> {
    let file_name = ffmpeg.file_name()?.to_string_lossy();
    if !file_name.contains("ffmpeg") {
        return None;
    }
    let candidate = ffmpeg.with_file_name(file_name.replace("ffmpeg", "ffprobe"));
    candidate.exists().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_path_missing() {
        let result = Toolchain::discover(Some(Path::new("/nonexistent/ffmpeg_12345")));
        assert!(matches!(result, Err(Error::UnsupportedEnvironment(_))));
    }

    #[test]
    fn test_shared_handle_initializes_once() {
        let shared = SharedToolchain::new(Some(PathBuf::from("/nonexistent/ffmpeg_12345")));
        let clone = shared.clone();
        assert!(!shared.is_initialized());

        assert!(shared.get().is_err());
        assert!(clone.is_initialized());

        let report = clone.report();
        assert!(!report.supported);
        assert!(report.reason.unwrap().contains("not found"));
    }

    #[test]
    fn test_sibling_ffprobe_ignores_unrelated_names() {
        assert_eq!(sibling_ffprobe(Path::new("/usr/bin/avconv")), None);
    }
}
