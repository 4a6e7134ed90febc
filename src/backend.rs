//! Media backends
//!
//! A backend answers the capability query and hands out the frame source,
//! encoder and muxer the pipeline drives. [`FfmpegBackend`] is the shipped
//! implementation; tests substitute fakes.

use crate::asset::SourceAsset;
use crate::encoder::{self, Encoder, EncoderConfig};
use crate::muxer::{self, Muxer};
use crate::source::{FfmpegSource, FrameSource};
use crate::toolchain::{SharedToolchain, ToolchainReport};
use crate::{CompressOptions, Error, Result};
use std::path::PathBuf;

/// Collaborators consumed by the pipeline
pub trait MediaBackend {
    /// Whether decode and encode primitives exist in this runtime
    fn supported(&self) -> bool;

    /// Human readable reason when [`supported`](MediaBackend::supported) is false
    fn unsupported_reason(&self) -> Option<String> {
        None
    }

    fn open_source(&self, asset: &SourceAsset) -> Result<Box<dyn FrameSource>>;

    fn create_encoder(&self, config: EncoderConfig) -> Result<Box<dyn Encoder>>;

    fn create_muxer(&self) -> Result<Box<dyn Muxer>> {
        muxer::create_muxer()
    }
}

/// Backend driving ffmpeg/ffprobe child processes
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    toolchain: SharedToolchain,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_path: Option<PathBuf>) -> Self {
        Self::with_toolchain(SharedToolchain::new(ffmpeg_path))
    }

    /// Share an already created toolchain handle
    pub fn with_toolchain(toolchain: SharedToolchain) -> Self {
        Self { toolchain }
    }

    pub fn toolchain(&self) -> &SharedToolchain {
        &self.toolchain
    }

    /// Paths, version and encoder support of the discovered toolchain
    pub fn probe_details(&self) -> ToolchainReport {
        self.toolchain.report()
    }
}

impl MediaBackend for FfmpegBackend {
    fn supported(&self) -> bool {
        self.toolchain
            .get()
            .map(|toolchain| toolchain.has_libx264)
            .unwrap_or(false)
    }

    fn unsupported_reason(&self) -> Option<String> {
        self.probe_details().reason
    }

    fn open_source(&self, asset: &SourceAsset) -> Result<Box<dyn FrameSource>> {
        let toolchain = self.toolchain.get()?;
        Ok(Box::new(FfmpegSource::open(toolchain, asset.path())?))
    }

    fn create_encoder(&self, config: EncoderConfig) -> Result<Box<dyn Encoder>> {
        encoder::create_encoder(self.toolchain.get()?, config)
    }
}

/// Check that compression can run with the given options
pub fn available(options: &CompressOptions) -> Result<()> {
    let report = FfmpegBackend::new(options.ffmpeg_path.clone()).probe_details();
    if report.supported {
        Ok(())
    } else {
        Err(Error::UnsupportedEnvironment(
            report
                .reason
                .unwrap_or_else(|| "ffmpeg toolchain unavailable".to_string()),
        ))
    }
}
