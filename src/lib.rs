//! vidshrink - Local video size reduction
//!
//! Oversized videos are decoded, re-encoded to H.264 at a lower bitrate and
//! repackaged as MP4 without leaving the machine:
//! - [`Compressor`]: the pipeline coordinator, generic over a [`MediaBackend`]
//! - [`compress_file`]: one-call helper using the ffmpeg backend
//! - [`available`]: check whether the local toolchain can encode

pub mod asset;
pub mod backend;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ffi;
pub mod frame;
pub mod muxer;
pub mod pipeline;
pub mod progress;
pub mod size;
pub mod source;
pub mod toolchain;

pub use asset::{CompressedAsset, CompressionReport, Output, SourceAsset};
pub use backend::{available, FfmpegBackend, MediaBackend};
pub use config::{CodecProfile, CompressOptions};
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{compress_file, CancelToken, Compressor, PipelineState};
pub use progress::{ProgressEvent, Stage};
pub use toolchain::{SharedToolchain, ToolchainReport};
