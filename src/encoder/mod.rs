//! Video encoders

pub mod annexb;
pub mod h264;

use crate::config::CodecProfile;
use crate::frame::RawFrame;
use crate::source::SourceInfo;
use crate::toolchain::Toolchain;
use crate::{CompressOptions, Result};

/// One compressed access unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    /// AVCC payload (4-byte length-prefixed NAL units)
    pub data: Vec<u8>,
    /// Decoding timestamp in frame ticks
    pub dts: i64,
    /// Presentation timestamp in frame ticks
    pub pts: i64,
    /// `pts - dts`; always 0 without B-frames
    pub composition_offset: i32,
    /// Independently decodable
    pub is_sync: bool,
}

/// H.264 sequence and picture parameter sets, without start codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

/// Video encoder trait
///
/// Frames are pushed with [`encode`](Encoder::encode); output may lag behind
/// input and is collected with [`drain`](Encoder::drain). After
/// [`flush`](Encoder::flush) returns, every accepted frame has produced its
/// sample or been counted in [`frames_dropped`](Encoder::frames_dropped).
pub trait Encoder: Send {
    /// Queue a frame, taking ownership; its buffer is released once consumed
    fn encode(&mut self, frame: RawFrame) -> Result<()>;

    /// Samples that are ready now, without waiting
    fn drain(&mut self) -> Result<Vec<EncodedSample>>;

    /// Wait for all queued frames and return the remaining samples
    fn flush(&mut self) -> Result<Vec<EncodedSample>>;

    /// SPS/PPS, available once the first sample has been produced
    fn parameter_sets(&self) -> Option<ParameterSets>;

    fn frames_accepted(&self) -> u64;

    fn samples_emitted(&self) -> u64;

    /// Frames accepted without a matching sample; final only after `flush`
    fn frames_dropped(&self) -> u64 {
        self.frames_accepted().saturating_sub(self.samples_emitted())
    }
}

/// Encoder configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Width of the frames fed to the encoder
    pub input_width: u32,
    /// Height of the frames fed to the encoder
    pub input_height: u32,
    /// Rate at which frames are fed
    pub input_framerate: f64,
    /// Output width
    pub width: u32,
    /// Output height
    pub height: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Output frame rate
    pub framerate: f64,
    pub profile: CodecProfile,
    /// Frames between forced keyframes
    pub keyframe_interval: u32,
}

impl EncoderConfig {
    /// Derive the encoder configuration from the source's native parameters
    pub fn for_source(info: &SourceInfo, options: &CompressOptions) -> Self {
        let (width, height) = options
            .resolution
            .unwrap_or(((info.width / 2) * 2, (info.height / 2) * 2));

        let framerate = match options.framerate {
            Some(fps) if fps > info.frame_rate => {
                tracing::warn!(
                    requested = fps,
                    source = info.frame_rate,
                    "frame rate above the source rate, keeping the source rate"
                );
                info.frame_rate
            }
            Some(fps) => fps,
            None => info.frame_rate,
        };

        let keyframe_interval =
            ((framerate * options.keyframe_interval_secs as f64).round() as u32).max(1);

        Self {
            input_width: info.width,
            input_height: info.height,
            input_framerate: info.frame_rate,
            width: width.max(2),
            height: height.max(2),
            bitrate: options.bitrate,
            framerate,
            profile: options.profile,
            keyframe_interval,
        }
    }

    /// Track timescale: one tick per frame
    pub fn timescale(&self) -> u32 {
        (self.framerate.round() as u32).max(1)
    }

    pub fn rescales(&self) -> bool {
        self.width != self.input_width || self.height != self.input_height
    }

    pub fn resamples(&self) -> bool {
        (self.framerate - self.input_framerate).abs() > f64::EPSILON
    }
}

/// Create the H.264 encoder backed by the given toolchain
pub fn create_encoder(toolchain: &Toolchain, config: EncoderConfig) -> Result<Box<dyn Encoder>> {
    toolchain.require_h264()?;
    Ok(Box::new(h264::FfmpegH264Encoder::new(toolchain, config)?))
}
