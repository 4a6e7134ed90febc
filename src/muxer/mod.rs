//! Video container muxers

pub mod mp4;

use crate::encoder::{EncodedSample, EncoderConfig, ParameterSets};
use crate::Result;

/// Codec carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    /// H.264 in AVCC framing
    Avc1,
}

/// Static description of the single video track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub codec: CodecId,
    pub width: u32,
    pub height: u32,
    /// Ticks per second; one tick per sample
    pub timescale: u32,
    pub parameter_sets: ParameterSets,
}

impl TrackDescriptor {
    pub fn from_encoder(config: &EncoderConfig, parameter_sets: ParameterSets) -> Self {
        Self {
            codec: CodecId::Avc1,
            width: config.width,
            height: config.height,
            timescale: config.timescale(),
            parameter_sets,
        }
    }
}

/// Handle returned by [`Muxer::add_track`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackHandle(pub(crate) u32);

impl TrackHandle {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Video muxer trait
///
/// `add_track` is called exactly once before any sample. `finalize` may be
/// called once; every later call, and any `add_sample` after it, fails with
/// a mux error.
pub trait Muxer: Send {
    fn add_track(&mut self, descriptor: TrackDescriptor) -> Result<TrackHandle>;

    /// Append a sample; ownership of its payload moves into the container
    fn add_sample(&mut self, track: TrackHandle, sample: EncodedSample) -> Result<()>;

    /// Produce the complete container bytes
    fn finalize(&mut self) -> Result<Vec<u8>>;

    fn sample_count(&self) -> u64;
}

/// Create the MP4 muxer
pub fn create_muxer() -> Result<Box<dyn Muxer>> {
    Ok(Box::new(mp4::Mp4Muxer::new()?))
}
