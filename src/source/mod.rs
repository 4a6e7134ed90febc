//! Frame sources: decoded, time-ordered picture streams

pub mod ffmpeg;
pub mod pattern;

pub use self::ffmpeg::FfmpegSource;
pub use self::pattern::PatternSource;

use crate::frame::RawFrame;
use crate::Result;

/// Native parameters of the source's video track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    /// Frames per second
    pub frame_rate: f64,
    /// Declared duration in seconds
    pub duration_secs: f64,
}

impl SourceInfo {
    /// `ceil(duration * frame_rate)`; may differ from the decoded frame count
    pub fn estimated_frames(&self) -> u64 {
        let estimate = (self.duration_secs * self.frame_rate).ceil();
        if estimate.is_finite() && estimate > 0.0 {
            estimate as u64
        } else {
            0
        }
    }

    /// Timestamp in microseconds of the frame at `index`
    pub fn timestamp_us(&self, index: u64) -> i64 {
        if self.frame_rate <= 0.0 {
            return 0;
        }
        (index as f64 * 1_000_000.0 / self.frame_rate).round() as i64
    }
}

/// Lazy, finite, non-restartable sequence of frames in presentation order.
///
/// [`info`](FrameSource::info) is valid before the first frame is pulled.
/// Once [`next_frame`](FrameSource::next_frame) returns `Ok(None)` it keeps
/// returning `Ok(None)`.
pub trait FrameSource: Send {
    fn info(&self) -> SourceInfo;

    /// Pull the next decoded frame, waiting for the decoder if needed
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;
}
