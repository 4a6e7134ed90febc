//! Synthetic frame source rendering a moving gradient

use super::{FrameSource, SourceInfo};
use crate::frame::{FramePool, RawFrame};
use crate::{Error, Result};
use image::{ImageBuffer, Rgba};

/// Generates `frame_count` distinguishable RGBA frames
pub struct PatternSource {
    info: SourceInfo,
    frame_count: u64,
    next_index: u64,
    pool: FramePool,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, frame_rate: f64, frame_count: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidInput(format!(
                "invalid pattern size {}x{}",
                width, height
            )));
        }
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "invalid frame rate: {}",
                frame_rate
            )));
        }

        Ok(Self {
            info: SourceInfo {
                width,
                height,
                frame_rate,
                duration_secs: frame_count as f64 / frame_rate,
            },
            frame_count,
            next_index: 0,
            pool: FramePool::for_frames(width, height, 2),
        })
    }

    /// Override the declared duration, e.g. to mimic container metadata that
    /// disagrees with the real frame count
    pub fn with_declared_duration(mut self, duration_secs: f64) -> Self {
        self.info.duration_secs = duration_secs;
        self
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }
}

impl FrameSource for PatternSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.next_index >= self.frame_count {
            return Ok(None);
        }

        let index = self.next_index;
        let (width, height) = (self.info.width, self.info.height);
        let mut buffer = self.pool.lease();
        {
            let mut img: ImageBuffer<Rgba<u8>, &mut [u8]> =
                ImageBuffer::from_raw(width, height, &mut buffer[..]).ok_or_else(|| {
                    Error::InvalidInput("pattern buffer does not match frame size".to_string())
                })?;
            let shift = (index * 4) as u32;
            for (x, y, pixel) in img.enumerate_pixels_mut() {
                *pixel = Rgba([
                    ((x + shift) % 256) as u8,
                    ((y + shift) % 256) as u8,
                    (index % 256) as u8,
                    255,
                ]);
            }
        }

        self.next_index += 1;
        Ok(Some(RawFrame::new(
            width,
            height,
            self.info.timestamp_us(index),
            buffer,
        )))
    }
}
