//! Frame source decoding through an ffmpeg child process

use super::{FrameSource, SourceInfo};
use crate::frame::{FramePool, RawFrame};
use crate::toolchain::Toolchain;
use crate::{Error, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

/// Idle buffers kept for reuse; a frame is released every iteration so two suffice
const POOL_BUFFERS: usize = 2;

/// Video decoder using ffmpeg
pub struct FfmpegSource {
    info: SourceInfo,
    process: Child,
    stdout: Option<ChildStdout>,
    pool: FramePool,
    frames_read: u64,
}

impl FfmpegSource {
    /// Probe `path` and start decoding it to raw RGBA
    pub fn open<P: AsRef<Path>>(toolchain: &Toolchain, path: P) -> Result<Self> {
        let path = path.as_ref();
        let info = probe_video(toolchain, path)?;

        // ffmpeg autorotates by default; the probed size already accounts for that.
        // Pinning the output rate keeps the pipe in step with `info.frame_rate`.
        let mut process = Command::new(&toolchain.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-an", "-sn", "-r"])
            .arg(format!("{:.6}", info.frame_rate))
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::DecodeUnavailable(format!("Failed to start ffmpeg: {}", e)))?;

        let stdout = process.stdout.take();
        if stdout.is_none() {
            let _ = process.kill();
            let _ = process.wait();
            return Err(Error::DecodeUnavailable(
                "FFmpeg stdout not available".to_string(),
            ));
        }

        tracing::debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = info.frame_rate,
            duration = info.duration_secs,
            "opened ffmpeg frame source"
        );

        Ok(Self {
            info,
            process,
            stdout,
            pool: FramePool::for_frames(info.width, info.height, POOL_BUFFERS),
            frames_read: 0,
        })
    }

    /// Pool the frame buffers are leased from
    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    fn finish(&mut self) -> Result<()> {
        drop(self.stdout.take());
        let status = self
            .process
            .wait()
            .map_err(|e| Error::DecodeUnavailable(format!("FFmpeg process error: {}", e)))?;

        if !status.success() {
            return Err(Error::DecodeUnavailable(format!(
                "ffmpeg decoder exited with {} after {} frames",
                status, self.frames_read
            )));
        }
        if self.frames_read == 0 {
            return Err(Error::DecodeUnavailable(
                "source contains no decodable frames".to_string(),
            ));
        }
        Ok(())
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buffer = self.pool.lease();
        let filled = read_full(stdout, &mut buffer)
            .map_err(|e| Error::DecodeUnavailable(format!("Failed to read frame: {}", e)))?;

        if filled == 0 {
            drop(buffer);
            self.finish()?;
            return Ok(None);
        }
        if filled < buffer.len() {
            drop(buffer);
            drop(self.stdout.take());
            return Err(Error::DecodeUnavailable(format!(
                "truncated frame {}: {} of {} bytes",
                self.frames_read,
                filled,
                self.pool.buffer_size()
            )));
        }

        let frame = RawFrame::new(
            self.info.width,
            self.info.height,
            self.info.timestamp_us(self.frames_read),
            buffer,
        );
        self.frames_read += 1;
        tracing::trace!(index = self.frames_read, "decoded frame");
        Ok(Some(frame))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        drop(self.stdout.take());
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Fill `buf` from `reader`, returning the byte count (short only at EOF)
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Get video information using ffprobe
fn probe_video(toolchain: &Toolchain, path: &Path) -> Result<SourceInfo> {
    if !path.exists() {
        return Err(Error::DecodeUnavailable(format!(
            "file not found: {}",
            path.display()
        )));
    }

    let output = Command::new(&toolchain.ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,avg_frame_rate:stream_side_data=rotation\
             :stream_tags=rotate:format=duration",
            "-of",
            "default=noprint_wrappers=1",
        ])
        .arg(path)
        .output()
        .map_err(|e| Error::DecodeUnavailable(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(Error::DecodeUnavailable(format!(
            "ffprobe rejected {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `key=value` lines printed by ffprobe.
///
/// Width and height are reported in display orientation, matching what the
/// autorotating decoder writes to the pipe.
fn parse_probe_output(text: &str) -> Result<SourceInfo> {
    let mut width = None;
    let mut height = None;
    let mut r_frame_rate = None;
    let mut avg_frame_rate = None;
    let mut rotation = None;
    let mut rotate_tag = None;
    let mut duration = None;

    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            "width" => width = value.parse::<u32>().ok(),
            "height" => height = value.parse::<u32>().ok(),
            "r_frame_rate" => r_frame_rate = parse_rational(value),
            "avg_frame_rate" => avg_frame_rate = parse_rational(value),
            "rotation" => rotation = value.parse::<f64>().ok(),
            "TAG:rotate" => rotate_tag = value.parse::<f64>().ok(),
            "duration" => duration = value.parse::<f64>().ok(),
            _ => {}
        }
    }

    let (width, height) = match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(Error::DecodeUnavailable(
                "no video stream found".to_string(),
            ))
        }
    };

    // Display matrix side data takes precedence over the legacy tag
    let (width, height) = if is_quarter_turn(rotation.or(rotate_tag).unwrap_or(0.0)) {
        (height, width)
    } else {
        (width, height)
    };

    Ok(SourceInfo {
        width,
        height,
        frame_rate: guess_frame_rate(r_frame_rate, avg_frame_rate).unwrap_or(30.0),
        duration_secs: duration.filter(|d| d.is_finite() && *d >= 0.0).unwrap_or(0.0),
    })
}

/// Whether a rotation in degrees is 90 or 270 modulo a full turn
fn is_quarter_turn(degrees: f64) -> bool {
    if !degrees.is_finite() {
        return false;
    }
    let turned = (degrees.round() as i64).rem_euclid(360);
    turned == 90 || turned == 270
}

/// Pick the rate ffmpeg itself would use for constant-rate output.
///
/// Container timebases such as 1000/1 show up as `r_frame_rate` for variable
/// rate streams; the average rate wins whenever it looks like a real video rate.
fn guess_frame_rate(r_frame_rate: Option<f64>, avg_frame_rate: Option<f64>) -> Option<f64> {
    let valid = |f: &f64| f.is_finite() && *f > 0.0;
    match (r_frame_rate.filter(valid), avg_frame_rate.filter(valid)) {
        (Some(r), Some(avg)) if r > 210.0 && avg < 70.0 => Some(avg),
        (Some(r), _) => Some(r),
        (None, avg) => avg,
    }
}

/// Parse a frame rate such as "30/1", "30000/1001" or "25"
fn parse_rational(value: &str) -> Option<f64> {
    match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => value.parse().ok(),
    }
}
