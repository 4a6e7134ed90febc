//! H.264 encoder using an ffmpeg/libx264 external process
//!
//! Raw RGBA frames are written to ffmpeg's stdin on the caller's thread. A
//! reader thread consumes the Annex B output on stdout, so a full output pipe
//! never blocks the writer, and forwards finished samples over a channel.

use super::annexb::AccessUnitAssembler;
use super::{EncodedSample, Encoder, EncoderConfig, ParameterSets};
use crate::frame::RawFrame;
use crate::toolchain::Toolchain;
use crate::{Error, Result};
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

const READ_CHUNK: usize = 64 * 1024;

/// Bytes of ffmpeg stderr kept for error messages
const STDERR_TAIL: usize = 4096;

type SampleMessage = std::result::Result<EncodedSample, String>;

/// FFmpeg-based H.264 encoder
pub struct FfmpegH264Encoder {
    process: Child,
    stdin: Option<ChildStdin>,
    config: EncoderConfig,
    samples: Receiver<SampleMessage>,
    parameter_sets: Arc<Mutex<Option<ParameterSets>>>,
    stderr_tail: Arc<Mutex<String>>,
    reader: Option<JoinHandle<()>>,
    stderr_reader: Option<JoinHandle<()>>,
    frames_accepted: u64,
    samples_emitted: u64,
    flushed: bool,
}

impl FfmpegH264Encoder {
    pub fn new(toolchain: &Toolchain, config: EncoderConfig) -> Result<Self> {
        let args = ffmpeg_args(&config);
        tracing::debug!(args = %args.join(" "), "starting ffmpeg encoder");

        let mut process = Command::new(&toolchain.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Encode(format!("Failed to start ffmpeg: {}", e)))?;

        let (stdin, stdout, stderr) = match (
            process.stdin.take(),
            process.stdout.take(),
            process.stderr.take(),
        ) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = process.kill();
                let _ = process.wait();
                return Err(Error::Encode("FFmpeg pipes not available".to_string()));
            }
        };

        let parameter_sets = Arc::new(Mutex::new(None));
        let stderr_tail = Arc::new(Mutex::new(String::new()));
        let (tx, rx) = mpsc::channel();

        let reader = {
            let parameter_sets = Arc::clone(&parameter_sets);
            std::thread::Builder::new()
                .name("h264-reader".to_string())
                .spawn(move || read_samples(stdout, tx, parameter_sets))?
        };
        let stderr_reader = {
            let tail = Arc::clone(&stderr_tail);
            std::thread::Builder::new()
                .name("h264-stderr".to_string())
                .spawn(move || collect_stderr(stderr, tail))?
        };

        Ok(Self {
            process,
            stdin: Some(stdin),
            config,
            samples: rx,
            parameter_sets,
            stderr_tail,
            reader: Some(reader),
            stderr_reader: Some(stderr_reader),
            frames_accepted: 0,
            samples_emitted: 0,
            flushed: false,
        })
    }

    fn stderr_message(&self) -> String {
        let tail = self.stderr_tail.lock().unwrap_or_else(|e| e.into_inner());
        tail.trim().to_string()
    }

    fn encode_error(&self, context: impl std::fmt::Display) -> Error {
        let stderr = self.stderr_message();
        if stderr.is_empty() {
            Error::Encode(context.to_string())
        } else {
            Error::Encode(format!("{}: {}", context, stderr))
        }
    }

    fn join_readers(&mut self) {
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.stderr_reader.take() {
            let _ = handle.join();
        }
    }
}

impl Encoder for FfmpegH264Encoder {
    fn encode(&mut self, frame: RawFrame) -> Result<()> {
        if self.flushed {
            return Err(Error::Encode("encoder already flushed".to_string()));
        }
        if frame.width != self.config.input_width || frame.height != self.config.input_height {
            return Err(Error::Encode(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.config.input_width, self.config.input_height
            )));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Encode("FFmpeg stdin not available".to_string()))?;

        // Write raw RGBA frame data; the buffer is released when `frame` drops
        if let Err(e) = stdin.write_all(frame.data()) {
            return Err(self.encode_error(format!("Failed to write frame: {}", e)));
        }
        frame.release();
        self.frames_accepted += 1;
        Ok(())
    }

    fn drain(&mut self) -> Result<Vec<EncodedSample>> {
        let mut ready = Vec::new();
        loop {
            match self.samples.try_recv() {
                Ok(Ok(sample)) => ready.push(sample),
                Ok(Err(message)) => return Err(self.encode_error(message)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.samples_emitted += ready.len() as u64;
        Ok(ready)
    }

    fn flush(&mut self) -> Result<Vec<EncodedSample>> {
        if self.flushed {
            return Ok(Vec::new());
        }
        self.flushed = true;

        // Close stdin to signal end of input
        drop(self.stdin.take());

        let mut remaining = Vec::new();
        let mut failure = None;
        // Blocks until the reader thread hangs up at end of stream
        for message in self.samples.iter() {
            match message {
                Ok(sample) => remaining.push(sample),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let status = self
            .process
            .wait()
            .map_err(|e| Error::Encode(format!("FFmpeg process error: {}", e)))?;
        self.join_readers();

        if let Some(message) = failure {
            return Err(self.encode_error(message));
        }
        if !status.success() {
            return Err(self.encode_error(format!("ffmpeg encoder exited with {}", status)));
        }

        self.samples_emitted += remaining.len() as u64;
        tracing::debug!(
            accepted = self.frames_accepted,
            emitted = self.samples_emitted,
            "ffmpeg encoder flushed"
        );
        Ok(remaining)
    }

    fn parameter_sets(&self) -> Option<ParameterSets> {
        self.parameter_sets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn frames_accepted(&self) -> u64 {
        self.frames_accepted
    }

    fn samples_emitted(&self) -> u64 {
        self.samples_emitted
    }
}

impl Drop for FfmpegH264Encoder {
    fn drop(&mut self) {
        drop(self.stdin.take());
        // Kill the process if it's still running
        let _ = self.process.kill();
        let _ = self.process.wait();
        self.join_readers();
    }
}

/// Command line for raw RGBA in, Annex B H.264 out
fn ffmpeg_args(config: &EncoderConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.extend([
        "-s".to_string(),
        format!("{}x{}", config.input_width, config.input_height),
        "-r".to_string(),
        format_rate(config.input_framerate),
        "-i".to_string(),
        "pipe:0".to_string(),
    ]);

    if config.rescales() {
        args.extend([
            "-vf".to_string(),
            format!("scale={}:{}", config.width, config.height),
        ]);
    }
    if config.resamples() {
        args.extend(["-r".to_string(), format_rate(config.framerate)]);
    }

    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "medium".to_string(),
        "-profile:v".to_string(),
        config.profile.x264_name().to_string(),
        "-b:v".to_string(),
        config.bitrate.to_string(),
        "-maxrate".to_string(),
        config.bitrate.to_string(),
        "-bufsize".to_string(),
        (config.bitrate as u64 * 2).to_string(),
        "-bf".to_string(),
        "0".to_string(),
        "-g".to_string(),
        config.keyframe_interval.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-f".to_string(),
        "h264".to_string(),
        "pipe:1".to_string(),
    ]);

    args
}

fn format_rate(fps: f64) -> String {
    let formatted = format!("{:.6}", fps);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Reader thread: split stdout into samples until EOF
fn read_samples(
    mut stdout: impl Read,
    tx: mpsc::Sender<SampleMessage>,
    parameter_sets: Arc<Mutex<Option<ParameterSets>>>,
) {
    let mut assembler = AccessUnitAssembler::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut index: i64 = 0;

    let mut forward = |units: Vec<super::annexb::AccessUnit>,
                       assembler: &AccessUnitAssembler|
     -> bool {
        if !units.is_empty() {
            let mut sets = parameter_sets.lock().unwrap_or_else(|e| e.into_inner());
            if sets.is_none() {
                *sets = assembler.parameter_sets();
            }
        }
        for unit in units {
            let sample = EncodedSample {
                data: unit.to_avcc(),
                dts: index,
                pts: index,
                composition_offset: 0,
                is_sync: unit.is_idr,
            };
            index += 1;
            if tx.send(Ok(sample)).is_err() {
                return false;
            }
        }
        true
    };

    loop {
        match stdout.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                let units = assembler.push(&buffer[..n]);
                if !forward(units, &assembler) {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Err(format!("Failed to read encoder output: {}", e)));
                return;
            }
        }
    }

    let units = assembler.finish();
    forward(units, &assembler);
}

fn collect_stderr(mut stderr: impl Read, tail: Arc<Mutex<String>>) {
    let mut buffer = [0u8; 1024];
    loop {
        match stderr.read(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut tail = tail.lock().unwrap_or_else(|e| e.into_inner());
                tail.push_str(&String::from_utf8_lossy(&buffer[..n]));
                if tail.len() > STDERR_TAIL {
                    let mut cut = tail.len() - STDERR_TAIL;
                    while !tail.is_char_boundary(cut) {
                        cut += 1;
                    }
                    tail.drain(..cut);
                }
            }
        }
    }
}
