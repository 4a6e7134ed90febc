//! Common test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vidshrink::encoder::{EncodedSample, Encoder, EncoderConfig, ParameterSets};
use vidshrink::frame::{FramePool, RawFrame};
use vidshrink::source::{FrameSource, SourceInfo};
use vidshrink::{CancelToken, Error, MediaBackend, ProgressEvent, Result, SourceAsset, Stage};

pub const FAKE_SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1E];
pub const FAKE_PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

/// Check if ffmpeg is available
pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Behaviour of the fake backend and everything it creates
#[derive(Debug, Clone)]
pub struct FakeBehavior {
    pub supported: bool,
    pub info: SourceInfo,
    /// Frames actually yielded, independent of the declared duration
    pub frame_count: u64,
    pub fail_open: bool,
    /// Frames the encoder holds back before emitting a sample
    pub latency: usize,
    /// Drop every n-th accepted frame
    pub drop_every: Option<u64>,
    /// Fail the encode call for this zero-based frame index
    pub fail_encode_at: Option<u64>,
    /// Cancel this token once the given number of frames has been yielded
    pub cancel_after: Option<(u64, CancelToken)>,
    pub sample_size: usize,
}

impl FakeBehavior {
    /// Source of `frame_count` frames whose declared duration matches
    pub fn new(width: u32, height: u32, frame_rate: f64, frame_count: u64) -> Self {
        Self {
            supported: true,
            info: SourceInfo {
                width,
                height,
                frame_rate,
                duration_secs: frame_count as f64 / frame_rate,
            },
            frame_count,
            fail_open: false,
            latency: 0,
            drop_every: None,
            fail_encode_at: None,
            cancel_after: None,
            sample_size: 64,
        }
    }
}

/// Calls observed by the fake backend
#[derive(Debug, Default)]
pub struct Calls {
    pub probes: AtomicUsize,
    pub sources_opened: AtomicUsize,
    pub encoders_created: AtomicUsize,
    pub frames_yielded: AtomicUsize,
}

impl Calls {
    pub fn sources_opened(&self) -> usize {
        self.sources_opened.load(Ordering::SeqCst)
    }

    pub fn encoders_created(&self) -> usize {
        self.encoders_created.load(Ordering::SeqCst)
    }

    pub fn frames_yielded(&self) -> usize {
        self.frames_yielded.load(Ordering::SeqCst)
    }
}

pub struct FakeBackend {
    pub behavior: FakeBehavior,
    pub calls: Arc<Calls>,
    pub pool: FramePool,
}

impl FakeBackend {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Calls::default()),
            // Frame contents are never inspected, keep buffers tiny
            pool: FramePool::new(16, 4),
        }
    }
}

impl MediaBackend for FakeBackend {
    fn supported(&self) -> bool {
        self.calls.probes.fetch_add(1, Ordering::SeqCst);
        self.behavior.supported
    }

    fn unsupported_reason(&self) -> Option<String> {
        (!self.behavior.supported).then(|| "fake backend disabled".to_string())
    }

    fn open_source(&self, asset: &SourceAsset) -> Result<Box<dyn FrameSource>> {
        self.calls.sources_opened.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_open {
            return Err(Error::DecodeUnavailable(format!(
                "cannot play {}",
                asset.name()
            )));
        }
        Ok(Box::new(FakeSource {
            info: self.behavior.info,
            frame_count: self.behavior.frame_count,
            next_index: 0,
            pool: self.pool.clone(),
            calls: Arc::clone(&self.calls),
            cancel_after: self.behavior.cancel_after.clone(),
        }))
    }

    fn create_encoder(&self, config: EncoderConfig) -> Result<Box<dyn Encoder>> {
        self.calls.encoders_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEncoder::new(config, &self.behavior)))
    }
}

pub struct FakeSource {
    info: SourceInfo,
    frame_count: u64,
    next_index: u64,
    pool: FramePool,
    calls: Arc<Calls>,
    cancel_after: Option<(u64, CancelToken)>,
}

impl FrameSource for FakeSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.next_index >= self.frame_count {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        self.calls.frames_yielded.fetch_add(1, Ordering::SeqCst);

        if let Some((after, token)) = &self.cancel_after {
            if self.next_index >= *after {
                token.cancel();
            }
        }

        Ok(Some(RawFrame::new(
            self.info.width,
            self.info.height,
            self.info.timestamp_us(index),
            self.pool.lease(),
        )))
    }
}

/// Encoder producing deterministic fake AVCC samples
pub struct FakeEncoder {
    config: EncoderConfig,
    latency: usize,
    drop_every: Option<u64>,
    fail_encode_at: Option<u64>,
    sample_size: usize,
    pending: VecDeque<u64>,
    ready: Vec<EncodedSample>,
    accepted: u64,
    emitted: u64,
    parameter_sets: Option<ParameterSets>,
}

impl FakeEncoder {
    pub fn new(config: EncoderConfig, behavior: &FakeBehavior) -> Self {
        Self {
            config,
            latency: behavior.latency,
            drop_every: behavior.drop_every,
            fail_encode_at: behavior.fail_encode_at,
            sample_size: behavior.sample_size.max(2),
            pending: VecDeque::new(),
            ready: Vec::new(),
            accepted: 0,
            emitted: 0,
            parameter_sets: None,
        }
    }

    fn emit(&mut self) {
        let dts = self.emitted as i64;
        let is_sync = self.emitted % self.config.keyframe_interval.max(1) as u64 == 0;

        let mut data = Vec::with_capacity(self.sample_size + 4);
        data.extend_from_slice(&(self.sample_size as u32).to_be_bytes());
        data.push(if is_sync { 0x65 } else { 0x41 });
        data.extend((1..self.sample_size).map(|i| (i as u64 + self.emitted) as u8));

        self.parameter_sets.get_or_insert_with(|| ParameterSets {
            sps: FAKE_SPS.to_vec(),
            pps: FAKE_PPS.to_vec(),
        });
        self.ready.push(EncodedSample {
            data,
            dts,
            pts: dts,
            composition_offset: 0,
            is_sync,
        });
        self.emitted += 1;
    }
}

impl Encoder for FakeEncoder {
    fn encode(&mut self, frame: RawFrame) -> Result<()> {
        let index = self.accepted;
        if self.fail_encode_at == Some(index) {
            frame.release();
            return Err(Error::Encode(format!("injected failure at frame {}", index)));
        }
        if (frame.width, frame.height) != (self.config.input_width, self.config.input_height) {
            return Err(Error::Encode("frame size changed".to_string()));
        }
        frame.release();
        self.accepted += 1;

        let dropped = self.drop_every.is_some_and(|n| (index + 1) % n == 0);
        if !dropped {
            self.pending.push_back(index);
        }
        while self.pending.len() > self.latency {
            self.pending.pop_front();
            self.emit();
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<Vec<EncodedSample>> {
        Ok(std::mem::take(&mut self.ready))
    }

    fn flush(&mut self) -> Result<Vec<EncodedSample>> {
        while self.pending.pop_front().is_some() {
            self.emit();
        }
        Ok(std::mem::take(&mut self.ready))
    }

    fn parameter_sets(&self) -> Option<ParameterSets> {
        self.parameter_sets.clone()
    }

    fn frames_accepted(&self) -> u64 {
        self.accepted
    }

    fn samples_emitted(&self) -> u64 {
        self.emitted
    }
}

/// Assert fixed stage order and per-stage increasing percent
pub fn assert_progress_well_formed(events: &[ProgressEvent]) {
    for pair in events.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        assert!(a.stage <= b.stage, "stage regressed: {:?} -> {:?}", a, b);
        if a.stage == b.stage {
            assert!(a.percent < b.percent, "percent regressed: {:?} -> {:?}", a, b);
        }
    }
}

/// Distinct stages in the order first observed
pub fn stages(events: &[ProgressEvent]) -> Vec<Stage> {
    let mut stages: Vec<Stage> = Vec::new();
    for event in events {
        if stages.last() != Some(&event.stage) {
            stages.push(event.stage);
        }
    }
    stages
}

/// Parse MP4 bytes with the mp4 crate's reader
pub fn read_mp4(data: Vec<u8>) -> mp4::Mp4Reader<Cursor<Vec<u8>>> {
    let size = data.len() as u64;
    mp4::Mp4Reader::read_header(Cursor::new(data), size).expect("output is not a readable MP4")
}

/// Parse MP4 header to verify it's a valid MP4 file
pub fn verify_mp4_header<P: AsRef<Path>>(path: P) -> bool {
    use std::io::Read;

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };

    let mut header = [0u8; 12];
    if file.read_exact(&mut header).is_err() {
        return false;
    }

    // MP4 files have 'ftyp' box at offset 4
    &header[4..8] == b"ftyp"
}

/// Asset description for a file that only exists as metadata
pub fn virtual_asset(name: &str, size: u64) -> SourceAsset {
    SourceAsset::new(format!("/virtual/{}", name), name, size)
}
