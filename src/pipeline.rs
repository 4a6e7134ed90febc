//! Compression pipeline
//!
//! The coordinator checks the asset size, probes the backend, then drives a
//! single pass: pull a frame, hand it to the encoder, move whatever samples
//! are ready into the muxer. When the source is exhausted the encoder is
//! flushed and the container finalized.

use crate::asset::{
    replace_extension, CompressedAsset, CompressionReport, Output, SourceAsset,
    OUTPUT_CONTENT_TYPE, OUTPUT_EXTENSION,
};
use crate::backend::{FfmpegBackend, MediaBackend};
use crate::encoder::{EncodedSample, Encoder, EncoderConfig};
use crate::muxer::{Muxer, TrackDescriptor, TrackHandle};
use crate::progress::{
    compressing_percent, ProgressEvent, ProgressReporter, Stage, COMPRESSING_SPAN,
};
use crate::size::{check_file_size, format_file_size};
use crate::{CompressOptions, Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    CheckingSize,
    ShortCircuit,
    Initializing,
    Preparing,
    Compressing,
    Packaging,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }

    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Idle, CheckingSize)
            | (CheckingSize, ShortCircuit)
            | (CheckingSize, Initializing)
            | (ShortCircuit, Completed)
            | (Initializing, Preparing)
            | (Preparing, Compressing)
            | (Compressing, Packaging)
            | (Packaging, Completed) => true,
            _ => false,
        }
    }

    /// Stage reported for failures raised in this state
    fn error_stage(self) -> Stage {
        match self {
            PipelineState::Idle
            | PipelineState::CheckingSize
            | PipelineState::ShortCircuit
            | PipelineState::Initializing => Stage::Initializing,
            PipelineState::Preparing => Stage::Preparing,
            PipelineState::Compressing => Stage::Compressing,
            PipelineState::Packaging => Stage::Packaging,
            PipelineState::Completed | PipelineState::Failed => Stage::Completed,
        }
    }
}

/// Tracks one run's state and logs its transitions
struct StateMachine<'a> {
    state: PipelineState,
    asset: &'a str,
}

impl<'a> StateMachine<'a> {
    fn new(asset: &'a str) -> Self {
        Self {
            state: PipelineState::Idle,
            asset,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid pipeline transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::info!(asset = self.asset, from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
    }

    fn fail(&mut self, error: Error) -> Error {
        let error = error.at(self.state.error_stage());
        tracing::info!(asset = self.asset, from = ?self.state, error = %error, "pipeline failed");
        self.state = PipelineState::Failed;
        error
    }
}

/// Cooperative cancellation flag shared with the caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Moves encoder output into the muxer, adding the track on first output
struct SampleSink<'a> {
    muxer: Box<dyn Muxer>,
    config: &'a EncoderConfig,
    track: Option<TrackHandle>,
}

impl SampleSink<'_> {
    fn write(&mut self, encoder: &dyn Encoder, samples: Vec<EncodedSample>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let track = match self.track {
            Some(track) => track,
            None => {
                let parameter_sets = encoder.parameter_sets().ok_or_else(|| {
                    Error::Encode("encoder emitted samples without SPS/PPS".to_string())
                })?;
                let track = self
                    .muxer
                    .add_track(TrackDescriptor::from_encoder(self.config, parameter_sets))?;
                self.track = Some(track);
                track
            }
        };

        for sample in samples {
            self.muxer.add_sample(track, sample)?;
        }
        Ok(())
    }
}

/// Pipeline coordinator
pub struct Compressor<B> {
    backend: B,
    options: CompressOptions,
}

impl<B: MediaBackend> Compressor<B> {
    pub fn new(backend: B, options: CompressOptions) -> Self {
        Self { backend, options }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &CompressOptions {
        &self.options
    }

    /// Compress `asset`, reporting progress through `progress`.
    ///
    /// Events are deduplicated: the callback fires only when the stage or
    /// percent changes, not once per frame.
    pub fn compress(
        &self,
        asset: &SourceAsset,
        progress: impl FnMut(ProgressEvent),
    ) -> Result<Output> {
        self.compress_with_cancel(asset, progress, &CancelToken::new())
    }

    pub fn compress_with_cancel(
        &self,
        asset: &SourceAsset,
        mut progress: impl FnMut(ProgressEvent),
        cancel: &CancelToken,
    ) -> Result<Output> {
        self.options.validate_size_policy()?;

        let mut reporter = ProgressReporter::new(&mut progress);
        let mut machine = StateMachine::new(asset.name());

        machine.advance(PipelineState::CheckingSize);
        let check = check_file_size(asset.size(), &self.options);
        tracing::info!(
            asset = asset.name(),
            size = %format_file_size(check.actual_size),
            target = %format_file_size(self.options.target_size),
            "checking size"
        );
        if !check.is_valid {
            tracing::warn!(
                asset = asset.name(),
                max = %format_file_size(check.max_size),
                "asset exceeds the upload limit"
            );
        }

        if !check.needs_compression {
            machine.advance(PipelineState::ShortCircuit);
            machine.advance(PipelineState::Completed);
            reporter.report(Stage::Completed, 100);
            return Ok(Output::Original(asset.clone()));
        }
        self.options.validate()?;

        match self.run(asset, &mut machine, &mut reporter, cancel) {
            Ok(compressed) => {
                machine.advance(PipelineState::Completed);
                reporter.report(Stage::Completed, 100);
                Ok(Output::Compressed(compressed))
            }
            Err(e) => Err(machine.fail(e)),
        }
    }

    fn run(
        &self,
        asset: &SourceAsset,
        machine: &mut StateMachine<'_>,
        reporter: &mut ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<CompressedAsset> {
        machine.advance(PipelineState::Initializing);
        reporter.report(Stage::Initializing, 0);
        if !self.backend.supported() {
            return Err(Error::UnsupportedEnvironment(
                self.backend
                    .unsupported_reason()
                    .unwrap_or_else(|| "video encoding is not supported".to_string()),
            ));
        }
        check_cancel(cancel)?;

        machine.advance(PipelineState::Preparing);
        reporter.report(Stage::Preparing, 10);
        let mut source = self.backend.open_source(asset)?;
        let info = source.info();
        let estimated_frames = info.estimated_frames();
        let config = EncoderConfig::for_source(&info, &self.options);
        tracing::debug!(
            width = info.width,
            height = info.height,
            frame_rate = info.frame_rate,
            estimated_frames,
            ?config,
            "source opened"
        );
        let mut encoder = self.backend.create_encoder(config.clone())?;
        let mut sink = SampleSink {
            muxer: self.backend.create_muxer()?,
            config: &config,
            track: None,
        };

        machine.advance(PipelineState::Compressing);
        reporter.report(Stage::Compressing, 0);
        let mut frames_decoded: u64 = 0;
        loop {
            check_cancel(cancel)?;
            let Some(frame) = source.next_frame()? else {
                break;
            };
            frames_decoded += 1;
            tracing::trace!(frame = frames_decoded, timestamp_us = frame.timestamp_us, "frame");

            encoder.encode(frame)?;
            let ready = encoder.drain()?;
            sink.write(encoder.as_ref(), ready)?;
            reporter.report(
                Stage::Compressing,
                compressing_percent(frames_decoded, estimated_frames),
            );
        }
        drop(source);

        if frames_decoded == 0 {
            return Err(Error::DecodeUnavailable(format!(
                "no frames decoded from {}",
                asset.name()
            )));
        }
        if frames_decoded.abs_diff(estimated_frames) > 1 {
            tracing::warn!(
                decoded = frames_decoded,
                estimated = estimated_frames,
                "decoded frame count differs from the estimate"
            );
        }

        let tail = encoder.flush()?;
        sink.write(encoder.as_ref(), tail)?;
        reporter.report(Stage::Compressing, COMPRESSING_SPAN);

        let samples_written = sink.muxer.sample_count();
        if encoder.frames_accepted() != frames_decoded || samples_written > frames_decoded {
            return Err(Error::Encode(format!(
                "encoder accounting mismatch: {} frames decoded, {} accepted, {} samples",
                frames_decoded,
                encoder.frames_accepted(),
                samples_written
            )));
        }
        let frames_dropped = encoder.frames_dropped();
        if frames_dropped > 0 {
            tracing::info!(frames_dropped, "encoder dropped frames");
        }
        drop(encoder);

        machine.advance(PipelineState::Packaging);
        reporter.report(Stage::Packaging, 90);
        let data = sink.muxer.finalize()?;

        let compressed_size = data.len() as u64;
        if compressed_size > self.options.target_size {
            tracing::warn!(
                asset = asset.name(),
                size = %format_file_size(compressed_size),
                target = %format_file_size(self.options.target_size),
                "compressed output is still above the target size"
            );
        }

        let report = CompressionReport {
            frames_decoded,
            samples_written,
            frames_dropped,
            estimated_frames,
            original_size: asset.size(),
            compressed_size,
        };
        tracing::debug!(?report, "compression finished");

        Ok(CompressedAsset {
            name: replace_extension(asset.name(), OUTPUT_EXTENSION),
            content_type: OUTPUT_CONTENT_TYPE,
            data,
            report,
        })
    }
}

fn check_cancel(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Compress a file on disk with the ffmpeg backend.
///
/// Returns the path of the written MP4, or the input path when the file was
/// already below the target size. Nothing is written on failure.
pub fn compress_file<P, Q>(
    input: P,
    output_dir: Q,
    options: &CompressOptions,
    progress: impl FnMut(ProgressEvent),
) -> Result<PathBuf>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let asset = SourceAsset::open(input)?;
    let backend = FfmpegBackend::new(options.ffmpeg_path.clone());
    let compressor = Compressor::new(backend, options.clone());

    match compressor.compress(&asset, progress)? {
        Output::Original(original) => Ok(original.path().to_path_buf()),
        Output::Compressed(compressed) => {
            let destination = output_dir.as_ref().join(&compressed.name);
            if same_file(&destination, asset.path()) {
                return Err(Error::InvalidInput(format!(
                    "output would overwrite the source: {}",
                    destination.display()
                )));
            }
            compressed.write_to(output_dir)
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
