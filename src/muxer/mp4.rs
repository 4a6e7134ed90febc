//! MP4 container muxer

use super::{CodecId, Muxer, TrackDescriptor, TrackHandle};
use crate::encoder::EncodedSample;
use crate::{Error, Result};
use mp4::{Mp4Config, Mp4Writer, TrackConfig};
use std::io::Cursor;

/// Track ID is always 1 for single track
const TRACK_ID: u32 = 1;

/// Movie header timescale (milliseconds)
const MOVIE_TIMESCALE: u32 = 1000;

struct TrackState {
    handle: TrackHandle,
    last_dts: Option<i64>,
}

enum State {
    Open {
        writer: Box<Mp4Writer<Cursor<Vec<u8>>>>,
        track: Option<TrackState>,
    },
    Finalized,
}

/// In-memory MP4 muxer (H.264 only)
pub struct Mp4Muxer {
    state: State,
    sample_count: u64,
}

impl Mp4Muxer {
    pub fn new() -> Result<Self> {
        let mp4_config = Mp4Config {
            major_brand: str_to_brand("isom"),
            minor_version: 512,
            compatible_brands: vec![
                str_to_brand("isom"),
                str_to_brand("iso2"),
                str_to_brand("avc1"),
                str_to_brand("mp41"),
            ],
            timescale: MOVIE_TIMESCALE,
        };

        let writer = Mp4Writer::write_start(Cursor::new(Vec::new()), &mp4_config)
            .map_err(|e| Error::Mux(format!("Failed to create MP4 writer: {}", e)))?;

        Ok(Self {
            state: State::Open {
                writer: Box::new(writer),
                track: None,
            },
            sample_count: 0,
        })
    }
}

impl Muxer for Mp4Muxer {
    fn add_track(&mut self, descriptor: TrackDescriptor) -> Result<TrackHandle> {
        let State::Open { writer, track } = &mut self.state else {
            return Err(Error::Mux("add_track after finalize".to_string()));
        };
        if track.is_some() {
            return Err(Error::Mux("track already added".to_string()));
        }

        let CodecId::Avc1 = descriptor.codec;
        let width = u16::try_from(descriptor.width)
            .map_err(|_| Error::Mux(format!("width {} too large", descriptor.width)))?;
        let height = u16::try_from(descriptor.height)
            .map_err(|_| Error::Mux(format!("height {} too large", descriptor.height)))?;
        if width == 0 || height == 0 || descriptor.timescale == 0 {
            return Err(Error::Mux(format!(
                "invalid track geometry {}x{} @ {}",
                descriptor.width, descriptor.height, descriptor.timescale
            )));
        }
        // avcC copies profile, compatibility and level out of the SPS header
        if descriptor.parameter_sets.sps.len() < 4 || descriptor.parameter_sets.pps.is_empty() {
            return Err(Error::Mux("incomplete SPS/PPS".to_string()));
        }

        let track_config = TrackConfig {
            track_type: mp4::TrackType::Video,
            timescale: descriptor.timescale,
            language: String::from("und"),
            media_conf: mp4::MediaConfig::AvcConfig(mp4::AvcConfig {
                width,
                height,
                seq_param_set: descriptor.parameter_sets.sps,
                pic_param_set: descriptor.parameter_sets.pps,
            }),
        };

        writer
            .add_track(&track_config)
            .map_err(|e| Error::Mux(format!("Failed to add track: {}", e)))?;

        let handle = TrackHandle(TRACK_ID);
        *track = Some(TrackState {
            handle,
            last_dts: None,
        });
        tracing::debug!(width, height, timescale = descriptor.timescale, "added mp4 track");
        Ok(handle)
    }

    fn add_sample(&mut self, handle: TrackHandle, sample: EncodedSample) -> Result<()> {
        let State::Open { writer, track } = &mut self.state else {
            return Err(Error::Mux("add_sample after finalize".to_string()));
        };
        let track = match track {
            Some(track) if track.handle == handle => track,
            Some(_) => return Err(Error::Mux(format!("unknown track {}", handle.id()))),
            None => return Err(Error::Mux("add_sample before add_track".to_string())),
        };
        if sample.data.is_empty() {
            return Err(Error::Mux("empty sample payload".to_string()));
        }
        if sample.dts < 0 || track.last_dts.is_some_and(|last| sample.dts < last) {
            return Err(Error::Mux(format!(
                "sample dts {} out of order (previous {:?})",
                sample.dts, track.last_dts
            )));
        }

        let mp4_sample = mp4::Mp4Sample {
            start_time: sample.dts as u64,
            duration: 1,
            rendering_offset: sample.composition_offset,
            is_sync: sample.is_sync,
            bytes: mp4::Bytes::from(sample.data),
        };

        writer
            .write_sample(handle.id(), &mp4_sample)
            .map_err(|e| Error::Mux(format!("Failed to write sample: {}", e)))?;

        track.last_dts = Some(sample.dts);
        self.sample_count += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        let State::Open { mut writer, track } = std::mem::replace(&mut self.state, State::Finalized)
        else {
            return Err(Error::Mux("finalize called twice".to_string()));
        };
        if track.is_none() {
            return Err(Error::Mux("finalize without a track".to_string()));
        }
        if self.sample_count == 0 {
            return Err(Error::Mux("finalize without samples".to_string()));
        }

        writer
            .write_end()
            .map_err(|e| Error::Mux(format!("Failed to finalize MP4: {}", e)))?;

        let bytes = writer.into_writer().into_inner();
        tracing::debug!(
            samples = self.sample_count,
            bytes = bytes.len(),
            "finalized mp4"
        );
        Ok(bytes)
    }

    fn sample_count(&self) -> u64 {
        self.sample_count
    }
}

fn str_to_brand(s: &str) -> mp4::FourCC {
    let bytes = s.as_bytes();
    mp4::FourCC {
        value: [
            bytes.first().copied().unwrap_or(0),
            bytes.get(1).copied().unwrap_or(0),
            bytes.get(2).copied().unwrap_or(0),
            bytes.get(3).copied().unwrap_or(0),
        ],
    }
}
