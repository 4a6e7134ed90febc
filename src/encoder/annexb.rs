//! H.264 Annex B stream splitting
//!
//! x264 writes a byte stream of start-code delimited NAL units. MP4 wants
//! one sample per access unit, with each NAL prefixed by its 4-byte length
//! (AVCC) and the parameter sets moved into the track's `avcC` box.
//! [`AccessUnitAssembler`] accepts the byte stream in arbitrary chunks and
//! hands out complete access units.

use super::ParameterSets;

/// H.264 NAL unit type constants
pub mod nal_type {
    pub const NON_IDR_SLICE: u8 = 1;
    pub const IDR_SLICE: u8 = 5;
    pub const SEI: u8 = 6;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
}

/// NAL unit type from the header byte
pub fn nal_unit_type(nal: &[u8]) -> u8 {
    nal.first().map(|b| b & 0x1F).unwrap_or(0)
}

fn is_slice(kind: u8) -> bool {
    (nal_type::NON_IDR_SLICE..=nal_type::IDR_SLICE).contains(&kind)
}

/// Whether a slice NAL starts a new picture (`first_mb_in_slice == 0`).
///
/// `first_mb_in_slice` is the first ue(v) field of the slice header; it is
/// zero exactly when its leading bit is set.
fn starts_picture(nal: &[u8]) -> bool {
    nal.get(1).map(|b| b & 0x80 != 0).unwrap_or(true)
}

/// Find H.264 start code in data, returning its position and length
pub fn find_start_code(data: &[u8], start: usize) -> Option<(usize, usize)> {
    if data.len() < 3 || start > data.len() - 3 {
        return None;
    }

    for i in start..=data.len() - 3 {
        if data[i] == 0x00 && data[i + 1] == 0x00 {
            if data[i + 2] == 0x01 {
                return Some((i, 3));
            }
            if i + 3 < data.len() && data[i + 2] == 0x00 && data[i + 3] == 0x01 {
                return Some((i, 4));
            }
        }
    }

    None
}

/// Split a complete Annex B buffer into NAL unit payloads
pub fn split_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut nals = Vec::new();
    let Some((mut pos, mut len)) = find_start_code(data, 0) else {
        return nals;
    };

    loop {
        let body = pos + len;
        let next = find_start_code(data, body);
        let end = next.map(|(p, _)| p).unwrap_or(data.len());
        let nal = trim_trailing_zeros(&data[body..end]);
        if !nal.is_empty() {
            nals.push(nal);
        }
        match next {
            Some((p, l)) => {
                pos = p;
                len = l;
            }
            None => break,
        }
    }

    nals
}

fn trim_trailing_zeros(nal: &[u8]) -> &[u8] {
    let end = nal.iter().rposition(|&b| b != 0).map(|i| i + 1).unwrap_or(0);
    &nal[..end]
}

/// One coded picture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// NAL units without start codes, parameter sets and delimiters excluded
    pub nals: Vec<Vec<u8>>,
    /// Contains an IDR slice
    pub is_idr: bool,
}

impl AccessUnit {
    /// Serialize as 4-byte length-prefixed NAL units
    pub fn to_avcc(&self) -> Vec<u8> {
        let total: usize = self.nals.iter().map(|n| n.len() + 4).sum();
        let mut out = Vec::with_capacity(total);
        for nal in &self.nals {
            out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
            out.extend_from_slice(nal);
        }
        out
    }
}

/// Incremental Annex B to access unit splitter
#[derive(Debug, Default)]
pub struct AccessUnitAssembler {
    pending: Vec<u8>,
    /// Offset in `pending` from which the next start code search resumes
    scan_from: usize,
    current: Vec<Vec<u8>>,
    current_has_slice: bool,
    current_is_idr: bool,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl AccessUnitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed stream bytes, returning the access units they completed
    pub fn push(&mut self, bytes: &[u8]) -> Vec<AccessUnit> {
        self.pending.extend_from_slice(bytes);
        let mut units = Vec::new();

        loop {
            let Some((first, first_len)) = find_start_code(&self.pending, 0) else {
                break;
            };
            if first > 0 {
                // Bytes before the first start code carry no NAL
                self.pending.drain(..first);
                self.scan_from = 0;
                continue;
            }

            let search = self.scan_from.max(first_len);
            match find_start_code(&self.pending, search) {
                Some((next, _)) => {
                    let nal = trim_trailing_zeros(&self.pending[first_len..next]).to_vec();
                    self.pending.drain(..next);
                    self.scan_from = 0;
                    if let Some(unit) = self.accept(nal) {
                        units.push(unit);
                    }
                }
                None => {
                    self.scan_from = self.pending.len().saturating_sub(3).max(first_len);
                    break;
                }
            }
        }

        units
    }

    /// Flush the trailing NAL and access unit at end of stream
    pub fn finish(&mut self) -> Vec<AccessUnit> {
        let mut units = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        self.scan_from = 0;
        if let Some((first, len)) = find_start_code(&pending, 0) {
            let nal = trim_trailing_zeros(&pending[first + len..]).to_vec();
            if let Some(unit) = self.accept(nal) {
                units.push(unit);
            }
        }
        if let Some(unit) = self.take_current() {
            units.push(unit);
        }
        units
    }

    /// Latest SPS/PPS pair, once both have been seen
    pub fn parameter_sets(&self) -> Option<ParameterSets> {
        match (&self.sps, &self.pps) {
            (Some(sps), Some(pps)) => Some(ParameterSets {
                sps: sps.clone(),
                pps: pps.clone(),
            }),
            _ => None,
        }
    }

    fn accept(&mut self, nal: Vec<u8>) -> Option<AccessUnit> {
        if nal.is_empty() {
            return None;
        }
        let kind = nal_unit_type(&nal);

        let boundary = self.current_has_slice
            && if is_slice(kind) {
                starts_picture(&nal)
            } else {
                matches!(kind, nal_type::SEI..=nal_type::AUD | 14..=18)
            };
        let completed = if boundary { self.take_current() } else { None };

        match kind {
            nal_type::SPS => self.sps = Some(nal),
            nal_type::PPS => self.pps = Some(nal),
            nal_type::AUD => {}
            _ => {
                if is_slice(kind) {
                    self.current_has_slice = true;
                    self.current_is_idr |= kind == nal_type::IDR_SLICE;
                }
                self.current.push(nal);
            }
        }

        completed
    }

    fn take_current(&mut self) -> Option<AccessUnit> {
        if !self.current_has_slice {
            return None;
        }
        let unit = AccessUnit {
            nals: std::mem::take(&mut self.current),
            is_idr: self.current_is_idr,
        };
        self.current_has_slice = false;
        self.current_is_idr = false;
        Some(unit)
    }
}
