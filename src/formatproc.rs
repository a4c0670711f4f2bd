//! H.264 format processor: the bidirectional RTP ⇄ access-unit transform.
//!
//! Sits between the transport's packet callback and everything downstream:
//!
//! - tracks the stream's SPS/PPS, updating the cache whenever a packet or
//!   access unit carries a differing value;
//! - `remux`es access units: strips parameter sets and AU delimiters, and
//!   prefixes the cached SPS+PPS pair onto key frames so every IDR is
//!   independently decodable;
//! - when an incoming packet exceeds the transport's maximum payload
//!   size, switches the instance into re-encode mode — from then on,
//!   every decoded access unit is re-packetized within the size budget.
//!   The transition is one-way for the lifetime of the processor.

use std::time::{Duration, SystemTime};

use crate::error::{CameraError, Result};
use crate::media::h264::{H264Depacketizer, H264Packetizer, extract_params};
use crate::media::rtp::{RTP_HEADER_SIZE, RtpHeaderState, RtpPacket};
use crate::media::{AccessUnit, NaluCategory, NaluType, idr_present};

/// H.264 RTP clock rate (RFC 6184 §8.1).
pub const H264_CLOCK_RATE: u32 = 90_000;

/// The elementary unit routed through the pipeline: the RTP packets a
/// frame arrived in (or was re-encoded into), its timestamps, and the
/// remuxed access unit when decoding was requested.
///
/// An empty `au` means "nothing to emit" — either the depacketizer is
/// still buffering or remux filtered every NAL.
#[derive(Debug)]
pub struct H264Unit {
    pub rtp_packets: Vec<RtpPacket>,
    pub ntp: SystemTime,
    pub pts: Duration,
    pub au: AccessUnit,
}

impl H264Unit {
    pub fn has_keyframe(&self) -> bool {
        idr_present(&self.au)
    }
}

/// Stateful processor for one H.264 track.
pub struct H264Processor {
    max_payload_size: usize,
    payload_type: u8,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    param_updates: u64,
    decoder: Option<H264Depacketizer>,
    encoder: Option<H264Packetizer>,
}

impl H264Processor {
    /// `max_payload_size` is the largest serialized RTP packet the
    /// downstream transport accepts. `generate_rtp_packets` creates the
    /// encoder up front for output-side use ([`process_unit`](Self::process_unit)).
    pub fn new(
        max_payload_size: usize,
        payload_type: u8,
        sps: Option<Vec<u8>>,
        pps: Option<Vec<u8>>,
        generate_rtp_packets: bool,
    ) -> Self {
        let mut p = Self {
            max_payload_size,
            payload_type,
            sps,
            pps,
            param_updates: 0,
            decoder: None,
            encoder: None,
        };
        if generate_rtp_packets {
            p.encoder = Some(p.make_encoder(RtpHeaderState::with_random_ssrc(payload_type)));
        }
        p
    }

    fn make_encoder(&self, header: RtpHeaderState) -> H264Packetizer {
        H264Packetizer::new(header, self.max_payload_size - RTP_HEADER_SIZE)
    }

    /// Whether the one-way re-encode transition has happened.
    pub fn reencoding(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn sps(&self) -> Option<&[u8]> {
        self.sps.as_deref()
    }

    pub fn pps(&self) -> Option<&[u8]> {
        self.pps.as_deref()
    }

    /// Number of times the SPS/PPS cache was actually mutated.
    pub fn param_updates(&self) -> u64 {
        self.param_updates
    }

    /// Process one incoming RTP packet.
    ///
    /// Parameter sets embedded in the payload (single NAL or STAP-A) are
    /// cached first, unconditionally. Decoding happens when a non-RTSP
    /// reader asked for it, a depacketizer already exists, or re-encode
    /// mode is active. Buffering conditions from the depacketizer are not
    /// errors — the returned unit simply carries no access unit.
    pub fn process_rtp_packet(
        &mut self,
        pkt: RtpPacket,
        ntp: SystemTime,
        pts: Duration,
        has_decoded_readers: bool,
    ) -> Result<H264Unit> {
        self.update_params_from_rtp(&pkt.payload);

        if self.encoder.is_none() && pkt.marshal_size() > self.max_payload_size {
            // RTP packets exceed maximum size: start re-encoding them.
            // Seed sequence/SSRC from the camera's stream so downstream
            // consumers see a continuous stream.
            tracing::debug!(
                size = pkt.marshal_size(),
                max = self.max_payload_size,
                "oversized RTP packet, switching to re-encode mode"
            );
            let header = RtpHeaderState::new(self.payload_type, pkt.ssrc, pkt.sequence);
            self.encoder = Some(self.make_encoder(header));
        }

        let mut unit = H264Unit {
            rtp_packets: vec![pkt.clone()],
            ntp,
            pts,
            au: AccessUnit::new(),
        };

        if has_decoded_readers || self.decoder.is_some() || self.encoder.is_some() {
            let decoder = self.decoder.get_or_insert_with(H264Depacketizer::new);
            let decoded = decoder.decode(&pkt);

            if self.encoder.is_some() {
                // re-encode mode: never route the original packets
                unit.rtp_packets.clear();
            }

            match decoded {
                Ok(au) => unit.au = self.remux_access_unit(au),
                Err(e) if e.is_recoverable() => return Ok(unit),
                Err(e) => {
                    return Err(CameraError::Decode(format!("RTP depacketize: {e:?}")));
                }
            }
        }

        if let Some(encoder) = self.encoder.as_mut() {
            if !unit.au.is_empty() {
                let mut pkts = encoder.packetize(&unit.au);
                // preserve timing fidelity: re-encoded packets carry the
                // original packet's RTP timestamp
                for new_pkt in &mut pkts {
                    new_pkt.timestamp = pkt.timestamp;
                }
                unit.rtp_packets = pkts;
            }
        }

        Ok(unit)
    }

    /// Process a unit on the generation/output side: remux its access
    /// unit and, if anything survives, RTP-encode it with timestamps
    /// derived from the unit's presentation time.
    pub fn process_unit(&mut self, unit: &mut H264Unit) -> Result<()> {
        self.update_params_from_au(&unit.au);
        unit.au = self.remux_access_unit(std::mem::take(&mut unit.au));

        if unit.au.is_empty() {
            unit.rtp_packets.clear();
            return Ok(());
        }

        let Some(encoder) = self.encoder.as_mut() else {
            return Err(CameraError::Decode(
                "processor was built without an encoder".to_string(),
            ));
        };

        let mut pkts = encoder.packetize(&unit.au);
        // wraparound is expected for RTP timestamps
        let ticks = duration_to_ticks(unit.pts, H264_CLOCK_RATE) as u32;
        for pkt in &mut pkts {
            pkt.timestamp = pkt.timestamp.wrapping_add(ticks);
        }
        unit.rtp_packets = pkts;
        Ok(())
    }

    /// Remux an access unit: drop parameter sets and AU delimiters; when
    /// a key frame is present and both SPS and PPS are cached, prefix
    /// exactly one SPS and one PPS. Returns an empty unit when filtering
    /// removes everything.
    pub fn remux_access_unit(&self, au: AccessUnit) -> AccessUnit {
        let mut out = AccessUnit::new();
        let mut prefixed = false;

        for nalu in au {
            let Some(typ) = NaluType::of(&nalu) else {
                continue;
            };
            match typ.category() {
                NaluCategory::ParameterSet | NaluCategory::Delimiter => continue,
                NaluCategory::Slice | NaluCategory::Other => {}
            }

            if typ == NaluType::Idr && !prefixed {
                prefixed = true;
                if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
                    out.insert(0, pps.clone());
                    out.insert(0, sps.clone());
                }
            }
            out.push(nalu);
        }

        out
    }

    /// Update the cache from a raw RTP payload. A freshly observed value
    /// wins per side; a side missing from the observation keeps its
    /// cached value.
    fn update_params_from_rtp(&mut self, payload: &[u8]) {
        let (sps, pps) = extract_params(payload);
        self.apply_params(sps, pps);
    }

    /// Update the cache from a full access unit.
    fn update_params_from_au(&mut self, au: &[Vec<u8>]) {
        let mut sps = None;
        let mut pps = None;
        for nalu in au {
            match NaluType::of(nalu) {
                Some(NaluType::Sps) => sps = Some(nalu.clone()),
                Some(NaluType::Pps) => pps = Some(nalu.clone()),
                _ => {}
            }
        }
        self.apply_params(sps, pps);
    }

    fn apply_params(&mut self, sps: Option<Vec<u8>>, pps: Option<Vec<u8>>) {
        let sps_changed = matches!(&sps, Some(v) if Some(v.as_slice()) != self.sps.as_deref());
        let pps_changed = matches!(&pps, Some(v) if Some(v.as_slice()) != self.pps.as_deref());
        if !sps_changed && !pps_changed {
            return;
        }
        if sps_changed {
            tracing::debug!(len = sps.as_ref().map(Vec::len), "SPS updated from stream");
            self.sps = sps;
        }
        if pps_changed {
            tracing::debug!(len = pps.as_ref().map(Vec::len), "PPS updated from stream");
            self.pps = pps;
        }
        self.param_updates += 1;
    }
}

/// `v * m / d` without intermediate overflow: the whole-seconds part and
/// the remainder are multiplied separately, preserving resolution.
pub fn multiply_and_divide(v: i64, m: i64, d: i64) -> i64 {
    let secs = v / d;
    let dec = v % d;
    secs * m + dec * m / d
}

/// Convert a presentation duration to RTP clock ticks, overflow-safe.
pub fn duration_to_ticks(pts: Duration, clock_rate: u32) -> i64 {
    multiply_and_divide(pts.as_nanos() as i64, i64::from(clock_rate), 1_000_000_000)
}

/// Convert an unwrapped RTP tick count to a presentation duration.
pub fn ticks_to_duration(ticks: i64, clock_rate: u32) -> Duration {
    let nanos = multiply_and_divide(ticks, 1_000_000_000, i64::from(clock_rate));
    Duration::from_nanos(nanos.max(0) as u64)
}
