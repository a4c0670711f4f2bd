//! H.264 RTP packetization and depacketization (RFC 6184).
//!
//! The receive path uses [`H264Depacketizer`] to reassemble access units
//! from camera packets; the re-encode path uses [`H264Packetizer`] to
//! split remuxed access units back into RTP-sized packets.
//!
//! Supported packetization modes:
//!
//! - **Single NAL Unit** (§5.6): the payload is one NAL unit.
//! - **STAP-A aggregation** (§5.7.1): several NALs in one packet, each
//!   prefixed with a 2-byte big-endian size.
//! - **FU-A fragmentation** (§5.8): one NAL split across packets, each
//!   fragment carrying a 2-byte FU header:
//!
//!   ```text
//!   FU indicator:  [F|NRI|Type=28]     (1 byte)
//!   FU header:     [S|E|R|NAL_Type]    (1 byte)
//!   Fragment data: [...]
//!   ```

use super::rtp::{RtpHeaderState, RtpPacket};
use super::{AccessUnit, NALU_TYPE_MASK, NaluType};

/// Receive-side conditions that are not failures.
///
/// `MorePacketsNeeded` and `NonStartingPacket` are routine buffering
/// states — the caller skips the packet and waits for more. `Malformed`
/// is fatal for the packet that produced it.
#[derive(Debug, PartialEq, Eq)]
pub enum DepacketizeError {
    /// The access unit (or FU-A fragment) is not complete yet.
    MorePacketsNeeded,
    /// A non-starting FU-A fragment arrived with no fragment in progress
    /// (typical right after joining a stream mid-frame).
    NonStartingPacket,
    /// The payload violates RFC 6184 framing.
    Malformed(&'static str),
}

impl DepacketizeError {
    /// Buffering conditions are expected and must not be treated as
    /// packet failures.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MorePacketsNeeded | Self::NonStartingPacket)
    }
}

/// Reassembles access units from an H.264 RTP stream.
///
/// NAL units are accumulated until a packet with the RTP marker bit
/// closes the access unit (RFC 6184 §5.1).
#[derive(Debug, Default)]
pub struct H264Depacketizer {
    au: AccessUnit,
    fragment: Vec<u8>,
    fragment_active: bool,
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one RTP packet; returns the completed access unit when the
    /// marker bit closes it.
    pub fn decode(&mut self, pkt: &RtpPacket) -> Result<AccessUnit, DepacketizeError> {
        let payload = &pkt.payload;
        if payload.is_empty() {
            return Err(DepacketizeError::Malformed("empty RTP payload"));
        }

        match NaluType::from_code(payload[0]) {
            NaluType::StapA => {
                for nalu in parse_stap_a(payload)? {
                    self.au.push(nalu);
                }
            }
            NaluType::FuA => self.decode_fu_a(payload)?,
            NaluType::StapB | NaluType::Mtap16 | NaluType::Mtap24 | NaluType::FuB => {
                return Err(DepacketizeError::Malformed(
                    "unsupported packetization type",
                ));
            }
            _ => self.au.push(payload.clone()),
        }

        if !pkt.marker {
            return Err(DepacketizeError::MorePacketsNeeded);
        }

        if self.fragment_active {
            // marker inside an unfinished fragment: drop the partial NAL
            tracing::debug!("marker bit set mid-fragment, discarding partial NAL");
            self.fragment.clear();
            self.fragment_active = false;
        }

        if self.au.is_empty() {
            return Err(DepacketizeError::MorePacketsNeeded);
        }
        Ok(std::mem::take(&mut self.au))
    }

    fn decode_fu_a(&mut self, payload: &[u8]) -> Result<(), DepacketizeError> {
        if payload.len() < 3 {
            return Err(DepacketizeError::Malformed("FU-A payload too short"));
        }

        let fu_indicator = payload[0];
        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;

        if start {
            // Reconstruct the original NAL header: NRI from the indicator,
            // type from the FU header.
            let nal_header = (fu_indicator & 0x60) | (fu_header & NALU_TYPE_MASK);
            self.fragment.clear();
            self.fragment.push(nal_header);
            self.fragment_active = true;
        } else if !self.fragment_active {
            return Err(DepacketizeError::NonStartingPacket);
        }

        self.fragment.extend_from_slice(&payload[2..]);

        if end {
            self.au.push(std::mem::take(&mut self.fragment));
            self.fragment_active = false;
        }
        Ok(())
    }
}

fn parse_stap_a(payload: &[u8]) -> Result<Vec<Vec<u8>>, DepacketizeError> {
    let mut rest = &payload[1..];
    let mut nalus = Vec::new();

    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(DepacketizeError::Malformed("truncated STAP-A size"));
        }
        let size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        rest = &rest[2..];
        if size == 0 || size > rest.len() {
            return Err(DepacketizeError::Malformed("invalid STAP-A NAL size"));
        }
        nalus.push(rest[..size].to_vec());
        rest = &rest[size..];
    }

    if nalus.is_empty() {
        return Err(DepacketizeError::Malformed("STAP-A with no NAL units"));
    }
    Ok(nalus)
}

/// Extract SPS and PPS from an RTP payload without full depacketization.
///
/// Handles single-NAL payloads and STAP-A aggregates. Any side not
/// present in the payload is `None` — the caller's cache keeps its
/// previous value for that side.
pub fn extract_params(payload: &[u8]) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    let Some(typ) = NaluType::of(payload) else {
        return (None, None);
    };

    match typ {
        NaluType::Sps => (Some(payload.to_vec()), None),
        NaluType::Pps => (None, Some(payload.to_vec())),
        NaluType::StapA => {
            let Ok(nalus) = parse_stap_a(payload) else {
                return (None, None);
            };
            let mut sps = None;
            let mut pps = None;
            for nalu in nalus {
                match NaluType::of(&nalu) {
                    Some(NaluType::Sps) => sps = Some(nalu),
                    Some(NaluType::Pps) => pps = Some(nalu),
                    _ => {}
                }
            }
            (sps, pps)
        }
        _ => (None, None),
    }
}

/// H.264 RTP packetizer used on the re-encode path.
///
/// NALs that fit within the payload budget are sent as Single NAL Unit
/// packets (RFC 6184 §5.6); larger NALs use FU-A fragmentation (§5.8).
/// The marker bit is set on the last packet of each access unit.
#[derive(Debug)]
pub struct H264Packetizer {
    header: RtpHeaderState,
    payload_max_size: usize,
}

impl H264Packetizer {
    pub fn new(header: RtpHeaderState, payload_max_size: usize) -> Self {
        Self {
            header,
            payload_max_size,
        }
    }

    /// Packetize an access unit into one or more RTP packets.
    pub fn packetize(&mut self, au: &[Vec<u8>]) -> Vec<RtpPacket> {
        let mut packets = Vec::new();
        for (i, nalu) in au.iter().enumerate() {
            let is_last = i == au.len() - 1;
            self.packetize_nal(nalu, is_last, &mut packets);
        }
        packets
    }

    /// Set the timestamp carried by subsequently produced packets.
    pub fn set_timestamp(&mut self, ticks: u64) {
        self.header.set_timestamp(ticks);
    }

    pub fn advance_timestamp(&mut self, increment: u32) {
        self.header.advance_timestamp(increment);
    }

    fn packetize_nal(&mut self, nalu: &[u8], is_last_nal: bool, packets: &mut Vec<RtpPacket>) {
        if nalu.is_empty() {
            return;
        }

        if nalu.len() <= self.payload_max_size {
            // Single NAL Unit mode (RFC 6184 §5.6)
            packets.push(self.header.next_packet(is_last_nal, nalu.to_vec()));
            return;
        }

        // FU-A fragmentation (RFC 6184 §5.8)
        let nal_header = nalu[0];
        let nal_type = nal_header & NALU_TYPE_MASK;
        let nri = nal_header & 0x60;

        // FU indicator: NRI from original NAL, type = 28 (FU-A)
        let fu_indicator = nri | 28;
        let payload = &nalu[1..];

        let max_fragment = self.payload_max_size - 2; // FU indicator + FU header
        let mut offset = 0usize;
        let mut first = true;
        let mut fragments = 0usize;

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let last_fragment = remaining <= max_fragment;
            let chunk_size = std::cmp::min(max_fragment, remaining);
            let chunk = &payload[offset..offset + chunk_size];

            // FU header: S=start, E=end, R=0, Type=original NAL type
            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };
            let fu_header = start_bit | end_bit | nal_type;

            let mut body = Vec::with_capacity(2 + chunk.len());
            body.push(fu_indicator);
            body.push(fu_header);
            body.extend_from_slice(chunk);

            let marker = is_last_nal && last_fragment;
            packets.push(self.header.next_packet(marker, body));

            offset += chunk_size;
            first = false;
            fragments += 1;
        }

        tracing::trace!(
            nal_type,
            nal_size = nalu.len(),
            fragments,
            "FU-A fragmented NAL unit"
        );
    }
}
