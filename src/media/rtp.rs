use rand::RngExt;

use crate::error::{CameraError, Result};

/// Size of the RTP fixed header in bytes (RFC 3550 §5.1).
pub const RTP_HEADER_SIZE: usize = 12;

/// A parsed RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The receive path parses camera packets with [`parse`](Self::parse)
/// (CSRC entries and header extensions are skipped, padding is removed);
/// the re-encode path serializes with [`serialize`](Self::serialize).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub marker: bool,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Parse a wire-format RTP packet.
    ///
    /// Rejects anything that is not version 2 or shorter than the fixed
    /// header. Padding bytes declared by the P bit are stripped from the
    /// payload; the returned packet always has `padding = false` semantics.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(CameraError::Decode(format!(
                "RTP packet too short: {} bytes",
                data.len()
            )));
        }

        let version = data[0] >> 6;
        if version != 2 {
            return Err(CameraError::Decode(format!(
                "unsupported RTP version: {version}"
            )));
        }

        let has_padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;

        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7F;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = RTP_HEADER_SIZE + csrc_count * 4;
        if has_extension {
            if data.len() < offset + 4 {
                return Err(CameraError::Decode("truncated RTP extension".to_string()));
            }
            let ext_words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + ext_words * 4;
        }

        if data.len() < offset {
            return Err(CameraError::Decode("truncated RTP header".to_string()));
        }

        let mut end = data.len();
        if has_padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || pad > end - offset {
                return Err(CameraError::Decode("invalid RTP padding".to_string()));
            }
            end -= pad;
        }

        Ok(RtpPacket {
            payload_type,
            sequence,
            timestamp,
            ssrc,
            marker,
            payload: data[offset..end].to_vec(),
        })
    }

    /// Serialize to the wire format (no padding, no extension, no CSRC).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RTP_HEADER_SIZE + self.payload.len());
        buf.push(2 << 6);
        buf.push(((self.marker as u8) << 7) | self.payload_type);
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Serialized size in bytes. Used by the format processor to detect
    /// packets exceeding the transport's maximum payload size.
    pub fn marshal_size(&self) -> usize {
        RTP_HEADER_SIZE + self.payload.len()
    }
}

/// Outbound RTP header state for the re-encode packetizer.
///
/// Manages:
/// - **Sequence number**: 16-bit, wrapping — incremented on every packet.
/// - **Timestamp**: stored as u64 internally to avoid wrapping arithmetic
///   during duration calculations; the lower 32 bits go on the wire.
/// - **SSRC**: random per RFC 3550 §8.1, or seeded from the camera's own
///   SSRC when re-encoding an existing stream.
#[derive(Debug)]
pub struct RtpHeaderState {
    pub payload_type: u8,
    pub ssrc: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpHeaderState {
    pub fn new(payload_type: u8, ssrc: u32, initial_sequence: u16) -> Self {
        tracing::debug!(
            payload_type,
            ssrc = format_args!("{:#010X}", ssrc),
            initial_sequence,
            "RTP header state created"
        );
        Self {
            payload_type,
            ssrc,
            sequence: initial_sequence,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(payload_type: u8) -> Self {
        let ssrc = rand::rng().random::<u32>();
        Self::new(payload_type, ssrc, 0)
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Produce the next outbound packet shell and advance the sequence.
    ///
    /// The `marker` bit is set on the last packet of an access unit
    /// (RFC 6184 §5.1).
    pub fn next_packet(&mut self, marker: bool, payload: Vec<u8>) -> RtpPacket {
        let pkt = RtpPacket {
            payload_type: self.payload_type,
            sequence: self.sequence,
            timestamp: self.timestamp as u32,
            ssrc: self.ssrc,
            marker,
            payload,
        };
        self.sequence = self.sequence.wrapping_add(1);
        pkt
    }

    /// Advance the RTP timestamp by the given clock-tick increment.
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment as u64);
    }

    /// Set the timestamp to an absolute tick value (used when re-encoded
    /// packets must carry the original packet's timestamp).
    pub fn set_timestamp(&mut self, ticks: u64) {
        self.timestamp = ticks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_state() -> RtpHeaderState {
        RtpHeaderState::new(96, 0xAABBCCDD, 0)
    }

    #[test]
    fn roundtrip() {
        let pkt = RtpPacket {
            payload_type: 96,
            sequence: 4097,
            timestamp: 90000,
            ssrc: 0x11223344,
            marker: true,
            payload: vec![0x65, 0xAA, 0xBB],
        };
        let wire = pkt.serialize();
        assert_eq!(wire.len(), pkt.marshal_size());
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn parse_version_check() {
        let mut wire = make_state().next_packet(false, vec![1, 2, 3]).serialize();
        wire[0] = 1 << 6;
        assert!(RtpPacket::parse(&wire).is_err());
    }

    #[test]
    fn parse_too_short() {
        assert!(RtpPacket::parse(&[0x80, 0x60, 0, 1]).is_err());
    }

    #[test]
    fn parse_strips_padding() {
        let pkt = RtpPacket {
            payload_type: 96,
            sequence: 1,
            timestamp: 0,
            ssrc: 7,
            marker: false,
            payload: vec![0x41, 0x9A],
        };
        let mut wire = pkt.serialize();
        wire[0] |= 0x20; // P bit
        wire.extend_from_slice(&[0, 0, 3]); // 3 padding bytes, count in last
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed.payload, vec![0x41, 0x9A]);
    }

    #[test]
    fn parse_skips_csrc_entries() {
        let pkt = RtpPacket {
            payload_type: 96,
            sequence: 9,
            timestamp: 1234,
            ssrc: 42,
            marker: false,
            payload: vec![0xAB],
        };
        let wire = pkt.serialize();
        let mut with_csrc = Vec::new();
        with_csrc.push(wire[0] | 0x01); // CC = 1
        with_csrc.extend_from_slice(&wire[1..RTP_HEADER_SIZE]);
        with_csrc.extend_from_slice(&[0, 0, 0, 99]); // one CSRC entry
        with_csrc.extend_from_slice(&pkt.payload);
        let parsed = RtpPacket::parse(&with_csrc).unwrap();
        assert_eq!(parsed.payload, vec![0xAB]);
    }

    #[test]
    fn sequence_increments_and_wraps() {
        let mut st = make_state();
        let p1 = st.next_packet(false, Vec::new());
        let p2 = st.next_packet(false, Vec::new());
        assert_eq!(p2.sequence, p1.sequence.wrapping_add(1));

        let mut st = RtpHeaderState::new(96, 1, u16::MAX);
        let last = st.next_packet(false, Vec::new());
        assert_eq!(last.sequence, u16::MAX);
        assert_eq!(st.sequence(), 0);
    }

    #[test]
    fn timestamp_advance_and_set() {
        let mut st = make_state();
        st.advance_timestamp(3000);
        assert_eq!(st.timestamp(), 3000);
        st.set_timestamp(90000);
        assert_eq!(st.next_packet(false, Vec::new()).timestamp, 90000);
    }

    #[test]
    fn random_ssrc_differs() {
        let a = RtpHeaderState::with_random_ssrc(96);
        let b = RtpHeaderState::with_random_ssrc(96);
        assert_ne!(a.ssrc, b.ssrc);
    }
}
