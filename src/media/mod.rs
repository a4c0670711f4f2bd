//! Media layer: NAL unit taxonomy, RTP packets, and H.264 packetization.
//!
//! An H.264 elementary stream is a sequence of **NAL units** (Network
//! Abstraction Layer, RFC 6184 §1.3). The NAL type lives in the low 5 bits
//! of the first payload byte. The NAL units that together form one
//! decodable frame are an **access unit**.
//!
//! This module owns the single NAL classification used everywhere else —
//! the format processor's remux filter, the decoder feed path, and the
//! depacketizer all route through [`NaluType`] and [`NaluCategory`] rather
//! than re-deriving type codes.

pub mod h264;
pub mod rtp;

/// Mask extracting the NAL type from the first byte (low 5 bits).
pub const NALU_TYPE_MASK: u8 = 0x1F;

/// Annex B start code prefixed to every NAL unit fed to the decoder.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// An access unit: the ordered NAL units of one coded frame.
pub type AccessUnit = Vec<Vec<u8>>;

/// H.264 NAL unit types (ITU-T H.264 §7.4.1, RFC 6184 §5.2).
///
/// Types 24–29 are RTP packetization constructs, not bitstream NALs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    NonIdr,
    DataPartitionA,
    DataPartitionB,
    DataPartitionC,
    Idr,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    EndOfSequence,
    EndOfStream,
    FillerData,
    SpsExtension,
    Prefix,
    SubsetSps,
    SliceLayerWithoutPartitioning,
    SliceExtension,
    SliceExtensionDepth,
    /// STAP-A aggregation packet (RFC 6184 §5.7.1).
    StapA,
    /// STAP-B aggregation packet.
    StapB,
    Mtap16,
    Mtap24,
    /// FU-A fragmentation unit (RFC 6184 §5.8).
    FuA,
    FuB,
    /// Reserved or unassigned type code.
    Other(u8),
}

/// Coarse classification reused by every component that filters NALs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluCategory {
    /// SPS / PPS — stripped by remux, cached by the format processor.
    ParameterSet,
    /// VCL slice data (IDR or not).
    Slice,
    /// Access unit delimiter — stripped by remux.
    Delimiter,
    /// Everything else (SEI, filler, aggregation/fragmentation, ...).
    Other,
}

impl NaluType {
    /// Classify a raw type code (already masked to 5 bits).
    pub fn from_code(code: u8) -> Self {
        match code & NALU_TYPE_MASK {
            1 => Self::NonIdr,
            2 => Self::DataPartitionA,
            3 => Self::DataPartitionB,
            4 => Self::DataPartitionC,
            5 => Self::Idr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::FillerData,
            13 => Self::SpsExtension,
            14 => Self::Prefix,
            15 => Self::SubsetSps,
            19 => Self::SliceLayerWithoutPartitioning,
            20 => Self::SliceExtension,
            21 => Self::SliceExtensionDepth,
            24 => Self::StapA,
            25 => Self::StapB,
            26 => Self::Mtap16,
            27 => Self::Mtap24,
            28 => Self::FuA,
            29 => Self::FuB,
            other => Self::Other(other),
        }
    }

    /// Classify the first byte of a NAL unit.
    pub fn of(nalu: &[u8]) -> Option<Self> {
        nalu.first().map(|b| Self::from_code(*b))
    }

    pub fn category(self) -> NaluCategory {
        match self {
            Self::Sps | Self::Pps => NaluCategory::ParameterSet,
            Self::Idr
            | Self::NonIdr
            | Self::DataPartitionA
            | Self::DataPartitionB
            | Self::DataPartitionC
            | Self::SliceLayerWithoutPartitioning
            | Self::SliceExtension
            | Self::SliceExtensionDepth => NaluCategory::Slice,
            Self::AccessUnitDelimiter => NaluCategory::Delimiter,
            _ => NaluCategory::Other,
        }
    }
}

/// Whether the access unit contains an IDR slice (key frame).
pub fn idr_present(au: &[Vec<u8>]) -> bool {
    au.iter().any(|n| NaluType::of(n) == Some(NaluType::Idr))
}

/// Split an H.264 Annex B bitstream into NAL units.
///
/// Handles both 4-byte (`00 00 00 01`) and 3-byte (`00 00 01`) start
/// codes, tracking each start code's length so boundaries between
/// adjacent NALs are computed correctly when the two forms are mixed.
pub fn split_annex_b(data: &[u8]) -> Vec<Vec<u8>> {
    let mut nal_units = Vec::new();
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = if idx + 1 < start_entries.len() {
            let (next_start, next_sc_len) = start_entries[idx + 1];
            next_start - next_sc_len
        } else {
            data.len()
        };

        if start < end {
            nal_units.push(data[start..end].to_vec());
        }
    }

    nal_units
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_from_first_byte_low_bits() {
        // NRI bits must not affect classification
        assert_eq!(NaluType::of(&[0x65]), Some(NaluType::Idr));
        assert_eq!(NaluType::of(&[0x05]), Some(NaluType::Idr));
        assert_eq!(NaluType::of(&[0x67]), Some(NaluType::Sps));
        assert_eq!(NaluType::of(&[0x68]), Some(NaluType::Pps));
        assert_eq!(NaluType::of(&[0x41]), Some(NaluType::NonIdr));
        assert_eq!(NaluType::of(&[0x09]), Some(NaluType::AccessUnitDelimiter));
        assert_eq!(NaluType::of(&[0x7C]), Some(NaluType::FuA));
        assert_eq!(NaluType::of(&[0x78]), Some(NaluType::StapA));
        assert_eq!(NaluType::of(&[]), None);
    }

    #[test]
    fn categories() {
        assert_eq!(NaluType::Sps.category(), NaluCategory::ParameterSet);
        assert_eq!(NaluType::Pps.category(), NaluCategory::ParameterSet);
        assert_eq!(NaluType::Idr.category(), NaluCategory::Slice);
        assert_eq!(NaluType::NonIdr.category(), NaluCategory::Slice);
        assert_eq!(
            NaluType::AccessUnitDelimiter.category(),
            NaluCategory::Delimiter
        );
        assert_eq!(NaluType::Sei.category(), NaluCategory::Other);
        assert_eq!(NaluType::FuA.category(), NaluCategory::Other);
    }

    #[test]
    fn idr_detection() {
        assert!(idr_present(&[vec![0x67, 0x42], vec![0x65, 0x88]]));
        assert!(!idr_present(&[vec![0x67, 0x42], vec![0x41, 0x9A]]));
        assert!(!idr_present(&[]));
    }

    #[test]
    fn split_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        data.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88, 0x00]);
        let nals = split_annex_b(&data);
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[0], vec![0x67, 0x42]);
        assert_eq!(nals[1], vec![0x68, 0xCE]);
        assert_eq!(nals[2], vec![0x65, 0x88, 0x00]);
    }

    #[test]
    fn split_empty_and_garbage() {
        assert!(split_annex_b(&[]).is_empty());
        assert!(split_annex_b(&[0xFF, 0xFE, 0x01]).is_empty());
    }
}
