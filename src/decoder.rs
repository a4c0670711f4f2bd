//! Native decode pipeline: NAL units in, pooled RGBA frames out.
//!
//! The decode seam is the [`VideoDecoder`] trait — callers never see the
//! underlying codec handles. [`SoftwareH264Decoder`] wraps the bundled
//! OpenH264 software decoder; its native resources are released exactly
//! once when the wrapper drops.
//!
//! "No frame yet" is the decoder's normal operating mode: parameter sets
//! and reference buffering produce `Ok(None)`, never an error. A fresh
//! destination frame is pulled from the pool per decoded picture, and
//! (re)initialized whenever the output dimensions change.

use std::fmt;
use std::sync::Arc;

use openh264::decoder::Decoder;
use openh264::formats::YUVSource;

use crate::error::{CameraError, Result};
use crate::media::START_CODE;
use crate::pool::{FramePool, PooledFrame};

/// Video codecs this library can identify in a session description.
///
/// Only [`H264`](Self::H264) has a decoder; the others exist so codec
/// selection and passthrough validation can name what they saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// No supported codec could be identified.
    Unknown,
    /// A discrete codec has yet to be selected from the SDP.
    Agnostic,
    H264,
    H265,
    Mjpeg,
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Agnostic => write!(f, "Agnostic"),
            Self::H264 => write!(f, "H264"),
            Self::H265 => write!(f, "H265"),
            Self::Mjpeg => write!(f, "MJPEG"),
        }
    }
}

/// Capability seam over a raw video decoder.
///
/// `decode` feeds one NAL unit, or a start-code-joined run of NAL units
/// with the leading code omitted, and yields a pooled frame when the
/// codec produces a picture. `Ok(None)` means the decoder
/// needs more input — routine, not a failure. The returned frame is
/// acquired from the pool with a reference count of 1; ownership of that
/// reference passes to the caller.
pub trait VideoDecoder: Send {
    fn decode(&mut self, nalu: &[u8]) -> Result<Option<Arc<PooledFrame>>>;
}

/// Software H.264 decoder backed by OpenH264, with YUV→RGBA conversion
/// into pool-managed frame buffers.
pub struct SoftwareH264Decoder {
    decoder: Decoder,
    pool: Arc<FramePool>,
    dimensions: Option<(usize, usize)>,
}

impl SoftwareH264Decoder {
    pub fn new(pool: Arc<FramePool>) -> Result<Self> {
        let decoder = Decoder::new()
            .map_err(|e| CameraError::Decode(format!("creating H264 decoder: {e}")))?;
        Ok(Self {
            decoder,
            pool,
            dimensions: None,
        })
    }

    /// Last observed output dimensions, if any picture has been decoded.
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        self.dimensions
    }
}

impl VideoDecoder for SoftwareH264Decoder {
    fn decode(&mut self, nalu: &[u8]) -> Result<Option<Arc<PooledFrame>>> {
        let mut annexb = Vec::with_capacity(START_CODE.len() + nalu.len());
        annexb.extend_from_slice(&START_CODE);
        annexb.extend_from_slice(nalu);

        let yuv = match self.decoder.decode(&annexb) {
            Ok(Some(yuv)) => yuv,
            // buffering: parameter sets and reference frames produce no
            // picture yet
            Ok(None) => return Ok(None),
            // corrupted input mid-stream is routine on lossy cameras;
            // the codec resynchronizes at the next key frame
            Err(e) => {
                tracing::debug!(error = %e, "decoder rejected NAL unit");
                return Ok(None);
            }
        };

        let (width, height) = yuv.dimensions();
        if width == 0 || height == 0 {
            return Ok(None);
        }

        if self.dimensions != Some((width, height)) {
            tracing::info!(width, height, previous = ?self.dimensions, "decoder output dimensions changed");
            self.dimensions = Some((width, height));
        }

        let Some(frame) = self.pool.acquire() else {
            return Err(CameraError::FrameUnavailable);
        };

        {
            let mut image = frame.image.lock();
            // a pooled frame may carry a stale resolution
            image.reinit(width, height);
            // full-range RGBA conversion
            yuv.write_rgba8(&mut image.data);
        }

        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::split_annex_b;
    use openh264::encoder::Encoder;
    use openh264::formats::{RgbSliceU8, YUVBuffer};

    const W: usize = 64;
    const H: usize = 64;

    /// Encode a few solid-color frames into Annex B NAL units.
    fn encoded_nal_units(frames: usize) -> Vec<Vec<u8>> {
        let mut encoder = Encoder::new().expect("encoder");
        let mut nalus = Vec::new();
        for i in 0..frames {
            let shade = (i * 40) as u8;
            let rgb = vec![shade; W * H * 3];
            let source = RgbSliceU8::new(&rgb, (W, H));
            let yuv = YUVBuffer::from_rgb_source(source);
            let bitstream = encoder.encode(&yuv).expect("encode");
            nalus.extend(split_annex_b(&bitstream.to_vec()));
        }
        nalus
    }

    #[test]
    fn decode_roundtrip_produces_pooled_frames() {
        let pool = Arc::new(FramePool::new(4));
        let mut decoder = SoftwareH264Decoder::new(pool.clone()).expect("decoder");

        let mut frames = Vec::new();
        for nalu in encoded_nal_units(5) {
            if let Some(frame) = decoder.decode(&nalu).expect("decode") {
                frames.push(frame);
            }
        }

        assert!(!frames.is_empty(), "expected at least one decoded frame");
        assert_eq!(decoder.dimensions(), Some((W, H)));
        for frame in &frames {
            let image = frame.image.lock();
            assert_eq!((image.width, image.height), (W, H));
            assert_eq!(image.data.len(), W * H * 4);
        }

        let stats = pool.stats();
        assert_eq!(stats.hits + stats.news, frames.len() as u64);

        for frame in &frames {
            pool.release(frame);
        }
        pool.close();
    }

    #[test]
    fn parameter_set_alone_yields_no_frame() {
        let pool = Arc::new(FramePool::new(4));
        let mut decoder = SoftwareH264Decoder::new(pool).expect("decoder");
        // a bare SPS can never produce a picture
        let sps = vec![
            0x67, 0x42, 0xC0, 0x1E, 0x8C, 0x8D, 0x40, 0x50, 0x1E, 0x90, 0x0F, 0x08, 0x84, 0x6A,
        ];
        let result = decoder.decode(&sps).expect("SPS is not an error");
        assert!(result.is_none());
    }

    #[test]
    fn garbage_input_is_not_fatal() {
        let pool = Arc::new(FramePool::new(4));
        let mut decoder = SoftwareH264Decoder::new(pool).expect("decoder");
        let result = decoder.decode(&[0x65, 0xDE, 0xAD, 0xBE, 0xEF]).expect("recoverable");
        assert!(result.is_none());
    }

    #[test]
    fn codec_display_names() {
        assert_eq!(VideoCodec::H264.to_string(), "H264");
        assert_eq!(VideoCodec::H265.to_string(), "H265");
        assert_eq!(VideoCodec::Mjpeg.to_string(), "MJPEG");
        assert_eq!(VideoCodec::Unknown.to_string(), "Unknown");
        assert_eq!(VideoCodec::Agnostic.to_string(), "Agnostic");
    }
}
