//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Parses the session description returned by DESCRIBE to find a video
//! track this library can ingest. The relevant shape:
//!
//! ```text
//! v=0                                           ← protocol version
//! s=camera                                      ← session name
//! a=control:*                                   ← session control URL
//! m=video 0 RTP/AVP 96                          ← media description
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;
//!   sprop-parameter-sets=<base64 SPS>,<base64 PPS>
//! a=control:track1                              ← track control URL
//! ```
//!
//! Cameras that advertise multiple video tracks get one selected by
//! codec preference: H264, then H265, then MJPEG. `sprop-parameter-sets`
//! (RFC 6184 §8.1), when present, seeds the decoder with SPS/PPS before
//! the first in-band parameter sets arrive.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::decoder::VideoCodec;
use crate::error::{CameraError, Result};

/// One `m=video` section of a session description.
#[derive(Debug, Clone)]
pub struct VideoTrack {
    pub codec: VideoCodec,
    pub payload_type: u8,
    pub clock_rate: u32,
    /// Track control URL (`a=control:`), absolute or relative.
    pub control: Option<String>,
    /// SPS from `sprop-parameter-sets`, without start code.
    pub sps: Option<Vec<u8>>,
    /// PPS from `sprop-parameter-sets`, without start code.
    pub pps: Option<Vec<u8>>,
}

/// A parsed session description, reduced to what the ingest path needs.
#[derive(Debug, Default)]
pub struct SessionDescription {
    /// Session-level `a=control:` value, if any.
    pub session_control: Option<String>,
    pub video_tracks: Vec<VideoTrack>,
}

impl SessionDescription {
    pub fn parse(body: &str) -> Result<Self> {
        let mut description = SessionDescription::default();
        let mut current: Option<VideoTrack> = None;
        // attributes between an unrelated m= line and the next one
        // belong to that unrelated section
        let mut in_other_media = false;

        for line in body.lines() {
            let line = line.trim_end();
            let Some((kind, value)) = line.split_once('=') else {
                continue;
            };

            match kind {
                "m" => {
                    if let Some(track) = current.take() {
                        description.video_tracks.push(track);
                    }
                    if let Some(rest) = value.strip_prefix("video ") {
                        // m=video <port> <proto> <fmt> — first format only
                        let payload_type = rest
                            .split_whitespace()
                            .nth(2)
                            .and_then(|pt| pt.parse::<u8>().ok());
                        match payload_type {
                            Some(payload_type) => {
                                in_other_media = false;
                                current = Some(VideoTrack {
                                    codec: VideoCodec::Agnostic,
                                    payload_type,
                                    clock_rate: 90_000,
                                    control: None,
                                    sps: None,
                                    pps: None,
                                });
                            }
                            None => in_other_media = true,
                        }
                    } else {
                        in_other_media = true;
                    }
                }
                "a" => {
                    if let Some(track) = current.as_mut() {
                        apply_media_attribute(track, value);
                    } else if !in_other_media {
                        if let Some(control) = value.strip_prefix("control:") {
                            description.session_control = Some(control.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        if let Some(track) = current.take() {
            description.video_tracks.push(track);
        }

        Ok(description)
    }

    /// Select the video track to ingest, by codec preference:
    /// H264, then H265, then MJPEG.
    pub fn select_video_track(&self) -> Result<&VideoTrack> {
        for codec in [VideoCodec::H264, VideoCodec::H265, VideoCodec::Mjpeg] {
            if let Some(track) = self.video_tracks.iter().find(|t| t.codec == codec) {
                return Ok(track);
            }
        }
        Err(CameraError::TrackNotFound)
    }
}

fn apply_media_attribute(track: &mut VideoTrack, value: &str) {
    if let Some(control) = value.strip_prefix("control:") {
        track.control = Some(control.to_string());
        return;
    }

    if let Some(rtpmap) = value.strip_prefix("rtpmap:") {
        // rtpmap:<pt> <encoding>/<clock rate>[/<params>]
        let Some((pt, encoding)) = rtpmap.split_once(' ') else {
            return;
        };
        if pt.parse::<u8>() != Ok(track.payload_type) {
            return;
        }
        let mut parts = encoding.split('/');
        let name = parts.next().unwrap_or_default();
        if let Some(Ok(rate)) = parts.next().map(str::parse::<u32>) {
            track.clock_rate = rate;
        }
        track.codec = match name.to_ascii_uppercase().as_str() {
            "H264" => VideoCodec::H264,
            "H265" => VideoCodec::H265,
            "JPEG" | "MJPEG" => VideoCodec::Mjpeg,
            _ => VideoCodec::Unknown,
        };
        return;
    }

    if let Some(fmtp) = value.strip_prefix("fmtp:") {
        let Some((pt, params)) = fmtp.split_once(' ') else {
            return;
        };
        if pt.parse::<u8>() != Ok(track.payload_type) {
            return;
        }
        for param in params.split(';') {
            let Some((name, val)) = param.trim().split_once('=') else {
                continue;
            };
            if name.eq_ignore_ascii_case("sprop-parameter-sets") {
                let (sps, pps) = decode_sprop(val);
                track.sps = sps;
                track.pps = pps;
            }
        }
    }
}

/// Decode `sprop-parameter-sets` (RFC 6184 §8.1): comma-separated
/// base64 NAL units, conventionally SPS first, PPS second. Malformed
/// entries are skipped rather than failing the whole DESCRIBE.
fn decode_sprop(value: &str) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    let mut sets = value.split(',').map(|s| BASE64_STANDARD.decode(s.trim()).ok());
    let sps = sets.next().flatten().filter(|s| !s.is_empty());
    let pps = sets.next().flatten().filter(|p| !p.is_empty());
    (sps, pps)
}
