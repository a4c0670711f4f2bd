//! RTSP client protocol implementation (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol from the
//! client side — building requests, parsing responses, parsing the SDP
//! session description returned by DESCRIBE, and RTSP URL handling.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://camera/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! Key differences from HTTP:
//! - Stateful: sessions persist across requests (RFC 2326 §3).
//! - Different methods: OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN.
//! - Session header carries a server-assigned ID (RFC 2326 §12.37).
//!
//! ## Methods this client sends
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery and liveness probe |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Negotiate transport for the video track |
//! | PLAY | §10.5 | Start media delivery |
//! | TEARDOWN | §10.7 | Destroy session |

pub mod request;
pub mod response;
pub mod sdp;
pub mod url;

pub use request::RtspRequest;
pub use response::RtspResponse;
pub use sdp::{SessionDescription, VideoTrack};
pub use url::RtspUrl;
