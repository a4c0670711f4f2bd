//! Error types for the camera ingest library.

use std::fmt;

/// Errors that can occur while ingesting an RTSP camera stream.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Configuration**: [`InvalidAddress`](Self::InvalidAddress),
///   [`UnsupportedTransport`](Self::UnsupportedTransport) — fail fast at
///   session construction, never retried.
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP responses;
///   [`Status`](Self::Status) — non-OK status from the camera;
///   [`Handshake`](Self::Handshake) — a handshake step failed;
///   [`TrackNotFound`](Self::TrackNotFound) — no supported video track.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures. These feed
///   the session manager's reconnect loop and are never surfaced to image
///   readers.
/// - **Decode**: [`Decode`](Self::Decode) — fatal decoder/codec failures;
///   [`FrameUnavailable`](Self::FrameUnavailable) — the frame pool could
///   not produce a destination frame;
///   [`UnsupportedCodec`](Self::UnsupportedCodec) — track codec has no
///   decoder.
/// - **Readers**: [`NoFrameYet`](Self::NoFrameYet) — nothing decoded yet
///   (routine during startup and reconnect storms).
/// - **Passthrough**: [`PassthroughNotEnabled`](Self::PassthroughNotEnabled),
///   [`SubscriptionNotFound`](Self::SubscriptionNotFound).
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed RTSP URL or wrong scheme.
    #[error("invalid rtsp address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Transport preference named a protocol this library does not speak.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// A step of the connect/describe/setup/play handshake failed.
    #[error("RTSP {step} failed: {message}")]
    Handshake {
        step: &'static str,
        message: String,
    },

    /// The camera responded with a non-OK RTSP status.
    #[error("RTSP status {code} {text}")]
    Status { code: u16, text: String },

    /// The session description carried no video track we can decode.
    #[error("no supported video track found")]
    TrackNotFound,

    /// Failed to parse an RTSP response message (RFC 2326 §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Track codec is recognized but has no decoder in this build.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Fatal decoder or bitstream failure for one decode call.
    #[error("decode error: {0}")]
    Decode(String),

    /// The frame pool could not produce a destination frame.
    #[error("no frame available from pool")]
    FrameUnavailable,

    /// No frame has been decoded yet (or the session is reconnecting).
    #[error("no frame yet")]
    NoFrameYet,

    /// RTP passthrough is administratively disabled for this session.
    #[error("RTP passthrough is not enabled")]
    PassthroughNotEnabled,

    /// No subscription with the given ID exists.
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(u64),

    /// A video sink is already attached to this session.
    #[error("a video sink is already attached")]
    SinkBusy,

    /// The given video sink is not the one currently attached.
    #[error("video sink not attached")]
    SinkNotFound,
}

/// Specific kind of RTSP response parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no status line).
    EmptyResponse,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Body was shorter than the declared Content-Length.
    TruncatedBody,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::TruncatedBody => write!(f, "truncated body"),
        }
    }
}

impl CameraError {
    /// Whether this error should trigger a reconnect rather than surface
    /// to a caller. Covers connection reset, broken pipe, refused, EOF
    /// (reads returning zero map to `UnexpectedEof`), and non-OK status.
    pub fn is_reconnect_trigger(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            Self::Status { .. } => true,
            _ => false,
        }
    }
}

/// Convenience alias for `Result<T, CameraError>`.
pub type Result<T> = std::result::Result<T, CameraError>;
