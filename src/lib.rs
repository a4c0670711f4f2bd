pub mod decoder;
pub mod error;
pub mod formatproc;
pub mod media;
pub mod mux;
pub mod passthrough;
pub mod pool;
pub mod protocol;
pub mod session;
pub mod transport;

pub use decoder::{VideoCodec, VideoDecoder};
pub use error::{CameraError, Result};
pub use mux::VideoSink;
pub use pool::{FramePool, PooledFrame};
pub use session::{RawImage, RtspSession, SessionConfig};
pub use transport::TransportPreference;
