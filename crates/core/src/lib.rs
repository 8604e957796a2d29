//! HomeKit camera streaming.
//!
//! Negotiates stream sessions with a HomeKit viewer, launches ffmpeg to
//! remux a camera's RTSP feed into SRTP, and optionally relays the viewer's
//! return audio to the camera's talkback listener.
//!
//! ```text
//! PrepareRequest ──► StreamingDelegate::negotiate ──► PrepareResponse
//! StreamRequest  ──► StreamingDelegate::handle
//!                        │
//!                        ├─► media::ffmpeg::build ─► process::Supervisor
//!                        └─► transport::TwoWayAudioRelay
//! ```

pub mod config;
pub mod delegate;
pub mod error;
pub mod media;
pub mod process;
pub mod protocol;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod transport;

pub use config::StreamingConfig;
pub use delegate::StreamingDelegate;
pub use error::{Result, StreamError};
pub use process::{FfmpegSupervisor, ProcessHandle, Supervisor, SupervisorConfig};
pub use protocol::{
    AudioRequest, MediaAnswer, MediaOffer, PrepareRequest, PrepareResponse, StartRequest,
    StreamRequest, VideoRequest,
};
pub use session::{CryptoSuite, SessionRegistry, SessionState, SrtpParams};
pub use source::CameraSource;
pub use transport::AddressFamily;
