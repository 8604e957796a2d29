//! HomeKit streaming protocol surface.
//!
//! A HomeKit camera stream is set up in two round trips driven by the viewer:
//!
//! | Step | Message | Handled by |
//! |------|---------|------------|
//! | 1 | prepare (`SetupEndpoints`) | [`StreamingDelegate::negotiate`](crate::StreamingDelegate::negotiate) |
//! | 2 | start (`SelectedStreamConfiguration`) | [`StreamingDelegate::start`](crate::StreamingDelegate::start) |
//! | 3 | reconfigure | accepted and ignored |
//! | 4 | stop | [`StreamingDelegate::stop`](crate::StreamingDelegate::stop) |
//!
//! The TLV encoding is owned by the accessory layer; this module holds the
//! decoded request and response values.

pub mod sdp;

use std::net::IpAddr;

use crate::session::transport::SrtpParams;
use crate::transport::AddressFamily;

/// One media leg as offered by the viewer during prepare.
#[derive(Debug, Clone)]
pub struct MediaOffer {
    /// Viewer's receive port for this leg.
    pub port: u16,
    pub srtp: SrtpParams,
}

/// Decoded prepare request.
#[derive(Debug, Clone)]
pub struct PrepareRequest {
    pub session_id: String,
    pub target_address: IpAddr,
    pub family: AddressFamily,
    pub video: MediaOffer,
    pub audio: MediaOffer,
}

impl PrepareRequest {
    /// Build a request, deriving the address family from the target address.
    pub fn new(session_id: &str, target_address: IpAddr, video: MediaOffer, audio: MediaOffer) -> Self {
        Self {
            session_id: session_id.to_string(),
            target_address,
            family: AddressFamily::of(&target_address),
            video,
            audio,
        }
    }
}

/// Accessory side of one negotiated media leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAnswer {
    /// Port the accessory receives this leg on.
    pub port: u16,
    pub ssrc: u32,
    pub srtp_key: Vec<u8>,
    pub srtp_salt: Vec<u8>,
}

/// Prepare response returned to the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareResponse {
    /// Address the stream will originate from.
    pub address: IpAddr,
    pub video: MediaAnswer,
    pub audio: MediaAnswer,
}

/// Video parameters selected by the viewer at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoRequest {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// kbit/s
    pub max_bit_rate: u32,
    pub payload_type: u8,
}

/// Audio parameters selected by the viewer at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioRequest {
    /// kHz
    pub sample_rate: u32,
    /// kbit/s
    pub max_bit_rate: u32,
    pub payload_type: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRequest {
    pub video: VideoRequest,
    pub audio: AudioRequest,
}

/// A stream control request addressed to an already prepared session.
#[derive(Debug, Clone)]
pub enum StreamRequest {
    Start {
        session_id: String,
        params: StartRequest,
    },
    Reconfigure {
        session_id: String,
        video: VideoRequest,
    },
    Stop {
        session_id: String,
    },
}

impl StreamRequest {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Start { session_id, .. }
            | Self::Reconfigure { session_id, .. }
            | Self::Stop { session_id } => session_id,
        }
    }
}
