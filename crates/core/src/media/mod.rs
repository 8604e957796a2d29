//! Media pipeline description for the transcoder.
//!
//! The bridge never touches media itself: ffmpeg pulls the camera's RTSP
//! stream, remuxes video, encodes audio and emits SRTP straight to the
//! viewer. This module decides *what* ffmpeg is asked to do.
//!
//! - [`command`]: typed argument records and their argv rendering.
//! - [`ffmpeg`]: the transcode command builder (outbound and talkback).
//! - [`rtp`]: SSRC generation and the payload-type check used by the relay.
//!
//! ## Packet sizing
//!
//! RTP output is packetized in multiples of the 188-byte MPEG-TS packet size:
//! three per video packet and one per audio packet. Both sizes are fixed.

pub mod command;
pub mod ffmpeg;
pub mod rtp;

pub use command::{Arg, TranscodeCommand};
pub use ffmpeg::{TalkbackParams, TalkbackPlan, TranscodeParams, TranscodePlan};

/// MPEG transport stream packet size.
pub const TS_PACKET_SIZE: usize = 188;

/// RTP payload size for video.
pub const VIDEO_PACKET_SIZE: usize = TS_PACKET_SIZE * 3;

/// RTP payload size for audio.
pub const AUDIO_PACKET_SIZE: usize = TS_PACKET_SIZE;

/// Encoder required for HomeKit's AAC-ELD audio and for decoding talkback.
pub const AAC_ENCODER: &str = "libfdk_aac";
