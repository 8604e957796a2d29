use std::net::{IpAddr, SocketAddr};

use crate::media::command::{Arg, TranscodeCommand};
use crate::media::{AAC_ENCODER, AUDIO_PACKET_SIZE, VIDEO_PACKET_SIZE};
use crate::protocol::sdp;
use crate::protocol::{AudioRequest, VideoRequest};
use crate::session::transport::MediaTransport;
use crate::transport::AddressFamily;

/// Bytes of the source stream ffmpeg may read before it starts emitting.
const PROBE_SIZE: u32 = 16384;

/// Maximum demux delay in microseconds.
const MAX_DELAY_US: u32 = 500_000;

/// Camera-native pixel format carried through the remux.
const PIXEL_FORMAT: &str = "yuvj420p";

/// Everything the builder needs for one session.
#[derive(Debug, Clone)]
pub struct TranscodeParams<'a> {
    pub source_url: &'a str,
    pub peer: IpAddr,
    pub video: &'a MediaTransport,
    pub audio: &'a MediaTransport,
    pub video_request: VideoRequest,
    pub audio_request: AudioRequest,
    /// Whether the transcoder can encode AAC-ELD.
    pub aac_available: bool,
    /// Present when two-way audio was negotiated.
    pub talkback: Option<TalkbackParams<'a>>,
    /// Inserted after the video encoding options.
    pub extra_args: &'a [String],
    pub verbose: bool,
}

/// Return-audio parameters for the talkback leg.
#[derive(Debug, Clone, Copy)]
pub struct TalkbackParams<'a> {
    /// Used for the SDP session name.
    pub camera_name: &'a str,
    pub family: AddressFamily,
    /// Port the talkback decoder receives the viewer's audio on.
    pub two_way_port: u16,
    /// Camera's talkback listener.
    pub target: SocketAddr,
}

/// The talkback process and the SDP it must read from stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkbackPlan {
    pub command: TranscodeCommand,
    pub sdp: String,
}

/// Output of the builder: the outbound process and, optionally, talkback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodePlan {
    pub outbound: TranscodeCommand,
    pub talkback: Option<TalkbackPlan>,
}

/// Build the full transcoder plan for a session.
///
/// Pure: identical parameters always produce identical commands.
pub fn build(params: &TranscodeParams<'_>) -> TranscodePlan {
    let mut outbound = TranscodeCommand::new();

    outbound
        .push(Arg::Flag("-hide_banner"))
        .push(Arg::opt("-probesize", PROBE_SIZE))
        .push(Arg::opt("-max_delay", MAX_DELAY_US))
        .push(Arg::opt("-flags", "low_delay"))
        .push(Arg::opt("-rtsp_transport", "tcp"))
        .push(Arg::Input(params.source_url.to_string()));

    push_video(&mut outbound, params);

    if params.aac_available {
        push_audio(&mut outbound, params);
    }

    if params.verbose {
        outbound.push(Arg::opt("-loglevel", "level+verbose"));
    }

    let talkback = match (&params.talkback, params.aac_available) {
        (Some(talkback), true) => Some(build_talkback(params, talkback)),
        _ => None,
    };

    TranscodePlan { outbound, talkback }
}

fn push_video(cmd: &mut TranscodeCommand, params: &TranscodeParams<'_>) {
    let request = &params.video_request;
    let bitrate = request.max_bit_rate;

    cmd.push(Arg::opt("-map", "0:v:0"))
        .push(Arg::opt("-codec:v", "copy"))
        .push(Arg::opt("-pix_fmt", PIXEL_FORMAT))
        .push(Arg::opt("-r", request.fps))
        .push(Arg::opt("-b:v", format!("{bitrate}k")))
        .push(Arg::opt("-bufsize", format!("{}k", 2 * bitrate)))
        .push(Arg::opt("-maxrate", format!("{bitrate}k")));

    cmd.extend(params.extra_args.iter().cloned().map(Arg::Raw));

    push_rtp_output(cmd, params.peer, params.video, request.payload_type, VIDEO_PACKET_SIZE);
}

fn push_audio(cmd: &mut TranscodeCommand, params: &TranscodeParams<'_>) {
    let request = &params.audio_request;
    let bitrate = request.max_bit_rate;

    cmd.push(Arg::opt("-map", "0:a:0"))
        .push(Arg::opt("-codec:a", AAC_ENCODER))
        .push(Arg::opt("-profile:a", "aac_eld"))
        .push(Arg::opt("-flags", "+global_header"))
        .push(Arg::opt("-ar", format!("{}k", request.sample_rate)))
        .push(Arg::opt("-b:a", format!("{bitrate}k")))
        .push(Arg::opt("-bufsize", format!("{}k", 2 * bitrate)))
        .push(Arg::opt("-ac", 1));

    push_rtp_output(cmd, params.peer, params.audio, request.payload_type, AUDIO_PACKET_SIZE);
}

/// RTP output to the viewer. RTCP shares the viewer's port; the transcoder
/// receives RTCP on the negotiated return port.
fn push_rtp_output(
    cmd: &mut TranscodeCommand,
    peer: IpAddr,
    media: &MediaTransport,
    payload_type: u8,
    packet_size: usize,
) {
    // ffmpeg parses -ssrc as a signed 32-bit integer.
    cmd.push(Arg::opt("-payload_type", payload_type))
        .push(Arg::opt("-ssrc", media.ssrc as i32))
        .push(Arg::opt("-f", "rtp"));

    let scheme = match media.srtp.suite.ffmpeg_name() {
        Some(suite) => {
            cmd.push(Arg::opt("-srtp_out_suite", suite))
                .push(Arg::opt("-srtp_out_params", media.srtp.inline_key()));
            "srtp"
        }
        None => "rtp",
    };

    let dest = SocketAddr::new(peer, media.port);
    cmd.push(Arg::Output(format!(
        "{scheme}://{dest}?rtcpport={}&localrtcpport={}&pkt_size={packet_size}",
        media.port, media.return_port
    )));
}

fn build_talkback(params: &TranscodeParams<'_>, talkback: &TalkbackParams<'_>) -> TalkbackPlan {
    let mut command = TranscodeCommand::new();

    command
        .push(Arg::Flag("-hide_banner"))
        .push(Arg::opt("-protocol_whitelist", "crypto,file,pipe,rtp,udp"))
        .push(Arg::opt("-f", "sdp"))
        .push(Arg::opt("-codec:a", AAC_ENCODER))
        .push(Arg::Input("pipe:0".to_string()))
        .push(Arg::opt("-map", "0:a:0"))
        .push(Arg::opt("-codec:a", AAC_ENCODER))
        .push(Arg::opt("-flags", "+global_header"))
        .push(Arg::opt("-ar", "16k"))
        .push(Arg::opt("-b:a", "24k"))
        .push(Arg::opt("-bufsize", "48k"))
        .push(Arg::opt("-ac", 1))
        .push(Arg::opt("-f", "adts"))
        .push(Arg::Output(format!("udp://{}", talkback.target)));

    if params.verbose {
        command.push(Arg::opt("-loglevel", "level+verbose"));
    }

    let sdp = sdp::talkback_sdp(
        talkback.camera_name,
        talkback.family,
        params.peer,
        talkback.two_way_port,
        &params.audio.srtp,
    );

    TalkbackPlan { command, sdp }
}
