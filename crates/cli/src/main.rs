use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use hkcam::snapshot::SnapshotFetcher;
use hkcam::{
    AudioRequest, CameraSource, CryptoSuite, FfmpegSupervisor, MediaOffer, PrepareRequest,
    SrtpParams, StartRequest, StreamingConfig, StreamingDelegate, Supervisor,
    SupervisorConfig, VideoRequest,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hkcam", about = "HomeKit camera streaming bridge")]
struct Args {
    /// ffmpeg binary
    #[arg(long, global = true, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report whether ffmpeg can encode AAC-ELD
    Probe,
    /// Fetch one snapshot image
    Snapshot {
        #[arg(long)]
        url: String,
        #[arg(long, default_value_t = 1280)]
        width: u32,
        #[arg(long, default_value_t = 720)]
        height: u32,
        /// Output file
        #[arg(long, short)]
        out: PathBuf,
        /// Request timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Stream a camera to one viewer until Ctrl-C
    Stream(StreamArgs),
}

#[derive(ClapArgs)]
struct StreamArgs {
    /// Camera display name
    #[arg(long, default_value = "Camera")]
    name: String,
    #[arg(long)]
    rtsp_url: String,
    #[arg(long, default_value = "")]
    snapshot_url: String,
    /// Camera talkback listener; enables two-way audio
    #[arg(long)]
    talkback: Option<SocketAddr>,

    #[arg(long, default_value = "cli")]
    session_id: String,
    /// Viewer address
    #[arg(long)]
    peer: IpAddr,
    #[arg(long)]
    video_port: u16,
    #[arg(long)]
    audio_port: u16,

    /// HAP SRTP crypto suite (0, 1 or 2)
    #[arg(long, default_value = "0", value_parser = parse_suite)]
    suite: CryptoSuite,
    /// Hex-encoded SRTP master key for video
    #[arg(long, value_parser = parse_hex)]
    video_key: HexBytes,
    #[arg(long, value_parser = parse_hex)]
    video_salt: HexBytes,
    #[arg(long, value_parser = parse_hex)]
    audio_key: HexBytes,
    #[arg(long, value_parser = parse_hex)]
    audio_salt: HexBytes,

    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// kbit/s
    #[arg(long, default_value_t = 299)]
    video_bitrate: u32,
    #[arg(long, default_value_t = 99)]
    video_payload_type: u8,
    /// kHz
    #[arg(long, default_value_t = 16)]
    sample_rate: u32,
    /// kbit/s
    #[arg(long, default_value_t = 24)]
    audio_bitrate: u32,
    #[arg(long, default_value_t = 110)]
    audio_payload_type: u8,

    /// Address advertised to the viewer
    #[arg(long)]
    public_address: Option<IpAddr>,
    /// Lowest UDP port to negotiate (requires --port-max)
    #[arg(long, requires = "port_max")]
    port_min: Option<u16>,
    #[arg(long, requires = "port_min")]
    port_max: Option<u16>,
    /// Extra ffmpeg arguments placed after the video options
    #[arg(long, allow_hyphen_values = true, num_args = 1..)]
    extra_args: Vec<String>,
    /// Verbose ffmpeg logging
    #[arg(long)]
    verbose_ffmpeg: bool,
}

/// Raw bytes given on the command line as hex.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HexBytes(Vec<u8>);

fn parse_hex(s: &str) -> Result<HexBytes, hex::FromHexError> {
    hex::decode(s).map(HexBytes)
}

fn parse_suite(s: &str) -> Result<CryptoSuite, String> {
    let value: u8 = s.parse().map_err(|e| format!("{e}"))?;
    CryptoSuite::from_hap(value).ok_or_else(|| format!("unknown SRTP suite {value}, expected 0, 1 or 2"))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let supervisor = Arc::new(FfmpegSupervisor::new(Arc::new(SupervisorConfig {
        ffmpeg_path: args.ffmpeg,
        ..SupervisorConfig::default()
    })));

    let result = match args.command {
        Command::Probe => {
            let aac = supervisor.probe_codec(hkcam::media::AAC_ENCODER).await;
            println!("{}: {}", hkcam::media::AAC_ENCODER, if aac { "available" } else { "missing" });
            Ok(())
        }
        Command::Snapshot {
            url,
            width,
            height,
            out,
            timeout,
        } => snapshot(&url, width, height, &out, Duration::from_secs(timeout)).await,
        Command::Stream(stream_args) => stream(stream_args, supervisor).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn snapshot(
    url: &str,
    width: u32,
    height: u32,
    out: &Path,
    timeout: Duration,
) -> hkcam::Result<()> {
    let image = SnapshotFetcher::new(timeout)?.fetch(url, width, height).await?;
    tokio::fs::write(out, &image).await?;
    println!("wrote {} bytes to {}", image.len(), out.display());
    Ok(())
}

async fn stream(args: StreamArgs, supervisor: Arc<FfmpegSupervisor>) -> hkcam::Result<()> {
    let mut source = CameraSource::new(&args.name, &args.rtsp_url, &args.snapshot_url);
    if let Some(target) = args.talkback {
        source = source.with_talkback(target);
    }

    let config = StreamingConfig {
        public_address: args.public_address,
        port_range: args.port_min.zip(args.port_max).map(|(min, max)| min..=max),
        extra_video_args: args.extra_args,
        verbose_transcoder: args.verbose_ffmpeg,
        ..StreamingConfig::default()
    };

    let delegate = StreamingDelegate::new(Arc::new(source), Arc::new(config), supervisor)?;

    let request = PrepareRequest::new(
        &args.session_id,
        args.peer,
        MediaOffer {
            port: args.video_port,
            srtp: SrtpParams::new(args.suite, &args.video_key.0, &args.video_salt.0),
        },
        MediaOffer {
            port: args.audio_port,
            srtp: SrtpParams::new(args.suite, &args.audio_key.0, &args.audio_salt.0),
        },
    );

    let response = delegate.negotiate(request).await?;
    println!("address     {}", response.address);
    println!("video port  {}  ssrc {}", response.video.port, response.video.ssrc);
    println!("audio port  {}  ssrc {}", response.audio.port, response.audio.ssrc);

    let params = StartRequest {
        video: VideoRequest {
            width: args.width,
            height: args.height,
            fps: args.fps,
            max_bit_rate: args.video_bitrate,
            payload_type: args.video_payload_type,
        },
        audio: AudioRequest {
            sample_rate: args.sample_rate,
            max_bit_rate: args.audio_bitrate,
            payload_type: args.audio_payload_type,
        },
    };

    if let Err(e) = delegate.start(&args.session_id, params).await {
        delegate.shutdown().await;
        return Err(e);
    }

    println!("streaming, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to wait for Ctrl-C");
    }

    delegate.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[&str] = &[
        "hkcam",
        "stream",
        "--rtsp-url",
        "rtsp://10.0.0.2:7447/Xyz123",
        "--peer",
        "192.168.1.30",
        "--video-port",
        "51000",
        "--audio-port",
        "51002",
        "--video-key",
        "00112233445566778899aabbccddeeff",
        "--video-salt",
        "0102030405060708090a0b0c0d0e",
        "--audio-key",
        "ffeeddccbbaa99887766554433221100",
        "--audio-salt",
        "0e0d0c0b0a090807060504030201",
    ];

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(STREAM.iter().chain(extra))
    }

    #[test]
    fn stream_parses_hex_srtp_material() {
        let Command::Stream(args) = parse(&[]).unwrap().command else {
            panic!("expected stream subcommand");
        };
        assert_eq!(args.video_key.0.len(), 16);
        assert_eq!(args.video_key.0[1], 0x11);
        assert_eq!(args.audio_salt.0.len(), 14);
        assert_eq!(args.suite, CryptoSuite::AesCm128HmacSha1_80);
    }

    #[test]
    fn stream_accepts_unencrypted_suite() {
        let Command::Stream(args) = parse(&["--suite", "2"]).unwrap().command else {
            panic!("expected stream subcommand");
        };
        assert_eq!(args.suite, CryptoSuite::None);
    }

    #[test]
    fn unknown_suite_is_rejected_by_the_parser() {
        assert!(parse(&["--suite", "3"]).is_err());
    }

    #[test]
    fn malformed_hex_is_rejected() {
        let mut argv = STREAM.to_vec();
        let key = argv.iter().position(|a| *a == "--video-key").unwrap() + 1;
        argv[key] = "not-hex";
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
