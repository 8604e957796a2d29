use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

use crate::config::StreamingConfig;
use crate::error::{Result, StreamError};
use crate::media::ffmpeg::{self, TalkbackParams, TranscodeParams, TranscodePlan};
use crate::media::rtp::{RandomSsrc, SsrcGenerator};
use crate::media::AAC_ENCODER;
use crate::process::{ProcessHandle, Supervisor};
use crate::protocol::{
    MediaAnswer, PrepareRequest, PrepareResponse, StartRequest, StreamRequest, VideoRequest,
};
use crate::session::{ActiveSession, MediaTransport, PendingSession, SessionRegistry, SessionState};
use crate::snapshot::SnapshotFetcher;
use crate::source::CameraSource;
use crate::transport::udp::outbound_address;
use crate::transport::{AddressFamily, PortAllocator, TwoWayAudioRelay};

/// HomeKit camera streaming delegate for one camera.
///
/// Owns the session registry and wires negotiation, transcoder launch and
/// teardown together:
///
/// ```text
/// negotiate ─► ports + SSRCs + SRTP ─► PendingSession
/// start     ─► command builder ─► supervisor (+ relay, talkback) ─► ActiveSession
/// stop      ─► stop processes ─► close relay ─► entry removed
/// ```
pub struct StreamingDelegate {
    source: Arc<CameraSource>,
    config: Arc<StreamingConfig>,
    supervisor: Arc<dyn Supervisor>,
    ports: PortAllocator,
    ssrcs: Arc<dyn SsrcGenerator>,
    sessions: SessionRegistry,
    aac: OnceCell<bool>,
    snapshots: SnapshotFetcher,
}

impl StreamingDelegate {
    pub fn new(
        source: Arc<CameraSource>,
        config: Arc<StreamingConfig>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Result<Self> {
        let snapshots = SnapshotFetcher::new(config.snapshot_timeout)?;
        Ok(Self {
            ports: config.port_allocator(),
            source,
            config,
            supervisor,
            ssrcs: Arc::new(RandomSsrc),
            sessions: SessionRegistry::new(),
            aac: OnceCell::new(),
            snapshots,
        })
    }

    /// Replace the SSRC source.
    pub fn with_ssrc_generator(mut self, generator: Arc<dyn SsrcGenerator>) -> Self {
        self.ssrcs = generator;
        self
    }

    pub fn source(&self) -> &CameraSource {
        &self.source
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Whether the transcoder can encode AAC-ELD. Probed once, then cached.
    pub async fn aac_capability(&self) -> bool {
        *self
            .aac
            .get_or_init(|| async { self.supervisor.probe_codec(AAC_ENCODER).await })
            .await
    }

    /// Handle a prepare request: reserve ports, pick SSRCs and store a
    /// pending session.
    ///
    /// Allocation failures abort the negotiation without leaving state
    /// behind.
    pub async fn negotiate(&self, request: PrepareRequest) -> Result<PrepareResponse> {
        let id = request.session_id.as_str();
        let family = request.family;

        self.release_expired().await;

        if self.sessions.state(id).is_some_and(|s| s != SessionState::Pending) {
            tracing::warn!(session_id = id, "negotiate for a running session, stopping it first");
            self.stop(id).await;
        }

        let has_aac = self.aac_capability().await;
        if !has_aac {
            tracing::warn!(
                session_id = id,
                encoder = AAC_ENCODER,
                "transcoder lacks AAC support, streaming video only"
            );
        }
        let two_way = has_aac && self.source.two_way_audio();

        let address = outbound_address(family, self.config.public_address)?;

        let video_return = self.ports.reserve(family).await?;
        let audio_return = self.ports.reserve(family).await?;
        let (two_way_port, relay) = if two_way {
            let two_way_port = self.ports.reserve_pair(family).await?;
            let relay = self.bind_relay(id, family, audio_return, two_way_port).await?;
            (Some(two_way_port), Some(relay))
        } else {
            (None, None)
        };

        let audio_port = relay.as_ref().map_or(audio_return, |r| r.server_port());

        let pending = PendingSession {
            id: id.to_string(),
            peer: request.target_address,
            family,
            video: MediaTransport {
                port: request.video.port,
                return_port: video_return,
                ssrc: 0,
                srtp: request.video.srtp.clone(),
            },
            audio: MediaTransport {
                port: request.audio.port,
                return_port: audio_return,
                ssrc: 0,
                srtp: request.audio.srtp.clone(),
            },
            two_way_port,
            has_aac,
            relay,
            negotiated_at: Instant::now(),
        };

        let ((video_ssrc, audio_ssrc), stale) =
            self.sessions.insert_pending(pending, self.ssrcs.as_ref());
        if let Some(stale) = stale {
            tracing::debug!(session_id = id, "replaced stale negotiation");
            stale.abandon().await;
        }

        tracing::info!(
            session_id = id,
            peer = %request.target_address,
            %address,
            video_return,
            audio_port,
            two_way,
            "stream negotiated"
        );

        Ok(PrepareResponse {
            address,
            video: MediaAnswer {
                port: video_return,
                ssrc: video_ssrc,
                srtp_key: request.video.srtp.key().to_vec(),
                srtp_salt: request.video.srtp.salt().to_vec(),
            },
            audio: MediaAnswer {
                port: audio_port,
                ssrc: audio_ssrc,
                srtp_key: request.audio.srtp.key().to_vec(),
                srtp_salt: request.audio.srtp.salt().to_vec(),
            },
        })
    }

    /// Drop negotiations that were never started.
    async fn release_expired(&self) {
        for pending in self.sessions.take_expired(self.config.pending_timeout) {
            tracing::info!(
                session_id = %pending.id,
                timeout_s = self.config.pending_timeout.as_secs(),
                "negotiation expired without start"
            );
            pending.abandon().await;
        }
    }

    /// Bind the relay's server socket, re-reserving when another
    /// negotiation grabbed the port first.
    async fn bind_relay(
        &self,
        id: &str,
        family: AddressFamily,
        return_port: u16,
        two_way_port: u16,
    ) -> Result<TwoWayAudioRelay> {
        let attempts = self.config.port_attempts.max(1);
        for attempt in 1..=attempts {
            let server_port = self.ports.reserve(family).await?;
            match TwoWayAudioRelay::bind(id, family, server_port, return_port, two_way_port).await {
                Ok(relay) => return Ok(relay),
                Err(e) => {
                    tracing::debug!(session_id = id, server_port, attempt, error = %e, "relay bind lost a port race");
                }
            }
        }
        Err(StreamError::PortRangeExhausted { attempts })
    }

    /// Start streaming a negotiated session.
    ///
    /// The pending record is consumed whether or not the launch succeeds.
    pub async fn start(&self, id: &str, params: StartRequest) -> Result<()> {
        let Some((ticket, pending)) = self.sessions.begin_start(id) else {
            tracing::warn!(session_id = id, "start for unknown session");
            return Err(StreamError::SessionNotFound(id.to_string()));
        };

        let talkback = match (pending.two_way_port, self.source.talkback) {
            (Some(two_way_port), Some(target)) => Some(TalkbackParams {
                camera_name: &self.source.name,
                family: pending.family,
                two_way_port,
                target,
            }),
            _ => None,
        };

        let plan = ffmpeg::build(&TranscodeParams {
            source_url: &self.source.rtsp_url,
            peer: pending.peer,
            video: &pending.video,
            audio: &pending.audio,
            video_request: params.video,
            audio_request: params.audio,
            aac_available: pending.has_aac,
            talkback,
            extra_args: &self.config.extra_video_args,
            verbose: self.config.verbose_transcoder,
        });

        tracing::info!(
            session_id = id,
            width = params.video.width,
            height = params.video.height,
            fps = params.video.fps,
            bitrate = params.video.max_bit_rate,
            audio = pending.has_aac,
            talkback = plan.talkback.is_some(),
            "starting stream"
        );

        let ssrcs = (pending.video.ssrc, pending.audio.ssrc);
        let relay = pending.relay;

        let processes = match self.launch(id, &plan).await {
            Ok(processes) => processes,
            Err(e) => {
                tracing::error!(session_id = id, error = %e, "stream launch failed");
                if let Some(relay) = &relay {
                    relay.close().await;
                }
                self.sessions.abort_start(id, ticket);
                return Err(e);
            }
        };

        if let Err(session) = self
            .sessions
            .activate(ticket, ActiveSession::new(id, ssrcs, processes, relay))
        {
            tracing::info!(session_id = id, "stopped while starting, tearing down");
            session.teardown().await;
            return Err(StreamError::StartCancelled(id.to_string()));
        }

        tracing::info!(session_id = id, "stream active");
        Ok(())
    }

    /// Launch the outbound transcoder and, when planned, the talkback decoder.
    /// On failure every process already launched is stopped.
    async fn launch(&self, id: &str, plan: &TranscodePlan) -> Result<Vec<Box<dyn ProcessHandle>>> {
        let mut outbound = self.supervisor.start(&plan.outbound, false).await?;

        let Some(talkback) = &plan.talkback else {
            return Ok(vec![outbound]);
        };

        let fed = match self.supervisor.start(&talkback.command, true).await {
            Ok(mut process) => match feed_sdp(process.as_mut(), &talkback.sdp).await {
                Ok(()) => Ok(process),
                Err(e) => {
                    if let Err(stop_err) = process.stop().await {
                        tracing::warn!(session_id = id, error = %stop_err, "failed to stop talkback decoder");
                    }
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        match fed {
            Ok(process) => Ok(vec![outbound, process]),
            Err(e) => {
                if let Err(stop_err) = outbound.stop().await {
                    tracing::warn!(session_id = id, error = %stop_err, "failed to stop transcoder");
                }
                Err(e)
            }
        }
    }

    /// Stop a session in whatever state it is in. Unknown ids are ignored and
    /// teardown problems are only logged.
    pub async fn stop(&self, id: &str) {
        let removed = self.sessions.remove(id);
        if removed.is_empty() {
            tracing::debug!(session_id = id, "stop for unknown session");
            return;
        }

        if let Some(pending) = removed.pending {
            pending.abandon().await;
        }
        if let Some(active) = removed.active {
            active.teardown().await;
        }
        if removed.was_starting {
            tracing::debug!(session_id = id, "start in flight will tear itself down");
        }

        tracing::info!(session_id = id, "stream stopped");
    }

    /// Reconfiguration is accepted but not acted on.
    pub async fn reconfigure(&self, id: &str, video: VideoRequest) {
        tracing::info!(
            session_id = id,
            width = video.width,
            height = video.height,
            fps = video.fps,
            bitrate = video.max_bit_rate,
            "ignoring reconfigure request"
        );
    }

    /// Dispatch a stream control request.
    pub async fn handle(&self, request: StreamRequest) -> Result<()> {
        match request {
            StreamRequest::Start { session_id, params } => self.start(&session_id, params).await,
            StreamRequest::Reconfigure { session_id, video } => {
                self.reconfigure(&session_id, video).await;
                Ok(())
            }
            StreamRequest::Stop { session_id } => {
                self.stop(&session_id).await;
                Ok(())
            }
        }
    }

    /// Stop every session. Used once on process shutdown.
    pub async fn shutdown(&self) {
        let ids = self.sessions.ids();
        tracing::info!(sessions = ids.len(), camera = %self.source.name, "shutting down streams");
        for id in ids {
            self.stop(&id).await;
        }
    }

    /// Fetch a still image from the camera.
    pub async fn snapshot(&self, width: u32, height: u32) -> Result<Bytes> {
        self.snapshots
            .fetch(&self.source.snapshot_url, width, height)
            .await
    }
}

/// Write the session description to the talkback decoder and close its stdin.
async fn feed_sdp(process: &mut dyn ProcessHandle, sdp: &str) -> Result<()> {
    let mut stdin = process
        .take_stdin()
        .ok_or_else(|| StreamError::launch("talkback decoder", "stdin unavailable"))?;
    stdin.write_all(sdp.as_bytes()).await?;
    stdin.shutdown().await?;
    Ok(())
}
