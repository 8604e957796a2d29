use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::media::rtp::{self, PacketKind};
use crate::transport::AddressFamily;

/// Large enough for any UDP datagram HomeKit or ffmpeg will send.
const MAX_DATAGRAM: usize = 2048;

/// Pause after a failed receive so a broken socket cannot spin the loop.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(20);

/// UDP relay bridging a viewer's return audio to the local transcoders.
///
/// ```text
///                     server_port                      return_port
/// viewer (HomeKit) <-> [client] --RTCP--> [transcoder] <-> outbound ffmpeg
///                               --RTP/RTCP-> [talkback] <-> talkback ffmpeg
///                                                      two_way_port
/// ```
///
/// The client socket is bound at the negotiated `server_port`, the port
/// advertised to the viewer for audio. Microphone RTP goes to the talkback
/// decoder, RTCP goes to the outbound transcoder's RTCP port and is copied to
/// the talkback decoder as a keepalive. Anything the local processes send back
/// is returned to the last viewer address seen. Payloads are forwarded as-is
/// and socket errors only cost the packet at hand.
#[derive(Debug)]
pub struct TwoWayAudioRelay {
    session_id: String,
    local_ports: [u16; 3],
    task: Mutex<Option<JoinHandle<()>>>,
}

struct RelaySockets {
    client: UdpSocket,
    transcoder: UdpSocket,
    talkback: UdpSocket,
    return_addr: SocketAddr,
    two_way_addr: SocketAddr,
}

impl TwoWayAudioRelay {
    /// Bind the three relay sockets and start forwarding.
    pub async fn bind(
        session_id: &str,
        family: AddressFamily,
        server_port: u16,
        return_port: u16,
        two_way_port: u16,
    ) -> Result<Self> {
        let loopback = family.loopback();
        let client = UdpSocket::bind(SocketAddr::new(family.unspecified(), server_port)).await?;
        let transcoder = UdpSocket::bind(SocketAddr::new(loopback, 0)).await?;
        let talkback = UdpSocket::bind(SocketAddr::new(loopback, 0)).await?;

        let local_ports = [
            client.local_addr()?.port(),
            transcoder.local_addr()?.port(),
            talkback.local_addr()?.port(),
        ];

        let sockets = RelaySockets {
            client,
            transcoder,
            talkback,
            return_addr: SocketAddr::new(loopback, return_port),
            two_way_addr: SocketAddr::new(loopback, two_way_port),
        };

        tracing::debug!(
            session_id,
            server_port,
            return_port,
            two_way_port,
            ?local_ports,
            "two-way audio relay bound"
        );

        let task = tokio::spawn(sockets.run(session_id.to_string()));

        Ok(Self {
            session_id: session_id.to_string(),
            local_ports,
            task: Mutex::new(Some(task)),
        })
    }

    /// Local ports of the client, transcoder-facing and talkback-facing sockets.
    pub fn local_ports(&self) -> [u16; 3] {
        self.local_ports
    }

    /// Port facing the viewer (the negotiated server port).
    pub fn server_port(&self) -> u16 {
        self.local_ports[0]
    }

    pub fn is_closed(&self) -> bool {
        self.task.lock().is_none()
    }

    /// Stop forwarding and release all three sockets.
    ///
    /// Safe to call any number of times. When this returns the sockets have
    /// been dropped and their ports can be bound again.
    pub async fn close(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
            tracing::debug!(session_id = %self.session_id, "two-way audio relay closed");
        }
    }
}

impl Drop for TwoWayAudioRelay {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl RelaySockets {
    async fn run(self, session_id: String) {
        let mut client_buf = vec![0u8; MAX_DATAGRAM];
        let mut transcoder_buf = vec![0u8; MAX_DATAGRAM];
        let mut talkback_buf = vec![0u8; MAX_DATAGRAM];
        let mut viewer: Option<SocketAddr> = None;

        loop {
            tokio::select! {
                received = self.client.recv_from(&mut client_buf) => match received {
                    Ok((len, from)) => {
                        viewer = Some(from);
                        self.from_viewer(&session_id, &client_buf[..len]).await;
                    }
                    Err(e) => recv_failed(&session_id, "viewer", e).await,
                },
                received = self.transcoder.recv_from(&mut transcoder_buf) => match received {
                    Ok((len, _)) => self.to_viewer(&session_id, viewer, &transcoder_buf[..len]).await,
                    Err(e) => recv_failed(&session_id, "transcoder", e).await,
                },
                received = self.talkback.recv_from(&mut talkback_buf) => match received {
                    Ok((len, _)) => self.to_viewer(&session_id, viewer, &talkback_buf[..len]).await,
                    Err(e) => recv_failed(&session_id, "talkback", e).await,
                },
            }
        }
    }

    async fn from_viewer(&self, session_id: &str, packet: &[u8]) {
        match rtp::classify(packet) {
            PacketKind::Rtp => {
                forward(session_id, &self.talkback, packet, self.two_way_addr).await;
            }
            PacketKind::Rtcp => {
                forward(session_id, &self.transcoder, packet, self.return_addr).await;
                forward(session_id, &self.talkback, packet, self.two_way_addr).await;
            }
        }
    }

    async fn to_viewer(&self, session_id: &str, viewer: Option<SocketAddr>, packet: &[u8]) {
        match viewer {
            Some(addr) => forward(session_id, &self.client, packet, addr).await,
            None => tracing::trace!(session_id, len = packet.len(), "no viewer yet, dropping"),
        }
    }
}

async fn recv_failed(session_id: &str, side: &'static str, error: io::Error) {
    tracing::debug!(session_id, side, %error, "relay receive failed");
    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
}

async fn forward(session_id: &str, socket: &UdpSocket, packet: &[u8], dest: SocketAddr) {
    match socket.send_to(packet, dest).await {
        Ok(_) => tracing::trace!(session_id, %dest, len = packet.len(), "relayed"),
        Err(e) => tracing::warn!(session_id, %dest, error = %e, "relay send failed, packet dropped"),
    }
}
