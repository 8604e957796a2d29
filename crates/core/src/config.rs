use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::transport::PortAllocator;
use crate::transport::udp::DEFAULT_PORT_ATTEMPTS;

/// Process-wide streaming configuration.
///
/// Built once at startup (the CLI fills it from its arguments) and shared by
/// reference with every [`StreamingDelegate`](crate::StreamingDelegate).
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Address advertised to viewers. When `None`, or when it does not match
    /// the viewer's address family, the default-route interface is used.
    pub public_address: Option<IpAddr>,
    /// Restrict negotiated UDP ports to this range instead of the OS
    /// ephemeral range.
    pub port_range: Option<RangeInclusive<u16>>,
    /// Bind attempts per port reservation.
    pub port_attempts: usize,
    /// Extra transcoder arguments appended to the video encoding options.
    pub extra_video_args: Vec<String>,
    /// Ask ffmpeg for verbose logging.
    pub verbose_transcoder: bool,
    /// Upper bound on a snapshot request.
    pub snapshot_timeout: Duration,
    /// Negotiated sessions not started within this time are released.
    pub pending_timeout: Duration,
}

impl StreamingConfig {
    /// Port allocator honouring the configured range and attempt count.
    pub fn port_allocator(&self) -> PortAllocator {
        let allocator = match &self.port_range {
            Some(range) => PortAllocator::with_range(range.clone()),
            None => PortAllocator::ephemeral(),
        };
        allocator.attempts(self.port_attempts)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            public_address: None,
            port_range: None,
            port_attempts: DEFAULT_PORT_ATTEMPTS,
            extra_video_args: Vec::new(),
            verbose_transcoder: false,
            snapshot_timeout: Duration::from_secs(10),
            pending_timeout: Duration::from_secs(60),
        }
    }
}
