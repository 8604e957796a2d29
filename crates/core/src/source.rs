use std::net::SocketAddr;

/// A camera as resolved by the accessory layer.
///
/// Immutable for the lifetime of a session; the delegate holds it behind an
/// `Arc` and never modifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSource {
    /// Display name, used in logs and the talkback SDP session name.
    pub name: String,
    /// Resolved RTSP URL of the selected quality tier.
    pub rtsp_url: String,
    pub snapshot_url: String,
    /// Camera's talkback listener. `Some` means the camera supports two-way audio.
    pub talkback: Option<SocketAddr>,
}

impl CameraSource {
    pub fn new(name: &str, rtsp_url: &str, snapshot_url: &str) -> Self {
        Self {
            name: name.to_string(),
            rtsp_url: rtsp_url.to_string(),
            snapshot_url: snapshot_url.to_string(),
            talkback: None,
        }
    }

    /// Enable two-way audio toward the given talkback listener.
    pub fn with_talkback(mut self, target: SocketAddr) -> Self {
        self.talkback = Some(target);
        self
    }

    pub fn two_way_audio(&self) -> bool {
        self.talkback.is_some()
    }
}

/// RTSP URL of a controller-hosted stream: `rtsp://{host}:{port}/{alias}`.
///
/// ```
/// assert_eq!(
///     hkcam::source::rtsp_url("10.0.0.2", 7447, "Xyz123"),
///     "rtsp://10.0.0.2:7447/Xyz123"
/// );
/// ```
pub fn rtsp_url(controller_host: &str, rtsp_port: u16, stream_alias: &str) -> String {
    format!(
        "rtsp://{}:{}/{}",
        controller_host,
        rtsp_port,
        stream_alias.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_leading_slash_is_not_doubled() {
        assert_eq!(rtsp_url("nvr.local", 7447, "/abc"), "rtsp://nvr.local:7447/abc");
    }

    #[test]
    fn talkback_marks_two_way_capability() {
        let source = CameraSource::new("Porch", "rtsp://a/b", "http://a/snap.jpg");
        assert!(!source.two_way_audio());
        let source = source.with_talkback("127.0.0.1:7000".parse().unwrap());
        assert!(source.two_way_audio());
    }
}
