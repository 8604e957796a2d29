use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::net::UdpSocket;

use crate::error::{Result, StreamError};
use crate::transport::AddressFamily;

/// Default number of bind attempts before a reservation is abandoned.
pub const DEFAULT_PORT_ATTEMPTS: usize = 8;

/// UDP port reservation for streaming sessions.
///
/// Ports are found with bind-then-release: a socket is bound, its port is
/// recorded and the socket is dropped straight away. The caller (a transcoder
/// or the relay) binds the port again later, so two negotiations can race for
/// the same number. A failed bind is retried with the next candidate rather
/// than treated as fatal.
///
/// Without a range the OS picks from its ephemeral range (port 0). With a
/// range, candidates come from a wrapping cursor so consecutive reservations
/// spread across the range.
#[derive(Debug)]
pub struct PortAllocator {
    range: Option<RangeInclusive<u16>>,
    attempts: usize,
    cursor: AtomicU32,
}

impl PortAllocator {
    /// Reserve from the OS ephemeral range.
    pub fn ephemeral() -> Self {
        Self {
            range: None,
            attempts: DEFAULT_PORT_ATTEMPTS,
            cursor: AtomicU32::new(0),
        }
    }

    /// Reserve from an explicit inclusive range.
    pub fn with_range(range: RangeInclusive<u16>) -> Self {
        Self {
            range: Some(range),
            attempts: DEFAULT_PORT_ATTEMPTS,
            cursor: AtomicU32::new(0),
        }
    }

    /// Override the number of bind attempts per reservation (minimum 1).
    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    fn next_candidate(&self) -> u16 {
        match &self.range {
            None => 0,
            Some(range) => {
                let start = *range.start() as u32;
                let len = (*range.end() as u32).saturating_sub(start) + 1;
                let offset = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
                (start + offset) as u16
            }
        }
    }

    /// Reserve one UDP port for the given address family.
    pub async fn reserve(&self, family: AddressFamily) -> Result<u16> {
        for attempt in 1..=self.attempts {
            let candidate = self.next_candidate();
            let addr = SocketAddr::new(family.unspecified(), candidate);
            match UdpSocket::bind(addr).await {
                Ok(socket) => {
                    let port = socket.local_addr()?.port();
                    drop(socket);
                    tracing::trace!(port, attempt, %family, "reserved UDP port");
                    return Ok(port);
                }
                Err(e) => {
                    tracing::trace!(candidate, attempt, error = %e, "UDP port unavailable");
                }
            }
        }

        tracing::warn!(attempts = self.attempts, %family, "UDP port reservation exhausted");
        Err(StreamError::PortRangeExhausted {
            attempts: self.attempts,
        })
    }

    /// Reserve two consecutive UDP ports `(n, n + 1)` and return `n`.
    ///
    /// An ffmpeg RTP input binds RTCP on the port after its RTP port, so a
    /// port handed to a receiving transcoder must have its successor free too.
    pub async fn reserve_pair(&self, family: AddressFamily) -> Result<u16> {
        for attempt in 1..=self.attempts {
            let candidate = self.next_candidate();
            if let Some(range) = &self.range
                && candidate >= *range.end()
            {
                tracing::trace!(candidate, attempt, "no room for RTCP port in range");
                continue;
            }

            let rtp = match UdpSocket::bind(SocketAddr::new(family.unspecified(), candidate)).await {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::trace!(candidate, attempt, error = %e, "UDP port unavailable");
                    continue;
                }
            };
            let port = rtp.local_addr()?.port();
            let Some(next) = port.checked_add(1) else {
                continue;
            };

            match UdpSocket::bind(SocketAddr::new(family.unspecified(), next)).await {
                Ok(rtcp) => {
                    drop((rtp, rtcp));
                    tracing::trace!(port, attempt, %family, "reserved UDP port pair");
                    return Ok(port);
                }
                Err(e) => {
                    tracing::trace!(port, next, attempt, error = %e, "RTCP port unavailable");
                }
            }
        }

        tracing::warn!(attempts = self.attempts, %family, "UDP port pair reservation exhausted");
        Err(StreamError::PortRangeExhausted {
            attempts: self.attempts,
        })
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::ephemeral()
    }
}

/// Determine the address advertised to the viewer as the stream source.
///
/// A configured public address wins when it matches the requested family.
/// Otherwise the host's default-route interface for that family is used;
/// loopback results do not count as a usable interface.
pub fn outbound_address(family: AddressFamily, public: Option<IpAddr>) -> Result<IpAddr> {
    if let Some(addr) = public.filter(|addr| AddressFamily::of(addr) == family) {
        return Ok(addr);
    }

    let found = match family {
        AddressFamily::V4 => local_ip_address::local_ip(),
        AddressFamily::V6 => local_ip_address::local_ipv6(),
    };

    match found {
        Ok(addr) if !addr.is_loopback() && AddressFamily::of(&addr) == family => {
            tracing::debug!(%addr, %family, "resolved outbound interface address");
            Ok(addr)
        }
        Ok(addr) => {
            tracing::warn!(%addr, %family, "only an internal address is available");
            Err(StreamError::NoInterface(family))
        }
        Err(e) => {
            tracing::warn!(error = %e, %family, "no outbound interface");
            Err(StreamError::NoInterface(family))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ephemeral_reservation_is_rebindable() {
        let allocator = PortAllocator::ephemeral();
        let port = allocator.reserve(AddressFamily::V4).await.unwrap();
        assert_ne!(port, 0);
        UdpSocket::bind(("0.0.0.0", port))
            .await
            .expect("reserved port must be released");
    }

    #[tokio::test]
    async fn occupied_range_is_exhausted() {
        let held = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        let port = held.local_addr().unwrap().port();

        let allocator = PortAllocator::with_range(port..=port).attempts(3);
        let err = allocator.reserve(AddressFamily::V4).await.unwrap_err();
        assert!(matches!(err, StreamError::PortRangeExhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn reserved_pair_is_rebindable() {
        let allocator = PortAllocator::ephemeral();
        let port = allocator.reserve_pair(AddressFamily::V4).await.unwrap();

        let _rtp = UdpSocket::bind(("0.0.0.0", port)).await.expect("RTP port released");
        let _rtcp = UdpSocket::bind(("0.0.0.0", port + 1))
            .await
            .expect("RTCP port released");
    }

    #[tokio::test]
    async fn pair_skips_occupied_successor() {
        let held = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        let port = held.local_addr().unwrap().port();
        let Some(start) = port.checked_sub(1) else {
            return;
        };

        // Only (start, port) fits in the range and its second half is taken.
        let allocator = PortAllocator::with_range(start..=port).attempts(4);
        let err = allocator.reserve_pair(AddressFamily::V4).await.unwrap_err();
        assert!(matches!(err, StreamError::PortRangeExhausted { attempts: 4 }));
    }

    #[test]
    fn range_cursor_wraps() {
        let allocator = PortAllocator::with_range(40000..=40002);
        let picks: Vec<u16> = (0..5).map(|_| allocator.next_candidate()).collect();
        assert_eq!(picks, vec![40000, 40001, 40002, 40000, 40001]);
    }

    #[test]
    fn public_address_overrides_matching_family() {
        let public: IpAddr = "203.0.113.7".parse().unwrap();
        assert_eq!(
            outbound_address(AddressFamily::V4, Some(public)).unwrap(),
            public
        );
    }

    #[test]
    fn override_of_other_family_falls_through() {
        let public: IpAddr = "203.0.113.7".parse().unwrap();
        match outbound_address(AddressFamily::V6, Some(public)) {
            Ok(addr) => {
                assert_ne!(addr, public);
                assert_eq!(AddressFamily::of(&addr), AddressFamily::V6);
                assert!(!addr.is_loopback());
            }
            Err(e) => assert!(matches!(e, StreamError::NoInterface(AddressFamily::V6))),
        }
    }

    #[test]
    fn v6_override_is_used_for_v6_peers() {
        let public: IpAddr = "2001:db8::7".parse().unwrap();
        assert_eq!(
            outbound_address(AddressFamily::V6, Some(public)).unwrap(),
            public
        );
    }
}
