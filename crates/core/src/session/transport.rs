use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// SRTP cipher suite selected by the viewer (HAP `SRTPCryptoSuite`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoSuite {
    AesCm128HmacSha1_80,
    AesCm256HmacSha1_80,
    /// Unencrypted RTP.
    None,
}

impl CryptoSuite {
    /// Map the numeric identifier used on the HomeKit wire.
    pub fn from_hap(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::AesCm128HmacSha1_80),
            1 => Some(Self::AesCm256HmacSha1_80),
            2 => Some(Self::None),
            _ => None,
        }
    }

    /// Suite name as understood by ffmpeg's `-srtp_out_suite`.
    pub fn ffmpeg_name(self) -> Option<&'static str> {
        match self {
            Self::AesCm128HmacSha1_80 => Some("AES_CM_128_HMAC_SHA1_80"),
            Self::AesCm256HmacSha1_80 => Some("AES_CM_256_HMAC_SHA1_80"),
            Self::None => None,
        }
    }
}

/// SRTP parameters for one media leg, exactly as the viewer supplied them.
///
/// The key and salt are kept concatenated (`key ‖ salt`), which is the form
/// both ffmpeg's `-srtp_out_params` and SDP `a=crypto` lines expect. The bytes
/// are never inspected here, only carried from negotiation to the command line.
#[derive(Clone, PartialEq, Eq)]
pub struct SrtpParams {
    pub suite: CryptoSuite,
    key_salt: Vec<u8>,
    key_len: usize,
}

impl SrtpParams {
    pub fn new(suite: CryptoSuite, key: &[u8], salt: &[u8]) -> Self {
        let mut key_salt = Vec::with_capacity(key.len() + salt.len());
        key_salt.extend_from_slice(key);
        key_salt.extend_from_slice(salt);
        Self {
            suite,
            key_salt,
            key_len: key.len(),
        }
    }

    /// Concatenated key and salt.
    pub fn key_salt(&self) -> &[u8] {
        &self.key_salt
    }

    pub fn key(&self) -> &[u8] {
        &self.key_salt[..self.key_len]
    }

    pub fn salt(&self) -> &[u8] {
        &self.key_salt[self.key_len..]
    }

    /// Base64 of `key ‖ salt` (RFC 4568 inline key parameter).
    pub fn inline_key(&self) -> String {
        STANDARD.encode(&self.key_salt)
    }
}

impl std::fmt::Debug for SrtpParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrtpParams")
            .field("suite", &self.suite)
            .field("key_salt", &format_args!("<{} bytes>", self.key_salt.len()))
            .finish()
    }
}

/// Negotiated parameters for one media leg (video or audio).
#[derive(Debug, Clone)]
pub struct MediaTransport {
    /// Viewer's receive port; RTP and RTCP are multiplexed on it.
    pub port: u16,
    /// Local port the transcoder binds for RTCP from the viewer.
    pub return_port: u16,
    /// SSRC this accessory sends with.
    pub ssrc: u32,
    pub srtp: SrtpParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_salt_is_concatenated() {
        let params = SrtpParams::new(CryptoSuite::AesCm128HmacSha1_80, &[1; 16], &[2; 14]);
        assert_eq!(params.key_salt().len(), 30);
        assert_eq!(params.key(), &[1; 16]);
        assert_eq!(params.salt(), &[2; 14]);
    }

    #[test]
    fn inline_key_is_base64_of_key_and_salt() {
        let params = SrtpParams::new(CryptoSuite::AesCm128HmacSha1_80, b"0123456789abcdef", b"SALT");
        assert_eq!(params.inline_key(), STANDARD.encode(b"0123456789abcdefSALT"));
    }

    #[test]
    fn hap_suite_mapping() {
        assert_eq!(CryptoSuite::from_hap(0), Some(CryptoSuite::AesCm128HmacSha1_80));
        assert_eq!(CryptoSuite::from_hap(2), Some(CryptoSuite::None));
        assert_eq!(CryptoSuite::from_hap(7), None);
        assert_eq!(CryptoSuite::None.ffmpeg_name(), None);
    }

    #[test]
    fn debug_hides_key_material() {
        let params = SrtpParams::new(CryptoSuite::AesCm128HmacSha1_80, &[0xAA; 16], &[0xBB; 14]);
        let shown = format!("{params:?}");
        assert!(shown.contains("<30 bytes>"));
        assert!(!shown.contains("170"));
    }
}
