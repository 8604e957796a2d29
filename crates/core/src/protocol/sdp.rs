//! Talkback session description (RFC 4566).
//!
//! The talkback transcoder learns about the viewer's microphone stream from an
//! SDP document written to its standard input:
//!
//! ```text
//! v=0
//! o=- 0 0 IN IP4 127.0.0.1
//! s=Front Door Audio Talkback
//! c=IN IP4 192.168.1.30
//! t=0 0
//! m=audio 52000 RTP/AVP 110
//! b=AS:24
//! a=rtpmap:110 MPEG4-GENERIC/16000/1
//! a=fmtp:110 profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3; config=F8F0212C00BC00
//! a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:<base64 key+salt>
//! ```
//!
//! HomeKit sends AAC-ELD, 16 kHz mono, on dynamic payload type 110.

use std::net::IpAddr;

use crate::session::transport::SrtpParams;
use crate::transport::AddressFamily;

/// Dynamic RTP payload type HomeKit uses for return audio.
pub const TALKBACK_PAYLOAD_TYPE: u8 = 110;

/// Build the SDP message describing the viewer's return-audio stream.
pub fn talkback_sdp(
    session_name: &str,
    family: AddressFamily,
    peer: IpAddr,
    two_way_port: u16,
    srtp: &SrtpParams,
) -> String {
    let addrtype = family.sdp_addrtype();
    let pt = TALKBACK_PAYLOAD_TYPE;

    let sdp = [
        "v=0".to_string(),
        format!("o=- 0 0 IN {addrtype} 127.0.0.1"),
        format!("s={session_name} Audio Talkback"),
        format!("c=IN {addrtype} {peer}"),
        "t=0 0".to_string(),
        format!("m=audio {two_way_port} RTP/AVP {pt}"),
        "b=AS:24".to_string(),
        format!("a=rtpmap:{pt} MPEG4-GENERIC/16000/1"),
        format!(
            "a=fmtp:{pt} profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3; config=F8F0212C00BC00"
        ),
        format!("a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:{}", srtp.inline_key()),
    ];

    tracing::trace!(sdp = %sdp.join("\\n"), "talkback SDP");

    format!("{}\n", sdp.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::transport::CryptoSuite;

    #[test]
    fn talkback_sdp_literal_structure() {
        let srtp = SrtpParams::new(CryptoSuite::AesCm128HmacSha1_80, &[0u8; 16], &[0u8; 14]);
        let sdp = talkback_sdp(
            "Front Door",
            AddressFamily::V4,
            "192.168.1.30".parse().unwrap(),
            52000,
            &srtp,
        );

        let lines: Vec<&str> = sdp.lines().collect();
        assert_eq!(lines[0], "v=0");
        assert_eq!(lines[1], "o=- 0 0 IN IP4 127.0.0.1");
        assert_eq!(lines[2], "s=Front Door Audio Talkback");
        assert_eq!(lines[3], "c=IN IP4 192.168.1.30");
        assert_eq!(lines[4], "t=0 0");
        assert_eq!(lines[5], "m=audio 52000 RTP/AVP 110");
        assert_eq!(lines[6], "b=AS:24");
        assert_eq!(lines[7], "a=rtpmap:110 MPEG4-GENERIC/16000/1");
        assert_eq!(
            lines[8],
            "a=fmtp:110 profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3; config=F8F0212C00BC00"
        );
        assert_eq!(
            lines[9],
            format!("a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:{}", srtp.inline_key())
        );
        assert_eq!(lines.len(), 10);
        assert!(sdp.ends_with('\n'));
    }

    #[test]
    fn ipv6_uses_ip6_addrtype() {
        let srtp = SrtpParams::new(CryptoSuite::AesCm128HmacSha1_80, &[1u8; 16], &[2u8; 14]);
        let sdp = talkback_sdp("Cam", AddressFamily::V6, "fd00::5".parse().unwrap(), 4000, &srtp);
        assert!(sdp.contains("o=- 0 0 IN IP6 127.0.0.1\n"));
        assert!(sdp.contains("c=IN IP6 fd00::5\n"));
    }
}
