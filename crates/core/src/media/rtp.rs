use rand::RngExt;

/// Source of synchronization-source identifiers (RFC 3550 §8.1).
///
/// HomeKit expects the accessory to pick one SSRC per media stream during
/// negotiation. The default generator draws them at random; tests swap in a
/// deterministic sequence.
pub trait SsrcGenerator: Send + Sync {
    fn generate(&self) -> u32;
}

/// Random SSRCs, as recommended by RFC 3550 §8.1 to keep independent
/// senders from colliding.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSsrc;

impl SsrcGenerator for RandomSsrc {
    fn generate(&self) -> u32 {
        rand::rng().random::<u32>()
    }
}

/// Coarse kind of a datagram arriving on the talkback relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// RTP media (microphone audio).
    Rtp,
    /// RTCP control traffic (sender/receiver reports, keepalives).
    Rtcp,
}

/// Classify a datagram by the payload-type bits of its second byte.
///
/// ```text
///  0                   1
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// RTCP packet types 200–204 land on 72–76 once the marker bit is masked
/// off, so anything at or below 90 (except PCMU's 0) is control traffic.
/// Dynamic audio payload types such as HomeKit's 110 are media.
/// Nothing past the second byte is read.
pub fn classify(packet: &[u8]) -> PacketKind {
    match packet.get(1).map(|b| b & 0x7f) {
        Some(pt) if pt == 0 || pt > 90 => PacketKind::Rtp,
        _ => PacketKind::Rtcp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(second_byte: u8) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0] = 2 << 6;
        buf[1] = second_byte;
        buf
    }

    #[test]
    fn dynamic_audio_is_rtp() {
        assert_eq!(classify(&header(110)), PacketKind::Rtp);
        assert_eq!(classify(&header(0x80 | 110)), PacketKind::Rtp);
    }

    #[test]
    fn pcmu_is_rtp() {
        assert_eq!(classify(&header(0)), PacketKind::Rtp);
    }

    #[test]
    fn sender_and_receiver_reports_are_rtcp() {
        assert_eq!(classify(&header(200)), PacketKind::Rtcp);
        assert_eq!(classify(&header(201)), PacketKind::Rtcp);
    }

    #[test]
    fn runt_datagram_is_control() {
        assert_eq!(classify(&[0x80]), PacketKind::Rtcp);
        assert_eq!(classify(&[]), PacketKind::Rtcp);
    }

    #[test]
    fn random_ssrc_differs() {
        let generator = RandomSsrc;
        assert_ne!(generator.generate(), generator.generate());
    }
}
