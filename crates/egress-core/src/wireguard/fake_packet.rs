//! Filler packets and real-packet disguise

use super::bind::PacketBind;
use super::message::{self, MessageType, COOKIE_REPLY_SIZE, RESERVED};
use super::mode::FakePacketMode;
use crate::error::Result;
use crate::options::WireGuardObfsOptions;
use crate::range::Range;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use std::io;
use std::net::SocketAddr;
use tracing::{debug, trace};

/// Filler size used when `fake_packets` is set without a size
pub const DEFAULT_FAKE_PACKET_SIZE: Range = Range::from_bounds(40, 100);

/// Filler delay used when `fake_packets` is set without a delay
pub const DEFAULT_FAKE_PACKET_DELAY: Range = Range::from_bounds(10, 50);

/// Parsed fake-packet settings for one WireGuard outbound
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FakePacketPolicy {
    /// Fillers per handshake initiation
    pub count: Range,
    /// Filler size in bytes
    pub size: Range,
    /// Delay between fillers in milliseconds
    pub delay: Range,
    /// Header pool and modify flag
    pub mode: FakePacketMode,
}

impl FakePacketPolicy {
    /// Build from options; an empty `fake_packets` disables fillers
    pub fn from_options(options: &WireGuardObfsOptions) -> Result<Self> {
        let mode = FakePacketMode::parse(&options.fake_packets_mode)?;
        if options.fake_packets.is_empty() {
            return Ok(Self {
                mode,
                ..Default::default()
            });
        }

        let count = Range::parse(&options.fake_packets).map_err(|e| e.for_key("fake_packets"))?;
        let size = parse_or(&options.fake_packets_size, DEFAULT_FAKE_PACKET_SIZE, "fake_packets_size")?;
        let delay = parse_or(&options.fake_packets_delay, DEFAULT_FAKE_PACKET_DELAY, "fake_packets_delay")?;

        Ok(Self {
            count,
            size,
            delay,
            mode,
        })
    }

    /// Whether fillers are sent at all
    pub fn sends_fillers(&self) -> bool {
        !self.count.is_zero()
    }

    /// A leading byte from the header pool, random when the pool is empty
    fn lead_byte(&self) -> u8 {
        let mut rng = OsRng;
        match self.mode.header().choose(&mut rng) {
            Some(byte) => *byte,
            None => rng.gen(),
        }
    }

    /// One filler packet of sampled size
    pub fn filler(&self) -> Vec<u8> {
        let len = self.size.sample_usize().max(1);
        let mut packet = vec![0u8; len];
        OsRng.fill_bytes(&mut packet);
        packet[0] = self.lead_byte();
        packet
    }

    /// Prepare a real packet for the wire: reserved bytes, then leading byte
    ///
    /// Cookie-reply-sized packets keep their type byte so the receiver can
    /// tell them apart from short transport messages.
    pub fn disguise(&self, packet: &mut [u8], reserved: [u8; 3]) {
        if packet.len() >= RESERVED.end {
            packet[RESERVED].copy_from_slice(&reserved);
        }
        if self.mode.modifies_packets() && !packet.is_empty() && packet.len() != COOKIE_REPLY_SIZE {
            packet[0] = self.lead_byte();
        }
    }

    /// Undo [`disguise`](Self::disguise) on a received packet
    ///
    /// Returns `None` for fillers and anything else that is not WireGuard.
    pub fn restore(&self, packet: &mut [u8]) -> Option<MessageType> {
        let kind = if self.mode.modifies_packets() && packet.len() != COOKIE_REPLY_SIZE {
            message::classify_by_size(packet.len())?
        } else {
            message::classify(packet)?
        };
        packet[0] = kind.type_byte();
        packet[RESERVED].fill(0);
        Some(kind)
    }
}

fn parse_or(text: &str, default: Range, key: &str) -> Result<Range> {
    if text.is_empty() {
        return Ok(default);
    }
    Range::parse(text).map_err(|e| e.for_key(key))
}

/// Send `packet`, preceded by a filler burst when it is a handshake initiation
pub async fn send_disguised<B>(
    bind: &B,
    policy: &FakePacketPolicy,
    reserved: [u8; 3],
    packet: &[u8],
    target: SocketAddr,
) -> io::Result<()>
where
    B: PacketBind + ?Sized,
{
    if policy.sends_fillers() && message::classify(packet) == Some(MessageType::Initiation) {
        send_fillers(bind, policy, target).await?;
    }

    let mut buf = packet.to_vec();
    policy.disguise(&mut buf, reserved);
    bind.send_to(&buf, target).await?;
    Ok(())
}

async fn send_fillers<B>(bind: &B, policy: &FakePacketPolicy, target: SocketAddr) -> io::Result<()>
where
    B: PacketBind + ?Sized,
{
    let count = policy.count.sample();
    for i in 0..count {
        let filler = policy.filler();
        bind.send_to(&filler, target).await?;
        trace!(index = i, len = filler.len(), "Sent filler packet");
        if i + 1 < count && !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay.sample_duration_ms()).await;
        }
    }
    debug!(count, %target, "Sent filler burst before handshake");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::message::{INITIATION_SIZE, MESSAGE_INITIATION, MESSAGE_TRANSPORT};

    fn options(count: &str, mode: &str) -> WireGuardObfsOptions {
        WireGuardObfsOptions {
            fake_packets: count.into(),
            fake_packets_mode: mode.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_apply_with_count() {
        let policy = FakePacketPolicy::from_options(&options("1-3", "")).unwrap();
        assert_eq!(policy.size, DEFAULT_FAKE_PACKET_SIZE);
        assert_eq!(policy.delay, DEFAULT_FAKE_PACKET_DELAY);
        assert!(policy.sends_fillers());

        let policy = FakePacketPolicy::from_options(&options("", "m4")).unwrap();
        assert!(!policy.sends_fillers());
        assert!(policy.size.is_zero());
        assert_eq!(policy.mode.header().len(), 8);
    }

    #[test]
    fn test_errors_name_field() {
        let mut opts = options("5", "");
        opts.fake_packets_delay = "9-1".into();
        match FakePacketPolicy::from_options(&opts) {
            Err(crate::Error::ConfigValue { key, .. }) => assert_eq!(key, "fake_packets_delay"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(FakePacketPolicy::from_options(&options("5", "m9")).is_err());
    }

    #[test]
    fn test_filler_uses_pool() {
        let policy = FakePacketPolicy::from_options(&options("1", "m6")).unwrap();
        for _ in 0..32 {
            let filler = policy.filler();
            assert!((40..=100).contains(&filler.len()));
            assert!(policy.mode.header().contains(&filler[0]));
        }
    }

    #[test]
    fn test_disguise_restore_modify() {
        let policy = FakePacketPolicy::from_options(&options("", "m5")).unwrap();
        let mut packet = vec![0u8; INITIATION_SIZE];
        packet[0] = MESSAGE_INITIATION;
        policy.disguise(&mut packet, [7, 8, 9]);
        assert!(policy.mode.header().contains(&packet[0]));
        assert_eq!(&packet[1..4], &[7, 8, 9]);

        assert_eq!(policy.restore(&mut packet), Some(MessageType::Initiation));
        assert_eq!(&packet[..4], &[MESSAGE_INITIATION, 0, 0, 0]);
    }

    #[test]
    fn test_cookie_sized_packets_untouched() {
        let policy = FakePacketPolicy::from_options(&options("", "g11")).unwrap();
        let mut packet = vec![0u8; COOKIE_REPLY_SIZE];
        packet[0] = MESSAGE_TRANSPORT;
        policy.disguise(&mut packet, [0, 0, 0]);
        assert_eq!(packet[0], MESSAGE_TRANSPORT);
        assert_eq!(policy.restore(&mut packet), Some(MessageType::Transport));
    }

    #[test]
    fn test_restore_drops_fillers() {
        let policy = FakePacketPolicy::from_options(&options("1", "m2")).unwrap();
        let mut filler = vec![0xEEu8; 50];
        assert_eq!(policy.restore(&mut filler), None);
    }
}
