//! WireGuard message framing

/// Handshake initiation type byte
pub const MESSAGE_INITIATION: u8 = 1;
/// Handshake response type byte
pub const MESSAGE_RESPONSE: u8 = 2;
/// Cookie reply type byte
pub const MESSAGE_COOKIE_REPLY: u8 = 3;
/// Transport data type byte
pub const MESSAGE_TRANSPORT: u8 = 4;

/// Handshake initiation size
pub const INITIATION_SIZE: usize = 148;
/// Handshake response size
pub const RESPONSE_SIZE: usize = 92;
/// Cookie reply size
pub const COOKIE_REPLY_SIZE: usize = 64;
/// Smallest transport message (header + tag, empty keepalive)
pub const TRANSPORT_MIN_SIZE: usize = 32;
/// Transport payloads are padded to this multiple
pub const TRANSPORT_ALIGN: usize = 16;

/// Range of reserved bytes following the type byte
pub const RESERVED: std::ops::Range<usize> = 1..4;

/// Kind of a WireGuard message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Handshake initiation
    Initiation,
    /// Handshake response
    Response,
    /// Cookie reply
    CookieReply,
    /// Transport data
    Transport,
}

impl MessageType {
    /// Decode a type byte
    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            MESSAGE_INITIATION => Some(Self::Initiation),
            MESSAGE_RESPONSE => Some(Self::Response),
            MESSAGE_COOKIE_REPLY => Some(Self::CookieReply),
            MESSAGE_TRANSPORT => Some(Self::Transport),
            _ => None,
        }
    }

    /// Wire type byte
    pub fn type_byte(self) -> u8 {
        match self {
            Self::Initiation => MESSAGE_INITIATION,
            Self::Response => MESSAGE_RESPONSE,
            Self::CookieReply => MESSAGE_COOKIE_REPLY,
            Self::Transport => MESSAGE_TRANSPORT,
        }
    }

    /// Whether `len` is a valid size for this kind
    pub fn size_matches(self, len: usize) -> bool {
        match self {
            Self::Initiation => len == INITIATION_SIZE,
            Self::Response => len == RESPONSE_SIZE,
            Self::CookieReply => len == COOKIE_REPLY_SIZE,
            Self::Transport => is_transport_size(len),
        }
    }
}

fn is_transport_size(len: usize) -> bool {
    len >= TRANSPORT_MIN_SIZE && (len - TRANSPORT_MIN_SIZE) % TRANSPORT_ALIGN == 0
}

/// Classify by type byte, checked against the size
pub fn classify(packet: &[u8]) -> Option<MessageType> {
    let kind = MessageType::from_type_byte(*packet.first()?)?;
    kind.size_matches(packet.len()).then_some(kind)
}

/// Classify by size alone
///
/// 64 bytes fits both a cookie reply and a short transport message, so it
/// is left unclassified.
pub fn classify_by_size(len: usize) -> Option<MessageType> {
    match len {
        INITIATION_SIZE => Some(MessageType::Initiation),
        RESPONSE_SIZE => Some(MessageType::Response),
        COOKIE_REPLY_SIZE => None,
        len if is_transport_size(len) => Some(MessageType::Transport),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let mut packet = vec![0u8; INITIATION_SIZE];
        packet[0] = MESSAGE_INITIATION;
        assert_eq!(classify(&packet), Some(MessageType::Initiation));

        packet[0] = MESSAGE_RESPONSE;
        assert_eq!(classify(&packet), None);

        let mut cookie = vec![0u8; COOKIE_REPLY_SIZE];
        cookie[0] = MESSAGE_COOKIE_REPLY;
        assert_eq!(classify(&cookie), Some(MessageType::CookieReply));
        cookie[0] = MESSAGE_TRANSPORT;
        assert_eq!(classify(&cookie), Some(MessageType::Transport));

        assert_eq!(classify(&[]), None);
        assert_eq!(classify(&[9, 0, 0, 0]), None);
    }

    #[test]
    fn test_classify_by_size() {
        assert_eq!(classify_by_size(148), Some(MessageType::Initiation));
        assert_eq!(classify_by_size(92), Some(MessageType::Response));
        assert_eq!(classify_by_size(64), None);
        assert_eq!(classify_by_size(32), Some(MessageType::Transport));
        assert_eq!(classify_by_size(1440), Some(MessageType::Transport));
        assert_eq!(classify_by_size(33), None);
        assert_eq!(classify_by_size(16), None);
    }
}
