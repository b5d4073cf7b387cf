//! TLS record and ClientHello wire parsing
//!
//! Every length field is bounds-checked; malformed input yields a
//! [`ParseError`] instead of a panic.

use std::ops::Range;
use thiserror::Error;

/// TLS record header length
pub const RECORD_HEADER_LEN: usize = 5;

/// Handshake message header length (type + u24 length)
pub const HANDSHAKE_HEADER_LEN: usize = 4;

/// Record content type for handshake messages
pub const CONTENT_TYPE_HANDSHAKE: u8 = 22;

/// Handshake message type of a ClientHello
pub const HANDSHAKE_CLIENT_HELLO: u8 = 1;

/// server_name extension id
pub const EXTENSION_SERVER_NAME: u16 = 0x0000;

/// padding extension id (RFC 7685)
pub const EXTENSION_PADDING: u16 = 0x0015;

const SNI_HOST_NAME: u8 = 0;
const RANDOM_LEN: usize = 32;

/// Why a ClientHello could not be walked
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A field ran past the end of the buffer
    #[error("truncated {field}: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        /// Field being read
        field: &'static str,
        /// Offset of the field
        offset: usize,
        /// Bytes needed
        needed: usize,
        /// Bytes left
        available: usize,
    },
    /// Handshake type byte is not ClientHello
    #[error("handshake type {0} is not ClientHello")]
    NotClientHello(u8),
    /// No host_name entry in the extension list
    #[error("no server_name extension")]
    NoServerName,
    /// server_name present with an empty host
    #[error("empty server name")]
    EmptyServerName,
}

/// A TLS record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Content type
    pub content_type: u8,
    /// Legacy record version
    pub version: [u8; 2],
    /// Payload length
    pub length: u16,
}

impl RecordHeader {
    /// Read a header from the start of `buf`
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let header = buf.get(..RECORD_HEADER_LEN)?;
        Some(Self {
            content_type: header[0],
            version: [header[1], header[2]],
            length: u16::from_be_bytes([header[3], header[4]]),
        })
    }

    /// Same type and version, different payload length
    pub fn with_length(self, length: u16) -> Self {
        Self { length, ..self }
    }

    /// Wire form
    pub fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let [hi, lo] = self.length.to_be_bytes();
        [self.content_type, self.version[0], self.version[1], hi, lo]
    }
}

/// Outcome of inspecting the first bytes of a write
#[derive(Debug, PartialEq, Eq)]
pub enum Inspection<'a> {
    /// Not a handshake record carrying a ClientHello
    NotClientHello,
    /// Looks like a ClientHello record but the buffer ends mid-record
    Partial,
    /// A complete ClientHello record
    ClientHello {
        /// Original record header
        header: RecordHeader,
        /// Record payload (the handshake message)
        body: &'a [u8],
        /// Bytes following the record in the same buffer
        rest: &'a [u8],
    },
}

/// Classify a write buffer
pub fn inspect(buf: &[u8]) -> Inspection<'_> {
    if buf.len() < RECORD_HEADER_LEN + HANDSHAKE_HEADER_LEN {
        return Inspection::NotClientHello;
    }
    let Some(header) = RecordHeader::parse(buf) else {
        return Inspection::NotClientHello;
    };
    if header.content_type != CONTENT_TYPE_HANDSHAKE
        || usize::from(header.length) < HANDSHAKE_HEADER_LEN
        || buf[RECORD_HEADER_LEN] != HANDSHAKE_CLIENT_HELLO
    {
        return Inspection::NotClientHello;
    }

    let end = RECORD_HEADER_LEN + usize::from(header.length);
    if buf.len() < end {
        return Inspection::Partial;
    }
    Inspection::ClientHello {
        header,
        body: &buf[RECORD_HEADER_LEN..end],
        rest: &buf[end..],
    }
}

/// Locate the SNI host name inside a ClientHello handshake message
///
/// Returns the host-name byte span relative to `body`.
pub fn locate_server_name(body: &[u8]) -> Result<Range<usize>, ParseError> {
    let mut r = Reader::new(body);

    let msg_type = r.u8("handshake type")?;
    if msg_type != HANDSHAKE_CLIENT_HELLO {
        return Err(ParseError::NotClientHello(msg_type));
    }
    let msg_len = r.u24("handshake length")?;
    let mut r = r.sub(msg_len, "handshake body")?;

    r.skip(2, "client version")?;
    r.skip(RANDOM_LEN, "random")?;
    let session_id_len = usize::from(r.u8("session id length")?);
    r.skip(session_id_len, "session id")?;
    let suites_len = usize::from(r.u16("cipher suites length")?);
    r.skip(suites_len, "cipher suites")?;
    let compression_len = usize::from(r.u8("compression methods length")?);
    r.skip(compression_len, "compression methods")?;

    if r.remaining() == 0 {
        return Err(ParseError::NoServerName);
    }
    let extensions_len = usize::from(r.u16("extensions length")?);
    let mut ext = r.sub(extensions_len, "extensions")?;

    while ext.remaining() > 0 {
        let ext_type = ext.u16("extension type")?;
        let ext_len = usize::from(ext.u16("extension length")?);
        if ext_type != EXTENSION_SERVER_NAME {
            ext.skip(ext_len, "extension data")?;
            continue;
        }

        let mut sni = ext.sub(ext_len, "server_name extension")?;
        let list_len = usize::from(sni.u16("server name list length")?);
        let mut list = sni.sub(list_len, "server name list")?;
        while list.remaining() > 0 {
            let name_type = list.u8("server name type")?;
            let name_len = usize::from(list.u16("server name length")?);
            if name_type != SNI_HOST_NAME {
                list.skip(name_len, "server name")?;
                continue;
            }
            let start = list.absolute();
            list.skip(name_len, "host name")?;
            if name_len == 0 {
                return Err(ParseError::EmptyServerName);
            }
            return Ok(start..start + name_len);
        }
        return Err(ParseError::NoServerName);
    }

    Err(ParseError::NoServerName)
}

/// Cursor over a window of the original buffer that keeps absolute offsets
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            end: buf.len(),
        }
    }

    fn remaining(&self) -> usize {
        self.end - self.pos
    }

    fn absolute(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], ParseError> {
        if n > self.remaining() {
            return Err(ParseError::Truncated {
                field,
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn skip(&mut self, n: usize, field: &'static str) -> Result<(), ParseError> {
        self.take(n, field).map(|_| ())
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, ParseError> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, ParseError> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self, field: &'static str) -> Result<usize, ParseError> {
        let b = self.take(3, field)?;
        Ok(usize::from(b[0]) << 16 | usize::from(b[1]) << 8 | usize::from(b[2]))
    }

    /// Split off the next `n` bytes as a nested reader
    fn sub(&mut self, n: usize, field: &'static str) -> Result<Reader<'a>, ParseError> {
        let start = self.pos;
        self.skip(n, field)?;
        Ok(Reader {
            buf: self.buf,
            pos: start,
            end: start + n,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal ClientHello handshake message with an optional SNI
    fn client_hello_body(sni: Option<&str>) -> Vec<u8> {
        let mut hello = vec![0x03, 0x03];
        hello.extend_from_slice(&[0xAA; RANDOM_LEN]);
        hello.push(0); // session id
        hello.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
        hello.extend_from_slice(&[0x01, 0x00]);

        let mut extensions = Vec::new();
        // supported_versions first so the walker has to skip something
        extensions.extend_from_slice(&[0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x04]);
        if let Some(name) = sni {
            let n = name.len() as u16;
            extensions.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
            extensions.extend_from_slice(&(n + 5).to_be_bytes());
            extensions.extend_from_slice(&(n + 3).to_be_bytes());
            extensions.push(SNI_HOST_NAME);
            extensions.extend_from_slice(&n.to_be_bytes());
            extensions.extend_from_slice(name.as_bytes());
        }
        hello.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        hello.extend_from_slice(&extensions);

        let mut body = vec![HANDSHAKE_CLIENT_HELLO];
        body.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        body.extend_from_slice(&hello);
        body
    }

    fn record(body: &[u8]) -> Vec<u8> {
        let mut out = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_header_roundtrip() {
        let header = RecordHeader::parse(&[22, 3, 1, 0x01, 0x02]).unwrap();
        assert_eq!(header.length, 0x0102);
        assert_eq!(header.with_length(7).encode(), [22, 3, 1, 0, 7]);
        assert!(RecordHeader::parse(&[22, 3]).is_none());
    }

    #[test]
    fn test_locate_server_name() {
        let body = client_hello_body(Some("example.com"));
        let span = locate_server_name(&body).unwrap();
        assert_eq!(&body[span], b"example.com");
    }

    #[test]
    fn test_locate_without_sni() {
        let body = client_hello_body(None);
        assert_eq!(locate_server_name(&body), Err(ParseError::NoServerName));
    }

    #[test]
    fn test_truncated_never_panics() {
        let body = client_hello_body(Some("example.com"));
        for cut in 0..body.len() {
            assert!(locate_server_name(&body[..cut]).is_err());
        }
    }

    #[test]
    fn test_inspect() {
        let body = client_hello_body(Some("a.b"));
        let mut buf = record(&body);
        match inspect(&buf) {
            Inspection::ClientHello { header, body: b, rest } => {
                assert_eq!(header.content_type, CONTENT_TYPE_HANDSHAKE);
                assert_eq!(b, &body[..]);
                assert!(rest.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(inspect(&buf[..buf.len() - 1]), Inspection::Partial);

        buf[0] = 23;
        assert_eq!(inspect(&buf), Inspection::NotClientHello);
        assert_eq!(inspect(b"GET / HTTP/1.1\r\n"), Inspection::NotClientHello);
        assert_eq!(inspect(&[22, 3, 1]), Inspection::NotClientHello);
    }
}
