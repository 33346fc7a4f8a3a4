//! Git pkt-line format implementation.
//!
//! Every line is prefixed with its total length as 4 hex digits, the prefix
//! included. `0000` is the flush packet. Payloads are 8-bit clean.

use crate::{ProtocolError, Result};
use std::io::{ErrorKind, Read, Write};
use tracing::trace;

/// Largest payload a single pkt-line can carry.
pub const MAX_PAYLOAD: usize = 65516;

/// Largest pkt-line on the wire, length prefix included.
pub const MAX_LINE_LEN: usize = MAX_PAYLOAD + 4;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Creates a data packet from bytes.
    pub fn from_bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Data(b.into())
    }

    /// Encodes the packet, rejecting payloads over [`MAX_PAYLOAD`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Data(data) => {
                if data.len() > MAX_PAYLOAD {
                    return Err(ProtocolError::LineTooLong(data.len()));
                }
                let mut result = format!("{:04x}", data.len() + 4).into_bytes();
                result.extend_from_slice(data);
                Ok(result)
            }
            Self::Flush => Ok(b"0000".to_vec()),
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the data content, or None for a flush.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            Self::Flush => None,
        }
    }

    /// Returns the data as a string, trimming one trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.strip_suffix('\n').unwrap_or(s))
    }
}

/// Parses a 4 hex digit length prefix.
fn parse_len(prefix: &[u8; 4]) -> Result<usize> {
    let invalid = || {
        ProtocolError::InvalidPktLine(format!(
            "invalid length prefix {:?}",
            String::from_utf8_lossy(prefix)
        ))
    };
    let text = std::str::from_utf8(prefix).map_err(|_| invalid())?;
    if !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    usize::from_str_radix(text, 16).map_err(|_| invalid())
}

/// Streaming reader for pkt-lines.
///
/// Bytes are consumed strictly in order; a line is returned only once its
/// full payload has arrived.
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: Read> PktLineReader<R> {
    /// Creates a new pkt-line reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next packet, or `None` at a clean end of stream.
    pub fn read(&mut self) -> Result<Option<PktLine>> {
        match self.read_prefix()? {
            Some(prefix) => self.read_with_prefix(prefix).map(Some),
            None => Ok(None),
        }
    }

    /// Reads the 4 prefix bytes of the next line, or `None` at end of stream.
    pub fn read_prefix(&mut self) -> Result<Option<[u8; 4]>> {
        let mut prefix = [0u8; 4];
        let mut filled = 0;
        while filled < prefix.len() {
            match self.reader.read(&mut prefix[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(ProtocolError::InvalidPktLine(
                        "stream ended inside a length prefix".to_string(),
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(prefix))
    }

    /// Finishes reading a line whose prefix was already consumed.
    pub fn read_with_prefix(&mut self, prefix: [u8; 4]) -> Result<PktLine> {
        let len = parse_len(&prefix)?;
        if len == 0 {
            trace!("pkt-line flush");
            return Ok(PktLine::Flush);
        }
        if len < 4 {
            return Err(ProtocolError::InvalidPktLine(format!(
                "length {len} is below the prefix size"
            )));
        }

        let mut data = vec![0u8; len - 4];
        self.reader.read_exact(&mut data).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => ProtocolError::InvalidPktLine(format!(
                "stream ended inside a {len} byte line"
            )),
            _ => e.into(),
        })?;
        trace!(len = data.len(), "pkt-line data");
        Ok(PktLine::Data(data))
    }

    /// Reads all packets until a flush packet or end of stream.
    pub fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut packets = Vec::new();
        loop {
            match self.read()? {
                Some(PktLine::Flush) | None => break,
                Some(pkt) => packets.push(pkt),
            }
        }
        Ok(packets)
    }

    /// Returns a mutable reference to the inner reader.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consumes the reader and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writer for pkt-line format.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    /// Creates a new pkt-line writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a packet.
    pub fn write(&mut self, pkt: &PktLine) -> Result<()> {
        self.writer.write_all(&pkt.encode()?)?;
        Ok(())
    }

    /// Writes a data line.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.write(&PktLine::Data(data.to_vec()))
    }

    /// Writes a string line, appending a newline if missing.
    pub fn write_line(&mut self, s: &str) -> Result<()> {
        let mut data = s.as_bytes().to_vec();
        if !s.ends_with('\n') {
            data.push(b'\n');
        }
        self.write(&PktLine::Data(data))
    }

    /// Writes `data` as consecutive lines of at most `max_payload` bytes,
    /// each starting with `band` when one is given.
    ///
    /// Empty input writes nothing.
    pub fn write_chunked(&mut self, band: Option<u8>, data: &[u8], max_payload: usize) -> Result<()> {
        let room = max_payload
            .min(MAX_PAYLOAD)
            .saturating_sub(usize::from(band.is_some()));
        if room == 0 {
            return Err(ProtocolError::LineTooLong(max_payload));
        }
        for chunk in data.chunks(room) {
            let mut line = Vec::with_capacity(chunk.len() + 1);
            line.extend(band);
            line.extend_from_slice(chunk);
            self.write(&PktLine::Data(line))?;
        }
        Ok(())
    }

    /// Writes a flush packet.
    pub fn flush_pkt(&mut self) -> Result<()> {
        self.write(&PktLine::Flush)
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(payload: Vec<u8>) -> PktLine {
        let encoded = PktLine::Data(payload).encode().unwrap();
        let mut reader = PktLineReader::new(Cursor::new(encoded));
        let line = reader.read().unwrap().unwrap();
        assert!(reader.read().unwrap().is_none());
        line
    }

    #[test]
    fn test_pktline_encode() {
        assert_eq!(PktLine::from_string("hello\n").encode().unwrap(), b"000ahello\n");
        assert_eq!(PktLine::Flush.encode().unwrap(), b"0000");
    }

    #[test]
    fn test_boundary_sizes_roundtrip() {
        for size in [0usize, 1, MAX_PAYLOAD] {
            let payload = vec![b'x'; size];
            assert_eq!(roundtrip(payload.clone()), PktLine::Data(payload));
        }
    }

    #[test]
    fn test_empty_payload_is_not_flush() {
        let encoded = PktLine::Data(Vec::new()).encode().unwrap();
        assert_eq!(encoded, b"0004");
        assert_ne!(roundtrip(Vec::new()), PktLine::Flush);
    }

    #[test]
    fn test_max_line_header() {
        let encoded = PktLine::Data(vec![0; MAX_PAYLOAD]).encode().unwrap();
        assert_eq!(&encoded[..4], b"fff0");
        assert_eq!(encoded.len(), MAX_LINE_LEN);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let err = PktLine::Data(vec![0; MAX_PAYLOAD + 1]).encode().unwrap_err();
        assert!(matches!(err, ProtocolError::LineTooLong(65517)));

        let mut buf = Vec::new();
        let mut writer = PktLineWriter::new(&mut buf);
        assert!(writer.write_data(&vec![0; MAX_PAYLOAD + 1]).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_binary_payload_is_untouched() {
        let payload = vec![0u8, b'\n', 0xff, b'\r', b'\n'];
        assert_eq!(roundtrip(payload.clone()), PktLine::Data(payload));
    }

    #[test]
    fn test_pktline_as_str() {
        assert_eq!(PktLine::from_string("hello\n").as_str(), Some("hello"));
        assert_eq!(PktLine::from_string("no newline").as_str(), Some("no newline"));
        assert_eq!(PktLine::from_string("two\n\n").as_str(), Some("two\n"));
        assert!(PktLine::from_bytes(vec![0xff, 0xfe]).as_str().is_none());
        assert!(PktLine::Flush.as_str().is_none());
    }

    #[test]
    fn test_read_until_flush() {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            writer.write_line("line1").unwrap();
            writer.write_line("line2\n").unwrap();
            writer.flush_pkt().unwrap();
            writer.write_line("line3").unwrap();
            writer.flush().unwrap();
        }

        let mut reader = PktLineReader::new(Cursor::new(buf));
        let packets = reader.read_until_flush().unwrap();
        assert_eq!(
            packets,
            vec![PktLine::from_string("line1\n"), PktLine::from_string("line2\n")]
        );
        assert_eq!(reader.read().unwrap(), Some(PktLine::from_string("line3\n")));
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn test_invalid_lengths() {
        for bad in [&b"0003"[..], b"0001", b"zzzz", b"00g1", b"+fff"] {
            let mut reader = PktLineReader::new(Cursor::new(bad.to_vec()));
            assert!(reader.read().is_err(), "{:?}", String::from_utf8_lossy(bad));
        }
    }

    #[test]
    fn test_truncated_input() {
        let mut reader = PktLineReader::new(Cursor::new(b"00".to_vec()));
        assert!(matches!(
            reader.read().unwrap_err(),
            ProtocolError::InvalidPktLine(_)
        ));

        let mut reader = PktLineReader::new(Cursor::new(b"000ahel".to_vec()));
        assert!(matches!(
            reader.read().unwrap_err(),
            ProtocolError::InvalidPktLine(_)
        ));
    }

    #[test]
    fn test_uppercase_hex_length() {
        let mut data = b"000A".to_vec();
        data.extend_from_slice(b"hello\n");
        let mut reader = PktLineReader::new(Cursor::new(data));
        assert_eq!(reader.read().unwrap(), Some(PktLine::from_string("hello\n")));
    }

    #[test]
    fn test_write_chunked_with_band() {
        let data: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
        let mut buf = Vec::new();
        PktLineWriter::new(&mut buf)
            .write_chunked(Some(1), &data, 1000)
            .unwrap();

        let mut reader = PktLineReader::new(Cursor::new(buf));
        let mut rebuilt = Vec::new();
        let mut lines = 0;
        while let Some(PktLine::Data(line)) = reader.read().unwrap() {
            assert_eq!(line[0], 1);
            assert!(line.len() <= 1000);
            rebuilt.extend_from_slice(&line[1..]);
            lines += 1;
        }
        assert_eq!(lines, 3);
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_write_chunked_without_band() {
        let mut buf = Vec::new();
        PktLineWriter::new(&mut buf)
            .write_chunked(None, &vec![7u8; MAX_PAYLOAD + 10], usize::MAX)
            .unwrap();
        let mut reader = PktLineReader::new(Cursor::new(buf));
        assert_eq!(reader.read().unwrap().unwrap().data().unwrap().len(), MAX_PAYLOAD);
        assert_eq!(reader.read().unwrap().unwrap().data().unwrap().len(), 10);
    }

    #[test]
    fn test_reader_inner_access() {
        let mut reader = PktLineReader::new(Cursor::new(b"0000rest".to_vec()));
        assert_eq!(reader.read().unwrap(), Some(PktLine::Flush));
        assert_eq!(reader.inner_mut().position(), 4);
        assert_eq!(reader.into_inner().position(), 4);
    }
}
