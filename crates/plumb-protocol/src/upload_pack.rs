//! Upload-pack request and response (the `git-upload-pack` POST).
//!
//! Client side: [`write_upload_pack_request`] and [`parse_upload_pack_response`].
//! Server side: [`parse_upload_pack_request`] and [`write_upload_pack_response`].

use crate::pktline::{PktLine, PktLineReader, PktLineWriter, MAX_LINE_LEN};
use crate::sideband::{ChannelSink, Demuxer, Step, PACK_CHANNEL, PROGRESS_CHANNEL};
use crate::{ProtocolError, Result};
use plumb_odb::ObjectId;
use std::fmt;
use std::io::{Read, Write};
use tracing::{debug, trace};

/// Default number of `have` lines per flush-terminated batch.
pub const DEFAULT_HAVE_BATCH: usize = 32;

/// What the client asks the server for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRequest {
    /// Objects to fetch.
    pub wants: Vec<ObjectId>,
    /// Objects the client already has.
    pub haves: Vec<ObjectId>,
    /// Capabilities, sent on the first `want` line only.
    pub capabilities: Vec<String>,
    /// Commits the client has only shallowly.
    pub shallows: Vec<ObjectId>,
    /// `deepen <depth>`.
    pub depth: Option<u32>,
    /// `deepen-since <unix seconds>`.
    pub deepen_since: Option<i64>,
    /// `deepen-not <ref>` lines.
    pub deepen_not: Vec<String>,
    /// Whether the request ends with `done`.
    pub done: bool,
    /// `have` lines per flush when `done` is not set.
    pub have_batch_size: usize,
}

impl Default for NegotiationRequest {
    fn default() -> Self {
        Self {
            wants: Vec::new(),
            haves: Vec::new(),
            capabilities: Vec::new(),
            shallows: Vec::new(),
            depth: None,
            deepen_since: None,
            deepen_not: Vec::new(),
            done: true,
            have_batch_size: DEFAULT_HAVE_BATCH,
        }
    }
}

/// Writes an upload-pack request.
///
/// Without `done`, haves go out in batches of `have_batch_size`, each
/// followed by a flush. With `done`, all haves are written and then `done`.
pub fn write_upload_pack_request<W: Write>(writer: W, request: &NegotiationRequest) -> Result<()> {
    let mut writer = PktLineWriter::new(writer);

    let caps = request.capabilities.join(" ");
    for (i, want) in request.wants.iter().enumerate() {
        if i == 0 && !caps.is_empty() {
            writer.write_line(&format!("want {want} {caps}"))?;
        } else {
            writer.write_line(&format!("want {want}"))?;
        }
    }
    for shallow in &request.shallows {
        writer.write_line(&format!("shallow {shallow}"))?;
    }
    if let Some(depth) = request.depth {
        writer.write_line(&format!("deepen {depth}"))?;
    }
    if let Some(since) = request.deepen_since {
        writer.write_line(&format!("deepen-since {since}"))?;
    }
    for name in &request.deepen_not {
        writer.write_line(&format!("deepen-not {name}"))?;
    }
    writer.flush_pkt()?;

    if request.done {
        for have in &request.haves {
            writer.write_line(&format!("have {have}"))?;
        }
        writer.write_line("done")?;
    } else {
        for batch in request.haves.chunks(request.have_batch_size.max(1)) {
            for have in batch {
                writer.write_line(&format!("have {have}"))?;
            }
            writer.flush_pkt()?;
        }
    }

    trace!(
        wants = request.wants.len(),
        haves = request.haves.len(),
        done = request.done,
        "wrote upload-pack request"
    );
    writer.flush()
}

fn parse_oid(hex: &str, line: &str) -> Result<ObjectId> {
    ObjectId::from_hex(hex).map_err(|_| ProtocolError::parse("a 40 digit hex object id", line))
}

/// Parses an upload-pack request (server side).
pub fn parse_upload_pack_request<R: Read>(reader: R) -> Result<NegotiationRequest> {
    let mut reader = PktLineReader::new(reader);
    let mut request = NegotiationRequest {
        done: false,
        ..Default::default()
    };

    while let Some(pkt) = reader.read()? {
        let Some(text) = pkt.as_str() else {
            if pkt.is_flush() {
                continue;
            }
            return Err(ProtocolError::parse(
                "a UTF-8 request line",
                String::from_utf8_lossy(pkt.data().unwrap_or_default()),
            ));
        };
        let line = text.trim();
        let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));

        match keyword {
            "want" => {
                let (hex, caps) = rest.split_once(' ').unwrap_or((rest, ""));
                request.wants.push(parse_oid(hex, line)?);
                if request.wants.len() == 1 {
                    request.capabilities = caps
                        .split(' ')
                        .filter(|c| !c.is_empty())
                        .map(String::from)
                        .collect();
                }
            }
            "have" => request.haves.push(parse_oid(rest, line)?),
            "shallow" => request.shallows.push(parse_oid(rest, line)?),
            "deepen" => {
                request.depth = Some(
                    rest.parse()
                        .map_err(|_| ProtocolError::parse("deepen <depth>", line))?,
                )
            }
            "deepen-since" => {
                request.deepen_since = Some(
                    rest.parse()
                        .map_err(|_| ProtocolError::parse("deepen-since <timestamp>", line))?,
                )
            }
            "deepen-not" => request.deepen_not.push(rest.to_string()),
            "done" => {
                request.done = true;
                break;
            }
            _ => {
                return Err(ProtocolError::parse(
                    "want, have, shallow, deepen or done",
                    line,
                ))
            }
        }
    }

    Ok(request)
}

/// Status attached to an `ACK` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckStatus {
    /// `continue` (multi_ack)
    Continue,
    /// `common` (multi_ack_detailed)
    Common,
    /// `ready` (multi_ack_detailed)
    Ready,
}

impl AckStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "continue" => Some(Self::Continue),
            "common" => Some(Self::Common),
            "ready" => Some(Self::Ready),
            _ => None,
        }
    }

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Common => "common",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `ACK` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Acknowledged object.
    pub id: ObjectId,
    /// Status, or `None` for a bare `ACK <hash>`.
    pub status: Option<AckStatus>,
}

/// The negotiation part of an upload-pack response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPackResponse {
    /// The server found no common base.
    pub nak: bool,
    /// `ACK` lines in the order received.
    pub acks: Vec<Ack>,
    /// `shallow` lines.
    pub shallows: Vec<ObjectId>,
    /// `unshallow` lines.
    pub unshallows: Vec<ObjectId>,
}

/// Reads the control lines of an upload-pack response.
///
/// Stops after `NAK`, a bare `ACK <hash>` or the end of the stream, leaving
/// any pack data for [`Demuxer::drain`]. An unrecognised line also stops
/// negotiation and reads as `NAK`. Side-band data seen on the way goes to
/// `sink`.
pub fn parse_upload_pack_response<R: Read, S: ChannelSink + ?Sized>(
    demux: &mut Demuxer<R>,
    sink: &mut S,
) -> Result<UploadPackResponse> {
    let mut response = UploadPackResponse::default();

    loop {
        let line = match demux.step(sink)? {
            Step::End => break,
            Step::Dispatched => continue,
            Step::Control(line) => line,
        };
        let text = String::from_utf8_lossy(&line);
        let line = text.trim();
        let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));

        match keyword {
            "shallow" => response.shallows.push(parse_oid(rest, line)?),
            "unshallow" => response.unshallows.push(parse_oid(rest, line)?),
            "NAK" => {
                response.nak = true;
                break;
            }
            "ACK" => {
                let (hex, status) = rest.split_once(' ').unwrap_or((rest, ""));
                let id = parse_oid(hex, line)?;
                if status.is_empty() {
                    response.acks.push(Ack { id, status: None });
                    break;
                }
                let status = AckStatus::parse(status).ok_or_else(|| {
                    ProtocolError::parse("ACK <hash> [continue|common|ready]", line)
                })?;
                response.acks.push(Ack {
                    id,
                    status: Some(status),
                });
            }
            _ => {
                debug!(line, "unexpected line ends negotiation");
                response.nak = true;
                break;
            }
        }
    }

    debug!(
        nak = response.nak,
        acks = response.acks.len(),
        shallows = response.shallows.len(),
        "parsed upload-pack response"
    );
    Ok(response)
}

/// How the server sends pack data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackFraming {
    /// Raw bytes after the negotiation lines.
    Raw,
    /// Side-band channel 1 with lines of at most this many bytes, prefix included.
    SideBand(usize),
}

/// Writes an upload-pack response (server side).
pub fn write_upload_pack_response<W: Write>(
    writer: W,
    response: &UploadPackResponse,
    progress: Option<&str>,
    pack: &[u8],
    framing: PackFraming,
) -> Result<()> {
    let mut writer = PktLineWriter::new(writer);

    for id in &response.shallows {
        writer.write_line(&format!("shallow {id}"))?;
    }
    for id in &response.unshallows {
        writer.write_line(&format!("unshallow {id}"))?;
    }
    if !response.shallows.is_empty() || !response.unshallows.is_empty() {
        writer.flush_pkt()?;
    }
    for ack in &response.acks {
        match ack.status {
            Some(status) => writer.write_line(&format!("ACK {} {status}", ack.id))?,
            None => writer.write_line(&format!("ACK {}", ack.id))?,
        }
    }
    if response.nak {
        writer.write_line("NAK")?;
    }

    match framing {
        PackFraming::SideBand(limit) => {
            let max_payload = limit.min(MAX_LINE_LEN).saturating_sub(4);
            if let Some(message) = progress {
                writer.write_chunked(Some(PROGRESS_CHANNEL), message.as_bytes(), max_payload)?;
            }
            writer.write_chunked(Some(PACK_CHANNEL), pack, max_payload)?;
            writer.flush_pkt()?;
            writer.flush()
        }
        PackFraming::Raw => {
            let mut inner = writer.into_inner();
            inner.write_all(pack)?;
            inner.flush()?;
            Ok(())
        }
    }
}
