//! Side-band demultiplexing of an upload-pack response.
//!
//! With side-band, the first byte of each line picks a channel: 1 is pack
//! data, 2 is progress text, 3 is a fatal error. Lines starting with anything
//! else are protocol control lines (`NAK`, `ACK ...`, `shallow ...`).
//!
//! The [`Demuxer`] is pull-based: every [`Demuxer::step`] consumes one line,
//! hands channel data to a [`ChannelSink`] and returns. Stopping early is just
//! not calling `step` again.

use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::{ProtocolError, Result};
use std::io::{Read, Write};
use tracing::trace;

/// Pack data channel.
pub const PACK_CHANNEL: u8 = 1;
/// Progress text channel.
pub const PROGRESS_CHANNEL: u8 = 2;
/// Fatal error channel.
pub const ERROR_CHANNEL: u8 = 3;

/// Receives demultiplexed channel data.
pub trait ChannelSink {
    /// Called with each chunk of pack data, in order.
    fn pack_data(&mut self, data: &[u8]) -> Result<()>;

    /// Called with each chunk of progress text.
    fn progress(&mut self, _message: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Collects pack data in memory and drops progress.
impl ChannelSink for Vec<u8> {
    fn pack_data(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

impl<S: ChannelSink + ?Sized> ChannelSink for &mut S {
    fn pack_data(&mut self, data: &[u8]) -> Result<()> {
        (**self).pack_data(data)
    }

    fn progress(&mut self, message: &[u8]) -> Result<()> {
        (**self).progress(message)
    }
}

/// Outcome of one [`Demuxer::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A control line for the caller to interpret.
    Control(Vec<u8>),
    /// A line was handed to the sink.
    Dispatched,
    /// The stream is finished.
    End,
}

/// Pull-based decoder over an upload-pack response body.
pub struct Demuxer<R> {
    reader: PktLineReader<R>,
    side_band: bool,
    ended: bool,
}

impl<R: Read> Demuxer<R> {
    /// Creates a demuxer; `side_band` says whether a side-band capability was negotiated.
    pub fn new(reader: R, side_band: bool) -> Self {
        Self {
            reader: PktLineReader::new(reader),
            side_band,
            ended: false,
        }
    }

    /// Returns true once the stream has ended or failed.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Consumes one line; flush packets are skipped.
    pub fn step<S: ChannelSink + ?Sized>(&mut self, sink: &mut S) -> Result<Step> {
        if self.ended {
            return Ok(Step::End);
        }
        loop {
            let line = match self.reader.read() {
                Ok(Some(PktLine::Flush)) => continue,
                Ok(Some(PktLine::Data(line))) => line,
                Ok(None) => {
                    self.ended = true;
                    return Ok(Step::End);
                }
                Err(e) => {
                    self.ended = true;
                    return Err(e);
                }
            };

            if !self.side_band {
                return Ok(Step::Control(line));
            }
            return match line.first() {
                Some(&PACK_CHANNEL) => {
                    trace!(len = line.len() - 1, "side-band pack data");
                    self.dispatch(|| sink.pack_data(&line[1..]))
                }
                Some(&PROGRESS_CHANNEL) => self.dispatch(|| sink.progress(&line[1..])),
                Some(&ERROR_CHANNEL) => {
                    self.ended = true;
                    let error =
                        ProtocolError::Remote(String::from_utf8_lossy(&line[1..]).into_owned());
                    if let Err(e) = sink.progress(&line[1..]) {
                        trace!(error = %e, "sink refused remote error text");
                    }
                    Err(error)
                }
                _ => Ok(Step::Control(line)),
            };
        }
    }

    fn dispatch(&mut self, deliver: impl FnOnce() -> Result<()>) -> Result<Step> {
        match deliver() {
            Ok(()) => Ok(Step::Dispatched),
            Err(e) => {
                self.ended = true;
                Err(e)
            }
        }
    }

    /// Forwards everything left in the stream to `sink`.
    ///
    /// Without side-band the remaining body is pack data: raw bytes when it
    /// starts with `PACK`, otherwise pkt-lines whose payloads are pack data.
    pub fn drain<S: ChannelSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        let result = if self.side_band {
            self.drain_side_band(sink)
        } else {
            self.drain_plain(sink)
        };
        self.ended = true;
        result
    }

    fn drain_side_band<S: ChannelSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        loop {
            match self.step(sink)? {
                Step::End => return Ok(()),
                Step::Dispatched => {}
                Step::Control(line) => {
                    trace!(line = %String::from_utf8_lossy(&line), "ignoring control line after negotiation");
                }
            }
        }
    }

    fn drain_plain<S: ChannelSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        let Some(prefix) = self.reader.read_prefix()? else {
            return Ok(());
        };

        if &prefix == b"PACK" {
            sink.pack_data(&prefix)?;
            let body = self.reader.inner_mut();
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = match body.read(&mut buf) {
                    Ok(0) => return Ok(()),
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                };
                sink.pack_data(&buf[..n])?;
            }
        }

        let mut next = Some(self.reader.read_with_prefix(prefix)?);
        while let Some(line) = next {
            if let PktLine::Data(data) = line {
                sink.pack_data(&data)?;
            }
            next = self.reader.read()?;
        }
        Ok(())
    }
}

/// Writes a fatal error on the error channel.
pub fn write_error<W: Write>(writer: W, message: &str) -> Result<()> {
    let mut writer = PktLineWriter::new(writer);
    let mut line = vec![ERROR_CHANNEL];
    line.extend_from_slice(message.as_bytes());
    writer.write_data(&line)?;
    writer.flush()
}
