//! Ref advertisement: the `info/refs` response of the smart HTTP protocol.
//!
//! ```text
//! 001e# service=git-upload-pack\n
//! 0000
//! 00..<hash> HEAD\0<capabilities>\n
//! 003f<hash> refs/heads/master\n
//! 0000
//! ```

use crate::capability::Capability;
use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::{ProtocolError, Result};
use plumb_odb::ObjectId;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use tracing::debug;

/// Ref name used in place of a real ref when a repository has none.
const NO_REFS_PLACEHOLDER: &str = "capabilities^{}";

/// The refs, symbolic refs and capabilities a server advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefAdvertisement {
    /// Ref name to the object it points at. Peeled `^{}` entries are kept as sent.
    pub refs: BTreeMap<String, ObjectId>,
    /// Symbolic ref name to target, from `symref=` capabilities.
    pub symrefs: BTreeMap<String, String>,
    /// Every capability string, verbatim.
    pub capabilities: BTreeSet<String>,
}

impl RefAdvertisement {
    /// Returns true if the server advertised `capability`.
    pub fn has(&self, capability: &Capability) -> bool {
        self.capabilities.contains(&capability.to_string())
    }

    /// The server's `agent=` string, if any.
    pub fn agent(&self) -> Option<&str> {
        self.capabilities
            .iter()
            .find_map(|c| c.strip_prefix("agent="))
    }

    /// True when the server sent no refs.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Returns the `# service=<service>\n` header line.
fn service_header(service: &str) -> String {
    format!("# service={service}\n")
}

/// Reads the next line, skipping flush packets; `None` at end of stream.
fn next_data<R: Read>(reader: &mut PktLineReader<R>) -> Result<Option<Vec<u8>>> {
    loop {
        match reader.read()? {
            Some(PktLine::Flush) => continue,
            Some(PktLine::Data(data)) => return Ok(Some(data)),
            None => return Ok(None),
        }
    }
}

/// Splits a trimmed line into exactly two parts around `sep`.
fn split_pair<'a>(line: &'a str, sep: char, shown: &str) -> Result<(&'a str, &'a str)> {
    let mut parts = line.trim().split(sep);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(first), Some(second), None) => Ok((first, second)),
        _ => Err(ProtocolError::parse(
            format!("Two strings separated by '{shown}'"),
            line,
        )),
    }
}

fn parse_oid(hex: &str) -> Result<ObjectId> {
    ObjectId::from_hex(hex).map_err(|_| ProtocolError::parse("a 40 digit hex object id", hex))
}

/// Parses a smart HTTP ref advertisement for `service`.
///
/// Leading flushes are skipped. A response that ends after the service
/// header is an empty repository.
pub fn parse_refs_ad_response<R: Read>(reader: R, service: &str) -> Result<RefAdvertisement> {
    let mut reader = PktLineReader::new(reader);
    let mut ad = RefAdvertisement::default();

    let header = next_data(&mut reader)?.ok_or(ProtocolError::EmptyServerResponse)?;
    let expected = service_header(service);
    if header != expected.as_bytes() {
        return Err(ProtocolError::parse(
            expected,
            String::from_utf8_lossy(&header),
        ));
    }

    let Some(first) = next_data(&mut reader)? else {
        debug!(service, "empty repository advertised");
        return Ok(ad);
    };
    let first = String::from_utf8_lossy(&first);
    let (first_ref, capabilities) = split_pair(&first, '\0', "\\x00")?;
    ad.capabilities = capabilities
        .split(' ')
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect();

    let (hash, name) = split_pair(first_ref, ' ', " ")?;
    if name != NO_REFS_PLACEHOLDER {
        ad.refs.insert(name.to_string(), parse_oid(hash)?);
        while let Some(line) = next_data(&mut reader)? {
            let line = String::from_utf8_lossy(&line);
            let (hash, name) = split_pair(&line, ' ', " ")?;
            ad.refs.insert(name.to_string(), parse_oid(hash)?);
        }
    }

    for cap in &ad.capabilities {
        if let Ok(Capability::Symref { name, target }) = cap.parse::<Capability>() {
            ad.symrefs.insert(name, target);
        }
    }

    debug!(
        service,
        refs = ad.refs.len(),
        capabilities = ad.capabilities.len(),
        "parsed ref advertisement"
    );
    Ok(ad)
}

/// Writes a smart HTTP ref advertisement for `service`.
///
/// `HEAD` is listed first, then the other refs in name order. Capabilities
/// form a set and go out in sorted order. Symrefs not already among them are
/// appended as `symref=` capabilities.
pub fn write_refs_ad_response<W: Write>(writer: W, service: &str, ad: &RefAdvertisement) -> Result<()> {
    let mut writer = PktLineWriter::new(writer);
    writer.write_line(&service_header(service))?;
    writer.flush_pkt()?;

    let mut caps: Vec<String> = ad.capabilities.iter().cloned().collect();
    for (name, target) in &ad.symrefs {
        let symref = Capability::Symref {
            name: name.clone(),
            target: target.clone(),
        }
        .to_string();
        if !ad.capabilities.contains(&symref) {
            caps.push(symref);
        }
    }
    let caps = caps.join(" ");

    let ordered = ad
        .refs
        .get_key_value("HEAD")
        .into_iter()
        .chain(ad.refs.iter().filter(|(name, _)| name.as_str() != "HEAD"));

    let mut first = true;
    for (name, id) in ordered {
        if first {
            writer.write_data(format!("{id} {name}\0{caps}\n").as_bytes())?;
            first = false;
        } else {
            writer.write_line(&format!("{id} {name}"))?;
        }
    }
    if first && !caps.is_empty() {
        writer.write_data(format!("{} {NO_REFS_PLACEHOLDER}\0{caps}\n", ObjectId::zero()).as_bytes())?;
    }

    writer.flush_pkt()?;
    writer.flush()
}
