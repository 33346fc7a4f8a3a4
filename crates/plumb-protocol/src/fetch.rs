//! Fetch driver: discovery, negotiation and pack storage in one call.

use crate::capability::{self, Capability};
use crate::negotiator::Negotiator;
use crate::remote::RemoteUrl;
use crate::sideband::ChannelSink;
use crate::transport::Transport;
use crate::upload_pack::{NegotiationRequest, UploadPackResponse, DEFAULT_HAVE_BATCH};
use crate::{ProtocolError, Result};
use plumb_odb::{ObjectId, Odb, PackInfo, Storage};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Options for [`fetch`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    /// `User-Agent` header and `agent=` capability.
    pub agent: String,
    /// Ask for side-band-64k (or side-band) when offered.
    pub side_band: bool,
    /// Ask for ofs-delta entries when offered.
    pub ofs_delta: bool,
    /// Accept packs whose deltas reference objects we already have.
    pub thin_pack: bool,
    /// Ask the server not to send progress.
    pub no_progress: bool,
    /// Ask for tags pointing at fetched objects.
    pub include_tag: bool,
    /// Shallow fetch depth.
    pub depth: Option<u32>,
    /// Shallow fetch cut-off, unix seconds.
    pub deepen_since: Option<i64>,
    /// Refs whose history is excluded.
    pub deepen_not: Vec<String>,
    /// `have` lines per batch.
    pub have_batch_size: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            agent: format!("plumb/{}", env!("CARGO_PKG_VERSION")),
            side_band: true,
            ofs_delta: false,
            thin_pack: false,
            no_progress: false,
            include_tag: false,
            depth: None,
            deepen_since: None,
            deepen_not: Vec::new(),
            have_batch_size: DEFAULT_HAVE_BATCH,
        }
    }
}

impl FetchOptions {
    fn is_shallow(&self) -> bool {
        self.depth.is_some() || self.deepen_since.is_some() || !self.deepen_not.is_empty()
    }

    /// Capabilities the server must offer for these options to be honoured.
    fn required_capabilities(&self) -> Vec<Capability> {
        let mut required = Vec::new();
        if self.is_shallow() {
            required.push(Capability::Shallow);
        }
        if self.deepen_since.is_some() {
            required.push(Capability::DeepenSince);
        }
        if !self.deepen_not.is_empty() {
            required.push(Capability::DeepenNot);
        }
        required
    }

    /// Capabilities to ask for, before intersecting with the server's.
    fn wanted_capabilities(&self) -> Vec<Capability> {
        let mut wanted = Vec::new();
        if self.side_band {
            wanted.push(Capability::SideBand64k);
            wanted.push(Capability::SideBand);
        }
        if self.ofs_delta {
            wanted.push(Capability::OfsDelta);
        }
        if self.thin_pack {
            wanted.push(Capability::ThinPack);
        }
        if self.no_progress {
            wanted.push(Capability::NoProgress);
        }
        if self.include_tag {
            wanted.push(Capability::IncludeTag);
        }
        wanted.extend(self.required_capabilities());
        if !self.agent.is_empty() {
            wanted.push(Capability::Agent(self.agent.clone()));
        }
        wanted
    }
}

/// Result of a [`fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Advertised refs that passed the filter.
    pub refs: BTreeMap<String, ObjectId>,
    /// Advertised symbolic refs.
    pub symrefs: BTreeMap<String, String>,
    /// Objects requested from the server.
    pub wants: Vec<ObjectId>,
    /// Negotiation lines; `None` when nothing had to be fetched.
    pub response: Option<UploadPackResponse>,
    /// The stored pack; `None` when nothing was received.
    pub pack: Option<PackInfo>,
}

/// Buffers pack data and logs progress.
#[derive(Default)]
struct PackCollector {
    pack: Vec<u8>,
}

impl ChannelSink for PackCollector {
    fn pack_data(&mut self, data: &[u8]) -> Result<()> {
        self.pack.extend_from_slice(data);
        Ok(())
    }

    fn progress(&mut self, message: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(message);
        for line in text.split(['\r', '\n']).filter(|l| !l.is_empty()) {
            info!(target: "plumb::progress", "{line}");
        }
        Ok(())
    }
}

/// Fetches the refs accepted by `filter` from `url` into `odb`.
///
/// Refs whose objects are already present are not requested. Every
/// advertised object the odb already has is sent as a `have`. The received
/// pack is verified and stored with [`Odb::index_pack`], so thin packs
/// resolve against existing objects.
///
/// Shallow options the server cannot honour fail with
/// [`ProtocolError::UnsupportedCapability`] before anything is requested.
pub fn fetch<T, S, F>(
    transport: T,
    url: &str,
    odb: &Odb<S>,
    options: &FetchOptions,
    filter: F,
) -> Result<FetchOutcome>
where
    T: Transport,
    S: Storage,
    F: Fn(&str) -> bool,
{
    let remote = RemoteUrl::parse(url)?;
    let mut negotiator = Negotiator::new(transport, remote);
    if !options.agent.is_empty() {
        negotiator = negotiator.with_agent(options.agent.clone());
    }
    let ad = negotiator.discover()?.clone();

    let refs: BTreeMap<String, ObjectId> = ad
        .refs
        .iter()
        .filter(|(name, _)| filter(name))
        .map(|(name, id)| (name.clone(), *id))
        .collect();

    let mut seen = BTreeSet::new();
    let mut wants = Vec::new();
    for (name, id) in &refs {
        if name.ends_with("^{}") || id.is_zero() || !seen.insert(*id) {
            continue;
        }
        if !odb.has(id)? {
            wants.push(*id);
        }
    }

    let mut outcome = FetchOutcome {
        refs,
        symrefs: ad.symrefs.clone(),
        wants,
        response: None,
        pack: None,
    };
    if outcome.wants.is_empty() {
        debug!(remote = %negotiator.remote(), "nothing to fetch");
        return Ok(outcome);
    }

    let mut haves = Vec::new();
    let mut seen_haves = BTreeSet::new();
    for id in ad.refs.values() {
        if !id.is_zero() && seen_haves.insert(*id) && odb.has(id)? {
            haves.push(*id);
        }
    }

    let selected = capability::select(&ad.capabilities, &options.wanted_capabilities());
    if let Some(missing) = options
        .required_capabilities()
        .into_iter()
        .find(|cap| !selected.contains(cap))
    {
        return Err(ProtocolError::UnsupportedCapability(missing.to_string()));
    }
    let side_band = selected.iter().any(|c| c.side_band_limit().is_some());

    let request = NegotiationRequest {
        wants: outcome.wants.clone(),
        haves,
        capabilities: selected.iter().map(ToString::to_string).collect(),
        depth: options.depth,
        deepen_since: options.deepen_since,
        deepen_not: options.deepen_not.clone(),
        have_batch_size: options.have_batch_size,
        ..Default::default()
    };
    debug!(
        wants = request.wants.len(),
        haves = request.haves.len(),
        capabilities = ?request.capabilities,
        "sending upload-pack request"
    );

    let mut collector = PackCollector::default();
    let response = negotiator.negotiate(&request, side_band, &mut collector)?;
    outcome.response = Some(response);

    if collector.pack.is_empty() {
        debug!(remote = %negotiator.remote(), "server sent no pack");
        return Ok(outcome);
    }
    let info = odb.index_pack(&collector.pack)?;
    debug!(pack = %info.name, objects = info.ids.len(), "fetched pack");
    outcome.pack = Some(info);
    Ok(outcome)
}
