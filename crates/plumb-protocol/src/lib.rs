//! Git smart HTTP protocol for Plumb.
//!
//! Provides pkt-line framing, the ref advertisement, the upload-pack
//! want/have exchange with side-band demultiplexing, and a [`Negotiator`]
//! that drives them over any [`Transport`]. [`fetch`] ties the negotiator to
//! a [`plumb_odb::Odb`].

pub mod capability;
mod error;
pub mod fetch;
pub mod negotiator;
pub mod pktline;
pub mod refs;
pub mod remote;
pub mod sideband;
pub mod transport;
pub mod upload_pack;

pub use capability::Capability;
pub use error::ProtocolError;
pub use fetch::{fetch, FetchOptions, FetchOutcome};
pub use negotiator::{Negotiator, State, UPLOAD_PACK};
pub use pktline::{PktLine, PktLineReader, PktLineWriter, MAX_PAYLOAD};
pub use refs::{parse_refs_ad_response, write_refs_ad_response, RefAdvertisement};
pub use remote::{Credentials, RemoteUrl};
pub use sideband::{ChannelSink, Demuxer, Step};
pub use transport::{HttpRequest, HttpResponse, Method, Transport};
pub use upload_pack::{
    parse_upload_pack_request, parse_upload_pack_response, write_upload_pack_request,
    write_upload_pack_response, Ack, AckStatus, NegotiationRequest, PackFraming,
    UploadPackResponse,
};

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
