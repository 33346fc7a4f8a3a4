//! Smart HTTP negotiator for `git-upload-pack`.
//!
//! ```text
//! Idle --discover--> Advertised --negotiate--> Negotiating --> Streaming --> Closed
//! ```
//!
//! Any failure moves the negotiator to `Closed`.

use crate::refs::{parse_refs_ad_response, RefAdvertisement};
use crate::remote::RemoteUrl;
use crate::sideband::{ChannelSink, Demuxer};
use crate::transport::{HttpRequest, HttpResponse, Method, Transport};
use crate::upload_pack::{parse_upload_pack_response, write_upload_pack_request, NegotiationRequest, UploadPackResponse};
use crate::{ProtocolError, Result};
use std::fmt;
use tracing::debug;

/// The fetch service.
pub const UPLOAD_PACK: &str = "git-upload-pack";

/// Negotiator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing sent yet.
    Idle,
    /// Refs received.
    Advertised,
    /// Request sent, reading ACK/NAK lines.
    Negotiating,
    /// Receiving pack data.
    Streaming,
    /// Finished or failed.
    Closed,
}

impl State {
    /// State name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Advertised => "advertised",
            Self::Negotiating => "negotiating",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives one fetch exchange against one remote.
pub struct Negotiator<T> {
    transport: T,
    remote: RemoteUrl,
    agent: String,
    state: State,
    advertisement: Option<RefAdvertisement>,
}

impl<T: Transport> Negotiator<T> {
    /// Creates a negotiator in the `Idle` state.
    pub fn new(transport: T, remote: RemoteUrl) -> Self {
        Self {
            transport,
            remote,
            agent: format!("plumb/{}", env!("CARGO_PKG_VERSION")),
            state: State::Idle,
            advertisement: None,
        }
    }

    /// Sets the `User-Agent` sent with every request.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The remote being fetched from.
    pub fn remote(&self) -> &RemoteUrl {
        &self.remote
    }

    /// The advertisement received by [`Negotiator::discover`].
    pub fn advertisement(&self) -> Option<&RefAdvertisement> {
        self.advertisement.as_ref()
    }

    fn ensure_state(&self, expected: State) -> Result<()> {
        if self.state != expected {
            return Err(ProtocolError::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: State) {
        debug!(from = %self.state, to = %next, remote = %self.remote, "negotiator state");
        self.state = next;
    }

    fn headers(&self, extra: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut headers = vec![("User-Agent".to_string(), self.agent.clone())];
        if let Some(auth) = self.remote.authorization() {
            headers.push(("Authorization".to_string(), auth));
        }
        headers.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        headers
    }

    /// Checks status and content type of a smart HTTP response.
    fn check_response(url: &str, response: &HttpResponse, content_type: &str) -> Result<()> {
        if !response.is_success() {
            return Err(ProtocolError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        let actual = response.header("content-type").unwrap_or_default();
        let essence = actual.split(';').next().unwrap_or_default().trim();
        if !essence.eq_ignore_ascii_case(content_type) {
            return Err(ProtocolError::NotSmartHttp {
                content_type: actual.to_string(),
            });
        }
        Ok(())
    }

    /// `Idle -> Advertised`: fetches and parses `info/refs`.
    pub fn discover(&mut self) -> Result<&RefAdvertisement> {
        self.ensure_state(State::Idle)?;
        match self.fetch_advertisement() {
            Ok(ad) => {
                self.advertisement = Some(ad);
                self.transition(State::Advertised);
                self.advertisement
                    .as_ref()
                    .ok_or(ProtocolError::EmptyServerResponse)
            }
            Err(e) => {
                self.transition(State::Closed);
                Err(e)
            }
        }
    }

    fn fetch_advertisement(&self) -> Result<RefAdvertisement> {
        let url = self.remote.info_refs_url(UPLOAD_PACK);
        let response = self.transport.request(HttpRequest {
            url: url.clone(),
            method: Method::Get,
            headers: self.headers(&[]),
            body: Vec::new(),
        })?;
        Self::check_response(
            &url,
            &response,
            &format!("application/x-{UPLOAD_PACK}-advertisement"),
        )?;
        parse_refs_ad_response(response.body, UPLOAD_PACK)
    }

    /// `Advertised -> Negotiating -> Streaming -> Closed`: posts the request,
    /// reads the ACK/NAK lines, then streams pack data into `sink`.
    ///
    /// A sink error aborts the stream; nothing more is read.
    pub fn negotiate<S: ChannelSink + ?Sized>(
        &mut self,
        request: &NegotiationRequest,
        side_band: bool,
        sink: &mut S,
    ) -> Result<UploadPackResponse> {
        self.ensure_state(State::Advertised)?;
        let result = self.exchange(request, side_band, sink);
        self.transition(State::Closed);
        result
    }

    fn exchange<S: ChannelSink + ?Sized>(
        &mut self,
        request: &NegotiationRequest,
        side_band: bool,
        sink: &mut S,
    ) -> Result<UploadPackResponse> {
        self.transition(State::Negotiating);

        let mut body = Vec::new();
        write_upload_pack_request(&mut body, request)?;

        let url = self.remote.service_url(UPLOAD_PACK);
        let request_type = format!("application/x-{UPLOAD_PACK}-request");
        let result_type = format!("application/x-{UPLOAD_PACK}-result");
        let response = self.transport.request(HttpRequest {
            url: url.clone(),
            method: Method::Post,
            headers: self.headers(&[("Content-Type", &request_type), ("Accept", &result_type)]),
            body,
        })?;
        Self::check_response(&url, &response, &result_type)?;

        let mut demux = Demuxer::new(response.body, side_band);
        let negotiation = parse_upload_pack_response(&mut demux, sink)?;

        self.transition(State::Streaming);
        demux.drain(sink)?;
        Ok(negotiation)
    }
}
