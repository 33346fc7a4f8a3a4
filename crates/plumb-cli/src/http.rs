//! Blocking HTTP transport backed by reqwest.

use plumb_protocol::{HttpRequest, HttpResponse, Method, ProtocolError, Transport};
use std::io;
use std::time::Duration;

/// Sends smart HTTP requests with a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a connect timeout and no overall timeout,
    /// since pack downloads can be long.
    pub fn new(connect_timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(None)
            .build()?;
        Ok(Self { client })
    }
}

fn transport_error(e: reqwest::Error) -> ProtocolError {
    ProtocolError::Io(io::Error::other(e))
}

impl Transport for ReqwestTransport {
    fn request(&self, request: HttpRequest) -> plumb_protocol::Result<HttpResponse> {
        tracing::debug!(method = %request.method, url = %request.url, "http request");

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).body(request.body),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().map_err(transport_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        tracing::debug!(status, "http response");

        Ok(HttpResponse {
            status,
            headers,
            body: Box::new(response),
        })
    }
}
