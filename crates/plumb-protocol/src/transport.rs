//! HTTP transport capability.
//!
//! The negotiator only needs "send a request, get status, headers and a body
//! stream back". Anything that can do that (a real HTTP client, an in-process
//! server in tests) implements [`Transport`].

use crate::Result;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl Method {
    /// Method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL.
    pub url: String,
    /// Request method.
    pub method: Method,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body; empty for GET.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Returns the first header with `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response with a streaming body.
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body stream.
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    /// Returns the first header with `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Sends HTTP requests on behalf of the negotiator.
pub trait Transport {
    /// Performs one request.
    fn request(&self, request: HttpRequest) -> Result<HttpResponse>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).request(request)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).request(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).request(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Echo;

    impl Transport for Echo {
        fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
            Ok(HttpResponse {
                status: 200,
                headers: vec![("Content-Type".into(), "text/plain".into())],
                body: Box::new(Cursor::new(request.url.into_bytes())),
            })
        }
    }

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            url: url.into(),
            method: Method::Get,
            headers: vec![("User-Agent".into(), "plumb".into())],
            body: Vec::new(),
        }
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = get("http://example.com");
        assert_eq!(request.header("user-agent"), Some("plumb"));
        assert_eq!(request.header("accept"), None);

        let response = Echo.request(request).unwrap();
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert!(response.is_success());
    }

    #[test]
    fn test_transport_through_wrappers() {
        let shared: Arc<dyn Transport> = Arc::new(Echo);
        let boxed: Box<dyn Transport> = Box::new(Echo);

        for transport in [&shared as &dyn Transport, &boxed as &dyn Transport] {
            let mut response = transport.request(get("http://x/y")).unwrap();
            let mut body = String::new();
            response.body.read_to_string(&mut body).unwrap();
            assert_eq!(body, "http://x/y");
        }
    }

    #[test]
    fn test_method_names() {
        assert_eq!(Method::Get.to_string(), "GET");
        assert_eq!(Method::Post.as_str(), "POST");
    }
}
