use crate::error::{ConstructionError, Error, Result};
use crate::http::descriptor::{HttpVersion, RequestDescriptor};
use bytes::Bytes;
use http::header::{
    ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST, HeaderName, HeaderValue, USER_AGENT,
};
use http::{Method, Request, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use hyper::Response;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::IpAddr;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use url::Url;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// How a request travels on the wire. Chosen once, when the descriptor is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http10,
    Http11,
    Http2,
}

impl Transport {
    pub fn version(&self) -> HttpVersion {
        match self {
            Transport::Http10 => HttpVersion::Http10,
            Transport::Http11 => HttpVersion::Http11,
            Transport::Http2 => HttpVersion::Http2,
        }
    }

    pub fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        match self {
            Transport::Http2 => vec![b"h2".to_vec()],
            Transport::Http10 | Transport::Http11 => vec![b"http/1.1".to_vec()],
        }
    }

    /// HTTP/1.x responses arrive only after the request is written, so the first
    /// read off the socket is the first response byte. HTTP/2 servers speak first.
    pub fn first_read_is_response(&self) -> bool {
        !matches!(self, Transport::Http2)
    }

    /// Runs the protocol handshake over `io` and spawns the connection driver.
    pub async fn handshake<T>(&self, io: T) -> Result<(Sender, ConnectionTask)>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(io);
        match self {
            Transport::Http10 | Transport::Http11 => {
                let (sender, conn) = http1::handshake(io)
                    .await
                    .map_err(|e| Error::transport("http/1 handshake failed", e))?;
                let handle = tokio::spawn(async move {
                    if let Err(err) = conn.await {
                        debug!("Connection failed: {:?}", err);
                    }
                });
                Ok((Sender::Http1(sender), ConnectionTask::new(handle)))
            }
            Transport::Http2 => {
                let (sender, conn) = http2::handshake(TokioExecutor::new(), io)
                    .await
                    .map_err(|e| Error::transport("http/2 handshake failed", e))?;
                let handle = tokio::spawn(async move {
                    if let Err(err) = conn.await {
                        debug!("Connection failed: {:?}", err);
                    }
                });
                Ok((Sender::Http2(sender), ConnectionTask::new(handle)))
            }
        }
    }
}

/// Request half of an established connection.
pub enum Sender {
    Http1(http1::SendRequest<Full<Bytes>>),
    Http2(http2::SendRequest<Full<Bytes>>),
}

impl Sender {
    pub async fn send(&mut self, request: Request<Full<Bytes>>) -> Result<Response<Incoming>> {
        match self {
            Sender::Http1(sender) => {
                sender
                    .ready()
                    .await
                    .map_err(|e| Error::transport("connection closed before request", e))?;
                sender
                    .send_request(request)
                    .await
                    .map_err(|e| Error::transport("request failed", e))
            }
            Sender::Http2(sender) => {
                sender
                    .ready()
                    .await
                    .map_err(|e| Error::transport("connection closed before request", e))?;
                sender
                    .send_request(request)
                    .await
                    .map_err(|e| Error::transport("request failed", e))
            }
        }
    }
}

/// Spawned connection driver. Aborted when dropped so a cancelled probe releases its socket.
pub struct ConnectionTask {
    handle: JoinHandle<()>,
}

impl ConnectionTask {
    fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    /// Waits for the connection to shut down.
    pub async fn join(&mut self) {
        if let Err(e) = (&mut self.handle).await {
            debug!("Connection task ended abnormally: {}", e);
        }
    }
}

impl Drop for ConnectionTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Ip(IpAddr),
    Name(String),
}

impl Host {
    /// Name presented for SNI and certificate checks.
    pub fn server_name(&self) -> String {
        match self {
            Host::Ip(ip) => ip.to_string(),
            Host::Name(name) => name.clone(),
        }
    }
}

/// A descriptor turned into concrete wire parameters.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub https: bool,
    pub host: Host,
    pub port: u16,
    pub authority: String,
    pub path_and_query: String,
    pub method: Method,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
    pub transport: Transport,
}

impl ResolvedRequest {
    pub fn resolve(descriptor: &RequestDescriptor) -> Result<Self> {
        let url = Url::parse(&descriptor.url).map_err(|e| ConstructionError::InvalidUrl {
            url: descriptor.url.clone(),
            reason: e.to_string(),
        })?;
        let https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(ConstructionError::UnsupportedScheme(other.to_string()).into());
            }
        };
        let transport = match descriptor.version {
            HttpVersion::Http2 if !https => {
                return Err(ConstructionError::InsecureScheme {
                    scheme: url.scheme().to_string(),
                }
                .into())
            }
            HttpVersion::Http2 => Transport::Http2,
            HttpVersion::Http11 => Transport::Http11,
            HttpVersion::Http10 => Transport::Http10,
        };

        let invalid_url = |reason: &str| ConstructionError::InvalidUrl {
            url: descriptor.url.clone(),
            reason: reason.to_string(),
        };
        let host = match url.host() {
            Some(url::Host::Domain(name)) => Host::Name(name.to_string()),
            Some(url::Host::Ipv4(ip)) => Host::Ip(IpAddr::V4(ip)),
            Some(url::Host::Ipv6(ip)) => Host::Ip(IpAddr::V6(ip)),
            None => return Err(invalid_url("missing host").into()),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid_url("missing port"))?;
        let host_str = url.host_str().ok_or_else(|| invalid_url("missing host"))?;
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host_str, port),
            None => host_str.to_string(),
        };
        let path_and_query = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        let method = match descriptor.method.as_deref() {
            Some(m) => Method::from_str(&m.to_ascii_uppercase())
                .map_err(|_| ConstructionError::InvalidMethod(m.to_string()))?,
            None if descriptor.body.is_some() => Method::POST,
            None => Method::GET,
        };
        let body = descriptor.body.clone().unwrap_or_default();

        let mut headers = Vec::with_capacity(descriptor.headers.len() + 6);
        for (name, value) in &descriptor.headers {
            set_header(&mut headers, name, value)?;
        }
        if transport != Transport::Http2 && !has_header(&headers, &HOST) {
            set_header(&mut headers, HOST.as_str(), &authority)?;
        }
        if !has_header(&headers, &USER_AGENT) {
            let agent = concat!("httptime/", env!("CARGO_PKG_VERSION"));
            set_header(&mut headers, USER_AGENT.as_str(), agent)?;
        }
        if !has_header(&headers, &ACCEPT) {
            set_header(&mut headers, ACCEPT.as_str(), "*/*")?;
        }
        if let Some(credentials) = descriptor.credentials.as_ref() {
            let value = credentials.basic_auth();
            set_header(&mut headers, AUTHORIZATION.as_str(), &value)?;
        }
        if descriptor.body.is_some() {
            if !has_header(&headers, &CONTENT_TYPE) {
                set_header(&mut headers, CONTENT_TYPE.as_str(), FORM_URLENCODED)?;
            }
            let length = body.len().to_string();
            set_header(&mut headers, CONTENT_LENGTH.as_str(), &length)?;
        }

        Ok(Self {
            https,
            host,
            port,
            authority,
            path_and_query,
            method,
            headers,
            body,
            transport,
        })
    }

    /// Builds the hyper request. HTTP/1.x uses origin-form, HTTP/2 needs the absolute URI
    /// to derive its `:scheme` and `:authority` pseudo headers.
    pub fn to_request(&self) -> Result<Request<Full<Bytes>>> {
        let uri = match self.transport {
            Transport::Http2 => format!("https://{}{}", self.authority, self.path_and_query),
            Transport::Http10 | Transport::Http11 => self.path_and_query.clone(),
        };
        let uri = Uri::from_str(&uri).map_err(|e| ConstructionError::InvalidUrl {
            url: uri.clone(),
            reason: e.to_string(),
        })?;
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(uri)
            .version(self.transport.version().to_wire())
            .body(Full::new(self.body.clone()))
            .map_err(|e| ConstructionError::InvalidUrl {
                url: self.authority.clone(),
                reason: e.to_string(),
            })?;
        for (name, value) in &self.headers {
            request.headers_mut().append(name.clone(), value.clone());
        }

        debug!(
            "> {} {} {:?}",
            request.method(),
            self.path_and_query,
            request.version()
        );
        for (key, value) in request.headers().iter() {
            debug!("> {}: {}", key, String::from_utf8_lossy(value.as_bytes()));
        }
        Ok(request)
    }
}

fn has_header(headers: &[(HeaderName, HeaderValue)], name: &HeaderName) -> bool {
    headers.iter().any(|(n, _)| n == name)
}

fn set_header(headers: &mut Vec<(HeaderName, HeaderValue)>, name: &str, value: &str) -> Result<()> {
    let invalid = || ConstructionError::InvalidHeader {
        name: name.to_string(),
    };
    let name = HeaderName::from_str(name).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
    match headers.iter_mut().find(|(n, _)| *n == name) {
        Some(entry) => entry.1 = value,
        None => headers.push((name, value)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::descriptor::Credentials;

    fn header<'a>(request: &'a ResolvedRequest, name: &str) -> Option<&'a str> {
        request
            .headers
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .and_then(|(_, v)| v.to_str().ok())
    }

    #[test]
    fn test_resolves_defaults() {
        let descriptor = RequestDescriptor::new("http://example.com/a/b?c=d");
        let request = ResolvedRequest::resolve(&descriptor).unwrap();
        assert!(!request.https);
        assert_eq!(request.host, Host::Name("example.com".to_string()));
        assert_eq!(request.port, 80);
        assert_eq!(request.path_and_query, "/a/b?c=d");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.transport, Transport::Http11);
        assert_eq!(header(&request, "host"), Some("example.com"));
        assert_eq!(header(&request, "accept"), Some("*/*"));
        assert!(header(&request, "content-length").is_none());
    }

    #[test]
    fn test_literal_ip_hosts() {
        let v4 = ResolvedRequest::resolve(&"https://127.0.0.1:8443/".into()).unwrap();
        assert_eq!(v4.host, Host::Ip("127.0.0.1".parse().unwrap()));
        assert_eq!(v4.port, 8443);
        assert_eq!(v4.authority, "127.0.0.1:8443");

        let v6 = ResolvedRequest::resolve(&"http://[::1]/".into()).unwrap();
        assert_eq!(v6.host, Host::Ip("::1".parse().unwrap()));
        assert_eq!(v6.host.server_name(), "::1");
    }

    #[test]
    fn test_body_defaults_to_post_with_form_content_type() {
        let descriptor = RequestDescriptor::new("http://example.com").body("a=1&b=2");
        let request = ResolvedRequest::resolve(&descriptor).unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(header(&request, "content-type"), Some(FORM_URLENCODED));
        assert_eq!(header(&request, "content-length"), Some("7"));
    }

    #[test]
    fn test_explicit_method_and_content_type_win() {
        let descriptor = RequestDescriptor::new("http://example.com")
            .method("put")
            .header("Content-Type", "application/json")
            .body("{}");
        let request = ResolvedRequest::resolve(&descriptor).unwrap();
        assert_eq!(request.method, Method::PUT);
        assert_eq!(header(&request, "content-type"), Some("application/json"));
        assert_eq!(header(&request, "content-length"), Some("2"));
    }

    #[test]
    fn test_credentials_override_authorization() {
        let descriptor = RequestDescriptor::new("http://example.com")
            .header("Authorization", "Bearer stale")
            .credentials(Credentials::new("user", "pass"));
        let request = ResolvedRequest::resolve(&descriptor).unwrap();
        assert_eq!(header(&request, "authorization"), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn test_http2_over_plaintext_is_rejected() {
        let descriptor = RequestDescriptor::new("http://example.com")
            .version(HttpVersion::Http2);
        let err = ResolvedRequest::resolve(&descriptor).unwrap_err();
        assert!(matches!(
            err,
            Error::Construction(ConstructionError::InsecureScheme { .. })
        ));
    }

    #[test]
    fn test_http2_uses_absolute_uri_without_host_header() {
        let descriptor = RequestDescriptor::new("https://example.com/x")
            .version(HttpVersion::Http2);
        let request = ResolvedRequest::resolve(&descriptor).unwrap();
        assert_eq!(request.transport, Transport::Http2);
        assert!(header(&request, "host").is_none());
        let hyper_request = request.to_request().unwrap();
        assert_eq!(hyper_request.uri().to_string(), "https://example.com/x");
        assert_eq!(hyper_request.version(), http::Version::HTTP_2);
    }

    #[test]
    fn test_http10_forces_request_version() {
        let descriptor = RequestDescriptor::new("http://example.com/")
            .version(HttpVersion::Http10);
        let request = ResolvedRequest::resolve(&descriptor)
            .unwrap()
            .to_request()
            .unwrap();
        assert_eq!(request.version(), http::Version::HTTP_10);
        assert_eq!(request.uri().to_string(), "/");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(ResolvedRequest::resolve(&"ftp://example.com".into()).is_err());
        assert!(ResolvedRequest::resolve(&"not a url".into()).is_err());
        let bad_method = RequestDescriptor::new("http://example.com").method("GE T");
        assert!(ResolvedRequest::resolve(&bad_method).is_err());
    }

    #[test]
    fn test_alpn_follows_transport() {
        assert_eq!(Transport::Http2.alpn_protocols(), vec![b"h2".to_vec()]);
        assert_eq!(Transport::Http10.alpn_protocols(), vec![b"http/1.1".to_vec()]);
        assert!(!Transport::Http2.first_read_is_response());
    }
}
