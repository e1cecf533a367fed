use crate::error::ConstructionError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Protocol version selected for a probe and reported back in the result.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HttpVersion {
    #[serde(rename = "1.0")]
    Http10,
    #[default]
    #[serde(rename = "1.1")]
    Http11,
    #[serde(rename = "2.0")]
    Http2,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "1.0",
            HttpVersion::Http11 => "1.1",
            HttpVersion::Http2 => "2.0",
        }
    }

    pub fn from_wire(version: http::Version) -> Option<Self> {
        match version {
            http::Version::HTTP_10 => Some(HttpVersion::Http10),
            http::Version::HTTP_11 => Some(HttpVersion::Http11),
            http::Version::HTTP_2 => Some(HttpVersion::Http2),
            _ => None,
        }
    }

    pub fn to_wire(self) -> http::Version {
        match self {
            HttpVersion::Http10 => http::Version::HTTP_10,
            HttpVersion::Http11 => http::Version::HTTP_11,
            HttpVersion::Http2 => http::Version::HTTP_2,
        }
    }
}

impl FromStr for HttpVersion {
    type Err = ConstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.0" | "1" => Ok(HttpVersion::Http10),
            "1.1" => Ok(HttpVersion::Http11),
            "2.0" | "2" => Ok(HttpVersion::Http2),
            other => Err(ConstructionError::UnsupportedVersion(other.to_string())),
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parses `user:password`. A value without a colon is a username with an empty password.
    pub fn parse(value: &str) -> Self {
        match value.split_once(':') {
            Some((user, password)) => Self::new(user, password),
            None => Self::new(value, ""),
        }
    }

    pub fn basic_auth(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Whether the output file is replaced or extended by a write.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    #[default]
    Truncate,
    Append,
}

/// What happens to the measurement when the output file cannot be written.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OutputFailurePolicy {
    #[default]
    Fatal,
    Permissive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    /// Mode of the first write. Later writes in a multi-request run always append.
    pub mode: WriteMode,
    /// Prefix each body with a raw status line and header block.
    pub include_headers: bool,
    pub on_failure: OutputFailurePolicy,
}

impl OutputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: WriteMode::Truncate,
            include_headers: false,
            on_failure: OutputFailurePolicy::Fatal,
        }
    }

    pub fn mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn include_headers(mut self, include: bool) -> Self {
        self.include_headers = include;
        self
    }

    pub fn on_failure(mut self, policy: OutputFailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }
}

/// Everything one probe needs to know. Read-only once a measurement starts.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: Option<String>,
    /// Header names are trimmed and lower-cased; insertion order is kept.
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub version: HttpVersion,
    pub verify_tls: bool,
    pub ca_file: Option<PathBuf>,
    pub credentials: Option<Credentials>,
    pub timeout: Option<Duration>,
    pub output: Option<OutputFile>,
    pub keep_headers: bool,
    pub keep_body: bool,
}

impl RequestDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: None,
            headers: Vec::new(),
            body: None,
            version: HttpVersion::default(),
            verify_tls: true,
            ca_file: None,
            credentials: None,
            timeout: None,
            output: None,
            keep_headers: false,
            keep_body: false,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets a header, replacing an earlier value for the same name.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    /// Adds a raw `Name: value` header line. Lines without a colon are ignored.
    pub fn header_line(self, line: &str) -> Self {
        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => self.header(name, value),
            _ => {
                debug!("Ignoring malformed header '{}'", line);
                self
            }
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn version(mut self, version: HttpVersion) -> Self {
        self.version = version;
        self
    }

    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn output(mut self, output: OutputFile) -> Self {
        self.output = Some(output);
        self
    }

    pub fn keep_headers(mut self, keep: bool) -> Self {
        self.keep_headers = keep;
        self
    }

    pub fn keep_body(mut self, keep: bool) -> Self {
        self.keep_body = keep;
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl From<&str> for RequestDescriptor {
    fn from(url: &str) -> Self {
        RequestDescriptor::new(url)
    }
}

impl From<String> for RequestDescriptor {
    fn from(url: String) -> Self {
        RequestDescriptor::new(url)
    }
}
