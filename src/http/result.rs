use crate::http::descriptor::HttpVersion;
use crate::timing::TimingVector;
use bytes::Bytes;
use http::HeaderMap;
use serde::{Serialize, Serializer};

/// Response headers in the order the server sent them. Repeated names stay where they
/// appeared; HTTP/1.x names keep their wire spelling.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResponseHeaders(Vec<(String, String)>);

impl ResponseHeaders {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&HeaderMap> for ResponseHeaders {
    fn from(map: &HeaderMap) -> Self {
        ResponseHeaders(
            map.iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
        )
    }
}

impl FromIterator<(String, String)> for ResponseHeaders {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        ResponseHeaders(iter.into_iter().collect())
    }
}

/// Serialized as a list of `[name, value]` pairs, since a map would fold repeated names.
impl Serialize for ResponseHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Outcome of one probe, or the averaged outcome of a run set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub http_version: HttpVersion,
    pub status_code: u16,
    pub status_message: String,
    pub timings: TimingVector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<ResponseHeaders>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "lossy_body")]
    pub response: Option<Bytes>,
    /// Set when a permissive output write failed; the measurement itself is intact.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub output_write_failed: bool,
}

fn lossy_body<S: Serializer>(body: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
    match body {
        Some(bytes) => serializer.serialize_str(&String::from_utf8_lossy(bytes)),
        None => serializer.serialize_none(),
    }
}
