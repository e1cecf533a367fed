//! Raw HTTP/1.x response head capture.
//!
//! hyper hands out headers as a `HeaderMap`, which groups repeated names together. The
//! bytes read off the socket still carry the order the server used, so they are kept
//! until the final head is complete and parsed again here.

use crate::http::result::ResponseHeaders;
use tokio::sync::oneshot;

const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;

/// Collects response bytes until the final (non-1xx) head is complete, then sends its
/// header lines, in wire order, to the paired receiver.
#[derive(Debug)]
pub struct HeadCapture {
    buf: Vec<u8>,
    tx: Option<oneshot::Sender<ResponseHeaders>>,
}

impl HeadCapture {
    pub fn new() -> (Self, oneshot::Receiver<ResponseHeaders>) {
        let (tx, rx) = oneshot::channel();
        let capture = Self {
            buf: Vec::new(),
            tx: Some(tx),
        };
        (capture, rx)
    }

    pub fn is_done(&self) -> bool {
        self.tx.is_none()
    }

    pub fn push(&mut self, data: &[u8]) {
        if self.is_done() {
            return;
        }
        self.buf.extend_from_slice(data);
        match parse_final_head(&self.buf) {
            Ok(Some(headers)) => {
                if let Some(tx) = self.tx.take() {
                    let _ = tx.send(headers);
                }
                self.buf = Vec::new();
            }
            Ok(None) if self.buf.len() < MAX_HEAD_BYTES => {}
            Ok(None) => {
                debug!("Response head over {} bytes, not captured", MAX_HEAD_BYTES);
                self.give_up();
            }
            Err(e) => {
                debug!("Cannot parse raw response head: {}", e);
                self.give_up();
            }
        }
    }

    fn give_up(&mut self) {
        self.tx = None;
        self.buf = Vec::new();
    }
}

/// Parses the header lines of the first non-informational response head in `buf`.
///
/// `Ok(None)` means more bytes are needed. `101 Switching Protocols` counts as final.
pub fn parse_final_head(buf: &[u8]) -> Result<Option<ResponseHeaders>, httparse::Error> {
    let mut offset = 0;
    loop {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);
        let len = match response.parse(&buf[offset..])? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Ok(None),
        };
        match response.code {
            Some(code) if (100..200).contains(&code) && code != 101 => offset += len,
            _ => {
                let lines = response
                    .headers
                    .iter()
                    .map(|h| {
                        let value = String::from_utf8_lossy(h.value).into_owned();
                        (h.name.to_string(), value)
                    })
                    .collect();
                return Ok(Some(lines));
            }
        }
    }
}
