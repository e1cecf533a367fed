use crate::error::{Error, Result};
use crate::http::descriptor::{HttpVersion, WriteMode};
use crate::http::result::ResponseHeaders;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Raw HTTP framing for the output file: status line, headers, blank line, body.
pub fn render(
    version: HttpVersion,
    status: u16,
    message: &str,
    headers: Option<&ResponseHeaders>,
    body: &[u8],
) -> Vec<u8> {
    let Some(headers) = headers else {
        return body.to_vec();
    };
    let mut out = format!("HTTP/{} {} {}\r\n", version, status, message);
    for (name, value) in headers.iter() {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

/// Writes `buf` to `path` in one go. The handle lives only for this call.
pub async fn write(path: &Path, buf: &[u8], mode: WriteMode) -> Result<()> {
    let wrap = |source: std::io::Error| Error::OutputWrite {
        path: path.to_path_buf(),
        source,
    };
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        WriteMode::Truncate => options.write(true).truncate(true),
        WriteMode::Append => options.append(true),
    };
    let mut file = options.open(path).await.map_err(wrap)?;
    file.write_all(buf).await.map_err(wrap)?;
    file.flush().await.map_err(wrap)?;
    debug!("Wrote {} bytes to {} ({:?})", buf.len(), path.display(), mode);
    Ok(())
}
