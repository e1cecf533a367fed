use crate::error::{ConstructionError, Error, Result};
use crate::http::descriptor::{HttpVersion, OutputFailurePolicy, RequestDescriptor, WriteMode};
use crate::http::head::HeadCapture;
use crate::http::observer::{ObservedIo, PhaseTracker};
use crate::http::resolver::resolve_host;
use crate::http::result::{ProbeResult, ResponseHeaders};
use crate::http::transport::{Host, ResolvedRequest, Transport};
use crate::output::sink;
use crate::timing::{mark_epoch, Phase, TimingVector};
use crate::tls::config::client_config;
use bytes::{Bytes, BytesMut};
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::ext::ReasonPhrase;
use pki_types::ServerName;
use rustls::ClientConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::Instrument;

/// What came back over the wire, before any output or retention policy is applied.
struct Exchange {
    version: HttpVersion,
    status: StatusCode,
    message: String,
    headers: ResponseHeaders,
    body: BytesMut,
    timings: TimingVector,
}

/// Measures one request, writing output (if any) in the mode the descriptor asks for.
pub async fn probe(descriptor: &RequestDescriptor) -> Result<ProbeResult> {
    let mode = descriptor
        .output
        .as_ref()
        .map(|output| output.mode)
        .unwrap_or_default();
    probe_with_mode(descriptor, mode).await
}

/// Measures one request, writing output (if any) with an explicit `mode`.
///
/// Everything that can be rejected without touching the network is checked first.
pub async fn probe_with_mode(
    descriptor: &RequestDescriptor,
    mode: WriteMode,
) -> Result<ProbeResult> {
    let request = ResolvedRequest::resolve(descriptor)?;
    let hyper_request = request.to_request()?;
    let tls_config = if request.https {
        Some(client_config(
            descriptor.verify_tls,
            descriptor.ca_file.as_deref(),
            request.transport,
        )?)
    } else {
        None
    };
    let retain_body = descriptor.keep_body || descriptor.output.is_some();

    let span = info_span!("probe", url = %descriptor.url);
    let fut = exchange(&request, hyper_request, tls_config, retain_body)
        .instrument(span);
    let exchange = match descriptor.timeout {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))??,
        None => fut.await?,
    };

    let headers = exchange.headers;
    let body = exchange.body.freeze();
    let mut output_write_failed = false;
    if let Some(output) = descriptor.output.as_ref() {
        let payload = sink::render(
            exchange.version,
            exchange.status.as_u16(),
            &exchange.message,
            output.include_headers.then_some(&headers),
            &body,
        );
        if let Err(e) = sink::write(&output.path, &payload, mode).await {
            match output.on_failure {
                OutputFailurePolicy::Fatal => return Err(e),
                OutputFailurePolicy::Permissive => {
                    warn!("{}", e);
                    output_write_failed = true;
                }
            }
        }
    }

    Ok(ProbeResult {
        http_version: exchange.version,
        status_code: exchange.status.as_u16(),
        status_message: exchange.message,
        timings: exchange.timings,
        headers: descriptor.keep_headers.then_some(headers),
        response: descriptor.keep_body.then_some(body),
        output_write_failed,
    })
}

async fn exchange(
    request: &ResolvedRequest,
    hyper_request: Request<Full<Bytes>>,
    tls_config: Option<Arc<ClientConfig>>,
    retain_body: bool,
) -> Result<Exchange> {
    mark_epoch();
    let mut tracker = PhaseTracker::new();
    tracker.mark(Phase::SocketOpen);

    let addrs = match &request.host {
        Host::Ip(ip) => vec![SocketAddr::new(*ip, request.port)],
        Host::Name(name) => {
            let addrs = resolve_host(name, request.port).await?;
            tracker.mark(Phase::DnsLookup);
            addrs
        }
    };

    let stream = TcpStream::connect(&addrs[..])
        .await
        .map_err(|e| Error::transport(format!("connect to {} failed", request.authority), e))?;
    tracker.mark(Phase::TcpConnection);
    if let (Ok(local), Ok(remote)) = (stream.local_addr(), stream.peer_addr()) {
        debug!("Connected {} -> {}", local, remote);
    }

    let (head, head_rx) = if request.transport.first_read_is_response() {
        let (capture, rx) = HeadCapture::new();
        (Some(capture), Some(rx))
    } else {
        (None, None)
    };
    let (mut sender, mut connection) = match tls_config {
        Some(config) => {
            let server_name = ServerName::try_from(request.host.server_name())
                .map_err(|e| ConstructionError::Tls(e.to_string()))?;
            let tls_stream = TlsConnector::from(config)
                .connect(server_name, stream)
                .await
                .map_err(|e| Error::transport("tls handshake failed", e))?;
            tracker.mark(Phase::TlsHandshake);

            let alpn = tls_stream.get_ref().1.alpn_protocol().map(<[u8]>::to_vec);
            debug!(
                "Negotiated ALPN: {}",
                alpn.as_deref()
                    .map(String::from_utf8_lossy)
                    .unwrap_or_else(|| "none".into())
            );
            let speaks_h2 = alpn.as_deref() == Some(b"h2".as_slice());
            if request.transport == Transport::Http2 && !speaks_h2 {
                return Err(Error::transport(
                    "http/2 negotiation failed",
                    format!("server at {} does not speak h2", request.authority),
                ));
            }

            let io = observed(tls_stream, &tracker, request.transport, head);
            request.transport.handshake(io).await?
        }
        None => {
            let io = observed(stream, &tracker, request.transport, head);
            request.transport.handshake(io).await?
        }
    };

    let response = sender.send(hyper_request).await?;
    tracker.mark(Phase::FirstByte);
    let wire_headers = head_rx.and_then(|mut rx| rx.try_recv().ok());

    let (parts, mut body) = response.into_parts();
    debug!("< {:?} {}", parts.version, parts.status);
    for (key, value) in parts.headers.iter() {
        debug!("< {}: {}", key, String::from_utf8_lossy(value.as_bytes()));
    }

    let mut buf = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| Error::transport("reading response body failed", e))?;
        if let Ok(data) = frame.into_data() {
            if retain_body {
                buf.extend_from_slice(&data);
            }
        }
    }
    tracker.mark(Phase::ContentTransfer);

    drop(body);
    drop(sender);
    connection.join().await;
    let timings = tracker.closed().await;

    let message = match parts.extensions.get::<ReasonPhrase>() {
        Some(reason) => String::from_utf8_lossy(reason.as_bytes()).into_owned(),
        None => parts.status.canonical_reason().unwrap_or_default().to_string(),
    };
    let version = HttpVersion::from_wire(parts.version)
        .unwrap_or(request.transport.version());
    let headers = match wire_headers {
        Some(headers) => headers,
        None => ResponseHeaders::from(&parts.headers),
    };

    Ok(Exchange {
        version,
        status: parts.status,
        message,
        headers,
        body: buf,
        timings,
    })
}

/// Wraps the connection stream. HTTP/1.x streams also keep the raw response head so the
/// header order survives.
fn observed<T>(
    io: T,
    tracker: &PhaseTracker,
    transport: Transport,
    head: Option<HeadCapture>,
) -> ObservedIo<T> {
    let io = ObservedIo::new(io, tracker.sink(), transport.first_read_is_response());
    match head {
        Some(capture) => io.capture_head(capture),
        None => io,
    }
}
