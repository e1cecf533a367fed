//! Lifecycle observation for a single probe.
//!
//! The transport stream is wrapped in [`ObservedIo`], which reports socket-level events
//! (first response byte, socket release) through an [`EventSink`], and can keep the raw
//! HTTP/1.x response head for header order. Everything else is stamped by the prober
//! itself. All events end up in one [`PhaseTracker`], owned by the probe, which turns
//! them into a [`TimingVector`].

use crate::http::head::HeadCapture;
use crate::timing::{Phase, Timestamp, TimingVector};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy)]
pub struct LifecycleEvent {
    pub phase: Phase,
    pub at: Instant,
}

/// Cloneable handle for reporting events from outside the probe task.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<LifecycleEvent>,
}

impl EventSink {
    pub fn emit(&self, phase: Phase) {
        let event = LifecycleEvent {
            phase,
            at: Instant::now(),
        };
        // The probe may already be gone (timeout, error). Nothing to report to then.
        let _ = self.tx.send(event);
    }
}

/// Probe progression. Optional states are skipped when their phase does not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProbeState {
    Idle,
    SocketOpen,
    DnsLookup,
    TcpConnected,
    TlsHandshake,
    FirstByte,
    ContentTransferred,
    Closed,
}

impl From<Phase> for ProbeState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::SocketOpen => ProbeState::SocketOpen,
            Phase::DnsLookup => ProbeState::DnsLookup,
            Phase::TcpConnection => ProbeState::TcpConnected,
            Phase::TlsHandshake => ProbeState::TlsHandshake,
            Phase::FirstByte => ProbeState::FirstByte,
            Phase::ContentTransfer => ProbeState::ContentTransferred,
            Phase::SocketClose => ProbeState::Closed,
        }
    }
}

/// Timing vector plus the state it has reached.
///
/// Socket release is held back until the probe is done with the connection: hyper may
/// drop a non-persistent connection while the last body frame is still in flight.
#[derive(Debug)]
struct Progress {
    state: ProbeState,
    timings: TimingVector,
    released: Option<Instant>,
}

impl Progress {
    fn record(&mut self, event: LifecycleEvent) -> bool {
        if event.phase == Phase::SocketClose && self.state != ProbeState::Closed {
            if self.released.is_some() {
                return false;
            }
            trace!("socket released");
            self.released = Some(event.at);
            return true;
        }
        self.stamp(event.phase, Timestamp::from_instant(event.at))
    }

    fn stamp(&mut self, phase: Phase, at: Timestamp) -> bool {
        let written = self.timings.record(phase, at);
        if written {
            trace!("phase {} recorded", phase);
            self.state = self.state.max(ProbeState::from(phase));
        } else {
            trace!("phase {} already recorded, ignoring", phase);
        }
        written
    }

    /// Stamps the held-back release, never earlier than anything already recorded.
    fn close(&mut self, released: Instant) {
        let latest = self.timings.iter().map(|(_, at)| at).max();
        let released = Timestamp::from_instant(released);
        let at = latest.map_or(released, |at| at.max(released));
        self.stamp(Phase::SocketClose, at);
    }
}

/// Per-probe state machine. Owned by exactly one in-flight probe.
pub struct PhaseTracker {
    progress: Progress,
    tx: UnboundedSender<LifecycleEvent>,
    rx: UnboundedReceiver<LifecycleEvent>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            progress: Progress {
                state: ProbeState::Idle,
                timings: TimingVector::new(),
                released: None,
            },
            tx,
            rx,
        }
    }

    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
        }
    }

    pub fn state(&self) -> ProbeState {
        self.progress.state
    }

    pub fn timings(&self) -> &TimingVector {
        &self.progress.timings
    }

    /// Applies one event. The first occurrence of a phase wins; later ones are ignored.
    pub fn record(&mut self, event: LifecycleEvent) -> bool {
        self.progress.record(event)
    }

    /// Stamps `phase` now, after applying anything the socket already reported.
    pub fn mark(&mut self, phase: Phase) -> bool {
        self.drain();
        self.record(LifecycleEvent {
            phase,
            at: Instant::now(),
        })
    }

    /// Applies every event that is already queued.
    pub fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.progress.record(event);
        }
    }

    /// Waits for the socket to be released and returns the finished timing vector.
    ///
    /// Every `EventSink` must be owned by something that is about to be dropped,
    /// otherwise this never resolves.
    pub async fn closed(self) -> TimingVector {
        let PhaseTracker {
            mut progress,
            tx,
            mut rx,
        } = self;
        drop(tx);
        let released = loop {
            if let Some(at) = progress.released {
                break at;
            }
            match rx.recv().await {
                Some(event) => {
                    progress.record(event);
                }
                None => break Instant::now(),
            }
        };
        while let Ok(event) = rx.try_recv() {
            progress.record(event);
        }
        progress.close(released);
        progress.timings
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream adapter that reports the first non-empty read and its own release.
pub struct ObservedIo<T> {
    inner: T,
    sink: EventSink,
    watch_first_read: bool,
    head: Option<HeadCapture>,
}

impl<T> ObservedIo<T> {
    pub fn new(inner: T, sink: EventSink, watch_first_read: bool) -> Self {
        Self {
            inner,
            sink,
            watch_first_read,
            head: None,
        }
    }

    /// Feeds every byte read into `capture` until it has seen the final response head.
    pub fn capture_head(mut self, capture: HeadCapture) -> Self {
        self.head = Some(capture);
        self
    }
}

impl<T> Drop for ObservedIo<T> {
    fn drop(&mut self) {
        self.sink.emit(Phase::SocketClose);
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for ObservedIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = &buf.filled()[before..];
            if !read.is_empty() {
                if self.watch_first_read {
                    self.watch_first_read = false;
                    self.sink.emit(Phase::FirstByte);
                }
                if let Some(head) = self.head.as_mut() {
                    head.push(read);
                    if head.is_done() {
                        self.head = None;
                    }
                }
            }
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for ObservedIo<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
