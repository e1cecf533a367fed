//! Per-phase timing of single HTTP/1.0, HTTP/1.1 and HTTP/2 exchanges.
//!
//! [`probe`] measures one request and returns a [`ProbeResult`] whose
//! [`TimingVector`] holds a monotonic timestamp for every lifecycle phase that
//! applied (socket open, DNS lookup, TCP connect, TLS handshake, first byte,
//! content transfer, socket close). [`measure`] repeats a probe sequentially and
//! [`average_results`] folds the runs into one averaged result.
#[macro_use]
extern crate tracing;

pub mod error;
pub mod http;
pub mod output;
pub mod runner;
pub mod timing;
pub mod tls;

pub use crate::error::{ConstructionError, Error, Result};
pub use crate::http::descriptor::{
    Credentials, HttpVersion, OutputFailurePolicy, OutputFile, RequestDescriptor, WriteMode,
};
pub use crate::http::prober::{probe, probe_with_mode};
pub use crate::http::result::{ProbeResult, ResponseHeaders};
pub use crate::runner::{average_results, measure, measure_average, Measurement, RunOptions};
pub use crate::timing::{
    average, duration, reconstruct_from_durations, to_milliseconds, Phase, Timestamp,
    TimingVector,
};
