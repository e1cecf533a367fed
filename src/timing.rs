use crate::error::{Error, Result};
use serde::ser::{SerializeMap, SerializeTuple};
use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::Add;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const NANOS_PER_SEC: u32 = 1_000_000_000;
const NANOS_PER_MILLI: u64 = 1_000_000;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Pins the process-wide monotonic epoch that every [`Timestamp`] is measured from.
///
/// Must run before any `Instant` that is later converted into a `Timestamp` is captured,
/// otherwise that instant would saturate to zero.
pub fn mark_epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Monotonic `(seconds, nanoseconds)` pair relative to the epoch of this process.
///
/// The same shape is used for durations, which are just differences of two timestamps.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub secs: u64,
    pub nanos: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { secs: 0, nanos: 0 };

    pub fn new(secs: u64, nanos: u32) -> Self {
        Self {
            secs: secs + u64::from(nanos / NANOS_PER_SEC),
            nanos: nanos % NANOS_PER_SEC,
        }
    }

    pub fn now() -> Self {
        mark_epoch();
        Self::from_instant(Instant::now())
    }

    pub fn from_instant(instant: Instant) -> Self {
        Self::from(instant.saturating_duration_since(mark_epoch()))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::from(Duration::from_millis(millis))
    }

    pub fn as_nanos(&self) -> u128 {
        u128::from(self.secs) * u128::from(NANOS_PER_SEC) + u128::from(self.nanos)
    }

    fn from_nanos(nanos: u128) -> Self {
        let per_sec = u128::from(NANOS_PER_SEC);
        Self {
            secs: (nanos / per_sec) as u64,
            nanos: (nanos % per_sec) as u32,
        }
    }
}

impl From<Duration> for Timestamp {
    fn from(value: Duration) -> Self {
        Self {
            secs: value.as_secs(),
            nanos: value.subsec_nanos(),
        }
    }
}

impl From<Timestamp> for Duration {
    fn from(value: Timestamp) -> Self {
        Duration::new(value.secs, value.nanos)
    }
}

impl Add for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Timestamp) -> Timestamp {
        Timestamp::new(self.secs + rhs.secs, self.nanos + rhs.nanos)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s {}ns", self.secs, self.nanos)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.secs)?;
        tuple.serialize_element(&self.nanos)?;
        tuple.end()
    }
}

/// Named lifecycle milestones, declared in their structural order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    SocketOpen,
    DnsLookup,
    TcpConnection,
    TlsHandshake,
    FirstByte,
    ContentTransfer,
    SocketClose,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::SocketOpen,
        Phase::DnsLookup,
        Phase::TcpConnection,
        Phase::TlsHandshake,
        Phase::FirstByte,
        Phase::ContentTransfer,
        Phase::SocketClose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::SocketOpen => "socketOpen",
            Phase::DnsLookup => "dnsLookup",
            Phase::TcpConnection => "tcpConnection",
            Phase::TlsHandshake => "tlsHandshake",
            Phase::FirstByte => "firstByte",
            Phase::ContentTransfer => "contentTransfer",
            Phase::SocketClose => "socketClose",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase → timestamp mapping for one probe, kept in the order phases were recorded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TimingVector {
    entries: Vec<(Phase, Timestamp)>,
}

impl TimingVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `phase` unless it is already present. Returns whether the entry was written.
    pub fn record(&mut self, phase: Phase, at: Timestamp) -> bool {
        if self.contains(phase) {
            return false;
        }
        self.entries.push((phase, at));
        true
    }

    pub fn get(&self, phase: Phase) -> Option<Timestamp> {
        self.entries
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, ts)| *ts)
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.entries.iter().any(|(p, _)| *p == phase)
    }

    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.entries.iter().map(|(p, _)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Phase, Timestamp)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-expresses every phase as the time elapsed since the first recorded phase.
    pub fn durations_from_start(&self) -> Result<TimingVector> {
        let Some(&(_, start)) = self.entries.first() else {
            return Ok(TimingVector::new());
        };
        let mut out = TimingVector::new();
        for (phase, at) in self.iter() {
            out.record(phase, duration(start, at)?);
        }
        Ok(out)
    }

    /// Time spent in each phase, measured from the phase recorded just before it.
    pub fn phase_durations(&self) -> Result<Vec<(Phase, Timestamp)>> {
        let mut out = Vec::with_capacity(self.entries.len());
        let mut previous = None;
        for (phase, at) in self.iter() {
            let spent = match previous {
                Some(prev) => duration(prev, at)?,
                None => Timestamp::ZERO,
            };
            out.push((phase, spent));
            previous = Some(at);
        }
        Ok(out)
    }

    /// Elapsed time between the first and the last recorded phase.
    pub fn total(&self) -> Result<Timestamp> {
        match (self.entries.first(), self.entries.last()) {
            (Some(&(_, first)), Some(&(_, last))) => duration(first, last),
            _ => Ok(Timestamp::ZERO),
        }
    }
}

impl FromIterator<(Phase, Timestamp)> for TimingVector {
    fn from_iter<I: IntoIterator<Item = (Phase, Timestamp)>>(iter: I) -> Self {
        let mut out = TimingVector::new();
        for (phase, at) in iter {
            out.record(phase, at);
        }
        out
    }
}

impl Serialize for TimingVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (phase, at) in &self.entries {
            map.serialize_entry(phase.as_str(), at)?;
        }
        map.end()
    }
}

/// `end - start` with nanosecond borrow. Out-of-order inputs are reported, never clamped.
pub fn duration(start: Timestamp, end: Timestamp) -> Result<Timestamp> {
    let (end_secs, nanos) = if end.nanos < start.nanos {
        (end.secs.checked_sub(1), end.nanos + NANOS_PER_SEC - start.nanos)
    } else {
        (Some(end.secs), end.nanos - start.nanos)
    };
    let secs = end_secs
        .and_then(|s| s.checked_sub(start.secs))
        .ok_or(Error::NegativeDuration { start, end })?;
    Ok(Timestamp { secs, nanos })
}

/// Whole milliseconds, rounding the sub-millisecond remainder half-up.
pub fn to_milliseconds(duration: Timestamp) -> u64 {
    duration.secs * 1000 + (u64::from(duration.nanos) + NANOS_PER_MILLI / 2) / NANOS_PER_MILLI
}

/// Per-phase mean over the runs in which that phase is present, floored to whole nanoseconds.
pub fn average(runs: &[TimingVector]) -> TimingVector {
    let mut sums: Vec<(Phase, u128, u128)> = Vec::new();
    for run in runs {
        for (phase, value) in run.iter() {
            match sums.iter_mut().find(|(p, _, _)| *p == phase) {
                Some((_, total, count)) => {
                    *total += value.as_nanos();
                    *count += 1;
                }
                None => sums.push((phase, value.as_nanos(), 1)),
            }
        }
    }
    sums.sort_by_key(|(phase, _, _)| *phase);
    sums.into_iter()
        .map(|(phase, total, count)| (phase, Timestamp::from_nanos(total / count)))
        .collect()
}

/// Turns relative durations back into absolute timestamps anchored at `base`.
pub fn reconstruct_from_durations(durations: &TimingVector, base: Timestamp) -> TimingVector {
    durations.iter().map(|(phase, d)| (phase, base + d)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: u64, nanos: u32) -> Timestamp {
        Timestamp::new(secs, nanos)
    }

    fn vector(entries: &[(Phase, u64)]) -> TimingVector {
        entries
            .iter()
            .map(|(phase, ms)| (*phase, Timestamp::from_millis(*ms)))
            .collect()
    }

    #[test]
    fn test_duration_borrows_a_second() {
        let d = duration(ts(0, 500_000_000), ts(1, 0)).unwrap();
        assert_eq!(d, ts(0, 500_000_000));
        assert_eq!(to_milliseconds(d), 500);
    }

    #[test]
    fn test_duration_without_borrow() {
        let d = duration(ts(2, 100), ts(5, 400)).unwrap();
        assert_eq!(d, ts(3, 300));
    }

    #[test]
    fn test_duration_of_equal_timestamps_is_zero() {
        assert_eq!(duration(ts(7, 9), ts(7, 9)).unwrap(), Timestamp::ZERO);
    }

    #[test]
    fn test_duration_out_of_order_is_an_error() {
        let err = duration(ts(1, 0), ts(0, 999_999_999)).unwrap_err();
        assert!(matches!(err, Error::NegativeDuration { .. }));
        assert!(duration(ts(3, 0), ts(2, 0)).is_err());
    }

    #[test]
    fn test_to_milliseconds_rounds_half_up() {
        assert_eq!(to_milliseconds(ts(0, 1_499_999)), 1);
        assert_eq!(to_milliseconds(ts(0, 1_500_000)), 2);
        assert_eq!(to_milliseconds(ts(2, 999_600_000)), 3000);
        assert_eq!(to_milliseconds(Timestamp::ZERO), 0);
    }

    #[test]
    fn test_timestamp_new_normalizes_nanos() {
        assert_eq!(Timestamp::new(1, 2_000_000_001), ts(3, 1));
        assert_eq!(ts(0, 600_000_000) + ts(0, 600_000_000), ts(1, 200_000_000));
    }

    #[test]
    fn test_record_first_write_wins() {
        let mut timings = TimingVector::new();
        assert!(timings.record(Phase::SocketOpen, ts(1, 0)));
        assert!(!timings.record(Phase::SocketOpen, ts(2, 0)));
        assert_eq!(timings.get(Phase::SocketOpen), Some(ts(1, 0)));
        assert_eq!(timings.len(), 1);
    }

    #[test]
    fn test_average_is_identity_for_uniform_runs() {
        let run = vector(&[
            (Phase::SocketOpen, 0),
            (Phase::DnsLookup, 3),
            (Phase::TcpConnection, 7),
            (Phase::FirstByte, 20),
        ]);
        let averaged = average(&[run.clone(), run.clone(), run.clone()]);
        assert_eq!(averaged, run);
    }

    #[test]
    fn test_average_skips_runs_missing_a_phase() {
        let a = vector(&[
            (Phase::SocketOpen, 0),
            (Phase::DnsLookup, 10),
            (Phase::TcpConnection, 20),
        ]);
        let b = vector(&[(Phase::SocketOpen, 0), (Phase::TcpConnection, 40)]);
        let averaged = average(&[a, b]);
        assert_eq!(averaged.get(Phase::DnsLookup), Some(Timestamp::from_millis(10)));
        assert_eq!(averaged.get(Phase::TcpConnection), Some(Timestamp::from_millis(30)));
        let order: Vec<_> = averaged.phases().collect();
        assert_eq!(order, vec![Phase::SocketOpen, Phase::DnsLookup, Phase::TcpConnection]);
    }

    #[test]
    fn test_average_floors_nanoseconds_across_seconds() {
        let a: TimingVector = [(Phase::FirstByte, ts(1, 999_999_999))].into_iter().collect();
        let b: TimingVector = [(Phase::FirstByte, ts(2, 0))].into_iter().collect();
        let averaged = average(&[a, b]);
        assert_eq!(averaged.get(Phase::FirstByte), Some(ts(1, 999_999_999)));
    }

    #[test]
    fn test_average_of_nothing_is_empty() {
        assert!(average(&[]).is_empty());
    }

    #[test]
    fn test_reconstruct_adds_base() {
        let durations = vector(&[(Phase::SocketOpen, 0), (Phase::FirstByte, 1500)]);
        let absolute = reconstruct_from_durations(&durations, ts(10, 600_000_000));
        assert_eq!(absolute.get(Phase::SocketOpen), Some(ts(10, 600_000_000)));
        assert_eq!(absolute.get(Phase::FirstByte), Some(ts(12, 100_000_000)));
        assert_eq!(reconstruct_from_durations(&durations, Timestamp::ZERO), durations);
    }

    #[test]
    fn test_durations_from_start_round_trip() {
        let absolute: TimingVector = [
            (Phase::SocketOpen, ts(5, 900_000_000)),
            (Phase::TcpConnection, ts(6, 100_000_000)),
            (Phase::SocketClose, ts(6, 950_000_000)),
        ]
        .into_iter()
        .collect();
        let relative = absolute.durations_from_start().unwrap();
        assert_eq!(relative.get(Phase::SocketOpen), Some(Timestamp::ZERO));
        assert_eq!(relative.get(Phase::TcpConnection), Some(ts(0, 200_000_000)));
        assert_eq!(
            reconstruct_from_durations(&relative, ts(5, 900_000_000)),
            absolute
        );
        assert_eq!(to_milliseconds(absolute.total().unwrap()), 1050);
    }

    #[test]
    fn test_phase_durations_measure_from_previous_phase() {
        let timings = vector(&[
            (Phase::SocketOpen, 0),
            (Phase::TcpConnection, 4),
            (Phase::FirstByte, 10),
        ]);
        let spent: Vec<u64> = timings
            .phase_durations()
            .unwrap()
            .into_iter()
            .map(|(_, d)| to_milliseconds(d))
            .collect();
        assert_eq!(spent, vec![0, 4, 6]);
    }

    #[test]
    fn test_serializes_phases_in_order() {
        let timings = vector(&[(Phase::SocketOpen, 0), (Phase::DnsLookup, 1)]);
        let json = serde_json::to_string(&timings).unwrap();
        assert_eq!(json, r#"{"socketOpen":[0,0],"dnsLookup":[0,1000000]}"#);
    }

    #[test]
    fn test_timestamps_from_instants_are_monotonic() {
        mark_epoch();
        let first = Timestamp::now();
        let second = Timestamp::now();
        assert!(duration(first, second).is_ok());
    }
}
