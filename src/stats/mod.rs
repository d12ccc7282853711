//! Connection statistics.
//!
//! [`StatsSampler`] runs a 1 s interval task once a session exists. The task
//! only posts [`SessionEvent::StatsTick`]; the orchestrator performs the
//! metrics query on its own loop and hands the result back through
//! [`StatsSampler::record`], so history is only ever mutated from the
//! session loop.

pub mod ring_buffer;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::constants::{HISTORY_CAPACITY, STATS_INTERVAL};
use crate::engine::{EngineError, StatsEntry, StatsReport};
use crate::orchestrator::events::SessionEvent;
pub use ring_buffer::RingBuffer;

/// One metrics sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSample {
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Cumulative bytes received over all inbound legs.
    pub bytes_received: u64,
    /// Cumulative bytes sent over all outbound legs.
    pub bytes_sent: u64,
    /// Round-trip time of the first succeeded candidate pair.
    pub rtt_millis: Option<u64>,
}

/// Reduce an engine report to a sample.
///
/// Byte counters are summed across every leg; RTT comes from the first
/// succeeded candidate pair only.
pub fn summarize(report: &StatsReport, timestamp: DateTime<Utc>) -> StatsSample {
    let mut bytes_received = 0u64;
    let mut bytes_sent = 0u64;
    let mut rtt_millis = None;

    for entry in &report.entries {
        match entry {
            StatsEntry::Inbound { bytes_received: n } => bytes_received += n,
            StatsEntry::Outbound { bytes_sent: n } => bytes_sent += n,
            StatsEntry::CandidatePair {
                succeeded: true,
                current_round_trip_time,
            } if rtt_millis.is_none() => {
                rtt_millis = current_round_trip_time.map(|secs| (secs * 1000.0).round() as u64);
            }
            StatsEntry::CandidatePair { .. } => {}
        }
    }

    StatsSample {
        timestamp,
        bytes_received,
        bytes_sent,
        rtt_millis,
    }
}

/// Four parallel series evicted in lockstep.
#[derive(Debug, Clone)]
pub struct StatsHistory {
    timestamps: RingBuffer<DateTime<Utc>>,
    bytes_received: RingBuffer<u64>,
    bytes_sent: RingBuffer<u64>,
    rtt: RingBuffer<Option<u64>>,
}

impl Default for StatsHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl StatsHistory {
    /// History with `capacity` entries per series.
    pub fn new(capacity: usize) -> Self {
        Self {
            timestamps: RingBuffer::new(capacity),
            bytes_received: RingBuffer::new(capacity),
            bytes_sent: RingBuffer::new(capacity),
            rtt: RingBuffer::new(capacity),
        }
    }

    /// Append one sample to every series.
    pub fn push(&mut self, sample: StatsSample) {
        self.timestamps.push(sample.timestamp);
        self.bytes_received.push(sample.bytes_received);
        self.bytes_sent.push(sample.bytes_sent);
        self.rtt.push(sample.rtt_millis);
    }

    /// Number of samples held (identical for every series).
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True if no sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Sample at `index`, oldest first, reassembled across the series.
    pub fn get(&self, index: usize) -> Option<StatsSample> {
        Some(StatsSample {
            timestamp: *self.timestamps.get(index)?,
            bytes_received: *self.bytes_received.get(index)?,
            bytes_sent: *self.bytes_sent.get(index)?,
            rtt_millis: *self.rtt.get(index)?,
        })
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<StatsSample> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// Timestamp series.
    pub fn timestamps(&self) -> &RingBuffer<DateTime<Utc>> {
        &self.timestamps
    }

    /// Bytes-received series.
    pub fn bytes_received(&self) -> &RingBuffer<u64> {
        &self.bytes_received
    }

    /// Bytes-sent series.
    pub fn bytes_sent(&self) -> &RingBuffer<u64> {
        &self.bytes_sent
    }

    /// RTT series.
    pub fn rtt(&self) -> &RingBuffer<Option<u64>> {
        &self.rtt
    }

    /// Drop all samples.
    pub fn clear(&mut self) {
        self.timestamps.clear();
        self.bytes_received.clear();
        self.bytes_sent.clear();
        self.rtt.clear();
    }
}

/// Periodic metrics poller.
#[derive(Debug, Default)]
pub struct StatsSampler {
    timer: Option<JoinHandle<()>>,
    history: StatsHistory,
}

impl Drop for StatsSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl StatsSampler {
    /// Start ticking for the session of `epoch`. Restarts a running timer.
    pub fn start(&mut self, epoch: u64, events: mpsc::UnboundedSender<SessionEvent>) {
        self.stop();
        self.timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if events.send(SessionEvent::StatsTick { epoch }).is_err() {
                    break;
                }
            }
        }));
        log::debug!("[Stats] Sampler started");
    }

    /// Stop the timer. History is kept for display.
    pub fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
            log::debug!("[Stats] Sampler stopped");
        }
    }

    /// True while the timer runs.
    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Record the outcome of one metrics query.
    ///
    /// Failures never stop the timer; they are logged only when `verbose`.
    pub fn record(&mut self, result: Result<StatsReport, EngineError>, verbose: bool) {
        match result {
            Ok(report) => self.history.push(summarize(&report, Utc::now())),
            Err(e) => {
                if verbose {
                    log::debug!("[Stats] Metrics query failed: {e}");
                }
            }
        }
    }

    /// Collected history.
    pub fn history(&self) -> &StatsHistory {
        &self.history
    }
}

/// Per-session byte and message counters for everything sent or received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCounters {
    /// Bytes sent over signaling and channels.
    pub bytes_sent: u64,
    /// Bytes received over signaling and channels.
    pub bytes_received: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Messages received.
    pub messages_received: u64,
}

impl TrafficCounters {
    /// Count one outbound message.
    pub fn sent(&mut self, size: usize) {
        self.bytes_sent += size as u64;
        self.messages_sent += 1;
    }

    /// Count one inbound message.
    pub fn received(&mut self, size: usize) {
        self.bytes_received += size as u64;
        self.messages_received += 1;
    }
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(rx: &[u64], tx: &[u64], pairs: &[(bool, Option<f64>)]) -> StatsReport {
        let mut entries = Vec::new();
        entries.extend(rx.iter().map(|&n| StatsEntry::Inbound { bytes_received: n }));
        entries.extend(tx.iter().map(|&n| StatsEntry::Outbound { bytes_sent: n }));
        entries.extend(pairs.iter().map(|&(succeeded, rtt)| StatsEntry::CandidatePair {
            succeeded,
            current_round_trip_time: rtt,
        }));
        StatsReport { entries }
    }

    fn sample(i: u64) -> StatsSample {
        StatsSample {
            timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
            bytes_received: i * 10,
            bytes_sent: i * 20,
            rtt_millis: Some(i),
        }
    }

    #[test]
    fn test_summarize_sums_legs() {
        let s = summarize(&report(&[100, 50], &[7, 3, 1], &[]), Utc::now());
        assert_eq!(s.bytes_received, 150);
        assert_eq!(s.bytes_sent, 11);
        assert_eq!(s.rtt_millis, None);
    }

    #[test]
    fn test_summarize_uses_first_succeeded_pair() {
        let pairs = [(false, Some(0.5)), (true, Some(0.0234)), (true, Some(0.9))];
        let s = summarize(&report(&[], &[], &pairs), Utc::now());
        assert_eq!(s.rtt_millis, Some(23));
    }

    #[test]
    fn test_history_evicts_in_lockstep() {
        let mut history = StatsHistory::default();
        for i in 0..25 {
            history.push(sample(i));
        }

        assert_eq!(history.len(), 20);
        assert_eq!(history.timestamps().len(), 20);
        assert_eq!(history.bytes_received().len(), 20);
        assert_eq!(history.bytes_sent().len(), 20);
        assert_eq!(history.rtt().len(), 20);

        // Oldest five (0..5) evicted, indices still aligned
        for index in 0..20 {
            assert_eq!(history.get(index), Some(sample(index as u64 + 5)));
        }
        assert_eq!(history.latest(), Some(sample(24)));
    }

    #[test]
    fn test_record_failure_keeps_history() {
        let mut sampler = StatsSampler::default();
        sampler.record(Ok(report(&[1], &[2], &[])), false);
        sampler.record(Err(EngineError::Closed), true);
        assert_eq!(sampler.history().len(), 1);
        assert_eq!(sampler.history().latest().map(|s| s.bytes_sent), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_ticks_with_epoch_until_stopped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sampler = StatsSampler::default();
        sampler.start(3, tx);
        assert!(sampler.is_running());

        tokio::time::sleep(STATS_INTERVAL * 2 + std::time::Duration::from_millis(10)).await;
        let mut ticks = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, SessionEvent::StatsTick { epoch: 3 }));
            ticks += 1;
        }
        assert_eq!(ticks, 2);

        sampler.stop();
        assert!(!sampler.is_running());
    }

    #[test]
    fn test_traffic_counters() {
        let mut counters = TrafficCounters::default();
        counters.sent(10);
        counters.sent(5);
        counters.received(3);
        assert_eq!(counters.bytes_sent, 15);
        assert_eq!(counters.messages_sent, 2);
        assert_eq!(counters.messages_received, 1);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }
}
