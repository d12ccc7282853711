//! Remote ICE candidates that arrived before a remote description.
//!
//! Candidates are kept in arrival order. A flush applies each one once; a
//! candidate the engine rejects goes back into the buffer for the next
//! flush, up to [`MAX_ICE_ATTEMPTS`] failed attempts, after which it is
//! dropped and reported in [`FlushReport::abandoned`].

// Rust guideline compliant 2026-02

use crate::constants::MAX_ICE_ATTEMPTS;
use crate::engine::{IceCandidateInit, PeerTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
struct BufferedCandidate {
    candidate: IceCandidateInit,
    attempts: u32,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Candidates the engine accepted.
    pub applied: usize,
    /// Candidates kept for the next flush.
    pub retained: usize,
    /// Candidates dropped after the last allowed attempt.
    pub abandoned: Vec<IceCandidateInit>,
}

/// Ordered candidate buffer with bounded retries.
#[derive(Debug)]
pub struct IceCandidateBuffer {
    items: Vec<BufferedCandidate>,
    max_attempts: u32,
}

impl Default for IceCandidateBuffer {
    fn default() -> Self {
        Self::new(MAX_ICE_ATTEMPTS)
    }
}

impl IceCandidateBuffer {
    /// Buffer allowing `max_attempts` failed applications per candidate.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            items: Vec::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Append a candidate.
    pub fn push(&mut self, candidate: IceCandidateInit) {
        self.items.push(BufferedCandidate {
            candidate,
            attempts: 0,
        });
    }

    /// Keep a candidate whose first application already failed.
    ///
    /// Returns `false` when no attempts are left and it was dropped.
    pub fn push_rejected(&mut self, candidate: IceCandidateInit) -> bool {
        if self.max_attempts <= 1 {
            return false;
        }
        self.items.push(BufferedCandidate {
            candidate,
            attempts: 1,
        });
        true
    }

    /// Apply every buffered candidate once, in order.
    pub async fn flush(&mut self, engine: &dyn PeerTransport) -> FlushReport {
        let mut report = FlushReport::default();
        if self.items.is_empty() {
            return report;
        }

        log::debug!("[ICE] Flushing {} buffered candidates", self.items.len());
        for mut item in std::mem::take(&mut self.items) {
            match engine.add_ice_candidate(&item.candidate).await {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    item.attempts += 1;
                    if item.attempts >= self.max_attempts {
                        log::error!(
                            "[ICE] Giving up on candidate after {} attempts: {e} ({})",
                            item.attempts,
                            item.candidate.candidate
                        );
                        report.abandoned.push(item.candidate);
                    } else {
                        log::warn!(
                            "[ICE] Candidate rejected (attempt {}/{}), keeping for next flush: {e}",
                            item.attempts,
                            self.max_attempts
                        );
                        self.items.push(item);
                    }
                }
            }
        }
        report.retained = self.items.len();
        report
    }

    /// Number of buffered candidates.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn candidate(n: u32) -> IceCandidateInit {
        IceCandidateInit {
            candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }

    #[tokio::test]
    async fn test_flush_applies_in_arrival_order_exactly_once() {
        let engine = MockTransport::default();
        let mut buffer = IceCandidateBuffer::default();
        for n in 1..=5 {
            buffer.push(candidate(n));
        }

        let report = buffer.flush(&engine).await;

        assert_eq!(report.applied, 5);
        assert!(buffer.is_empty());
        let expected: Vec<String> = (1..=5).map(|n| candidate(n).candidate).collect();
        assert_eq!(engine.applied_candidates(), expected);

        // A second flush is a no-op
        assert_eq!(buffer.flush(&engine).await, FlushReport::default());
        assert_eq!(engine.applied_candidates().len(), 5);
    }

    #[tokio::test]
    async fn test_failed_candidate_is_retried_on_next_flush_only() {
        let engine = MockTransport::default();
        engine.fail_candidate(&candidate(2).candidate, 1);
        let mut buffer = IceCandidateBuffer::default();
        buffer.push(candidate(1));
        buffer.push(candidate(2));
        buffer.push(candidate(3));

        let first = buffer.flush(&engine).await;
        assert_eq!(first.applied, 2);
        assert_eq!(first.retained, 1);
        assert_eq!(buffer.len(), 1);

        let second = buffer.flush(&engine).await;
        assert_eq!(second.applied, 1);
        assert!(buffer.is_empty());
        assert_eq!(
            engine.applied_candidates(),
            vec![candidate(1).candidate, candidate(3).candidate, candidate(2).candidate]
        );
    }

    #[tokio::test]
    async fn test_candidate_abandoned_after_max_attempts() {
        let engine = MockTransport::default();
        engine.fail_candidate(&candidate(9).candidate, u32::MAX);
        let mut buffer = IceCandidateBuffer::new(3);
        buffer.push(candidate(9));

        assert_eq!(buffer.flush(&engine).await.retained, 1);
        assert_eq!(buffer.flush(&engine).await.retained, 1);
        let last = buffer.flush(&engine).await;
        assert_eq!(last.retained, 0);
        assert_eq!(last.abandoned, vec![candidate(9)]);
        assert!(buffer.is_empty());
        assert!(engine.applied_candidates().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_candidate_counts_its_first_attempt() {
        let engine = MockTransport::default();
        engine.fail_candidate(&candidate(4).candidate, u32::MAX);
        let mut buffer = IceCandidateBuffer::new(3);
        assert!(buffer.push_rejected(candidate(4)));

        assert_eq!(buffer.flush(&engine).await.retained, 1);
        assert_eq!(buffer.flush(&engine).await.abandoned, vec![candidate(4)]);

        let mut single = IceCandidateBuffer::new(1);
        assert!(!single.push_rejected(candidate(4)));
        assert!(single.is_empty());
    }
}
