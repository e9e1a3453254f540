// Download progress and retry bookkeeping

/// Bytes landed in storage for the current download. Monotonically
/// non-decreasing within one download; reset when the next download
/// starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    pub bytes_written: u64,
    pub total_size: u64,
    pub percentage: u8,
}

impl TransferProgress {
    pub fn start(total_size: u64) -> Self {
        Self {
            bytes_written: 0,
            total_size,
            percentage: 0,
        }
    }

    /// Accounts for newly written bytes. Duplicate chunks must not be
    /// recorded; the caller tracks which payloads have landed.
    pub fn record(&mut self, bytes: u64) {
        self.bytes_written += bytes;
        if self.total_size > 0 {
            self.percentage = ((self.bytes_written * 100) / self.total_size).min(100) as u8;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total_size > 0 && self.bytes_written >= self.total_size
    }
}

/// Per-cycle attempt counts, each bounded by the corresponding
/// `TimingPolicy` limit. Connect and download counts reset when a new
/// check cycle starts; the session count persists across failed cycles
/// and clears only on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttemptCounters {
    pub connect: u32,
    pub download: u32,
    pub session: u32,
}

impl AttemptCounters {
    pub fn start_cycle(&mut self) {
        self.connect = 0;
        self.download = 0;
    }

    pub fn record_session_failure(&mut self) {
        self.session += 1;
    }

    pub fn session_succeeded(&mut self) {
        self.session = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotone_and_completes() {
        let mut progress = TransferProgress::start(1000);
        let mut last = 0;
        for _ in 0..10 {
            progress.record(100);
            assert!(progress.bytes_written >= last);
            last = progress.bytes_written;
        }
        assert_eq!(progress.percentage, 100);
        assert!(progress.is_complete());
    }

    #[test]
    fn progress_resets_on_new_download() {
        let mut progress = TransferProgress::start(100);
        progress.record(100);
        progress = TransferProgress::start(500);
        assert_eq!(progress.bytes_written, 0);
        assert_eq!(progress.percentage, 0);
    }

    #[test]
    fn cycle_start_keeps_session_count() {
        let mut counters = AttemptCounters::default();
        counters.connect = 2;
        counters.download = 1;
        counters.record_session_failure();
        counters.start_cycle();
        assert_eq!(counters.connect, 0);
        assert_eq!(counters.download, 0);
        assert_eq!(counters.session, 1);
        counters.session_succeeded();
        assert_eq!(counters.session, 0);
    }
}
