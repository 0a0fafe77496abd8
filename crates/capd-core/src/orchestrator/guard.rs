/// Coalescing re-entry guard for a periodic cycle.
///
/// A trigger that arrives while the cycle is running sets a single pending
/// flag; however many arrive, the cycle is replayed at most once.
#[derive(Debug, Default)]
pub struct ReentryGuard {
    running: bool,
    pending: bool,
}

impl ReentryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a run. Returns false (and records a pending replay) if one is
    /// already in flight.
    pub fn try_enter(&mut self) -> bool {
        if self.running {
            self.pending = true;
            return false;
        }
        self.running = true;
        true
    }

    /// End a run. Returns true if a replay is owed; the guard then stays
    /// held and the caller must run the cycle again.
    pub fn exit(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            return true;
        }
        self.running = false;
        false
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}
