// Turn budget and cooperative cancellation for one loop instance.
use tokio::sync::watch;

pub struct LoopController {
    max_turns: u32,
    turns: u32,
}

impl LoopController {
    pub fn new(max_turns: u32) -> Self {
        Self { max_turns, turns: 0 }
    }

    pub fn reset(&mut self) {
        self.turns = 0;
    }

    /// Counts one model round-trip.
    pub fn begin_turn(&mut self) -> u32 {
        self.turns += 1;
        self.turns
    }

    pub fn turns(&self) -> u32 {
        self.turns
    }

    pub fn turn_limit_reached(&self) -> bool {
        self.turns >= self.max_turns
    }
}

/// Single-shot abort signal. Once triggered it stays set until `reset`.
#[derive(Clone)]
pub struct CancelSignal {
    tx: watch::Sender<bool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been triggered.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
