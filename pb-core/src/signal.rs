use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

/// A one-shot broadcast latch carrying a single boolean outcome.
///
/// Any number of producers may call [`set`](ReadySignal::set); only the
/// first call wins.  Any number of consumers may [`wait`](ReadySignal::wait)
/// and all of them observe the same value.  A signal constructed with
/// [`with_timeout`](ReadySignal::with_timeout) is guaranteed to resolve by
/// its deadline (with `false` if nothing resolved it earlier), so nothing
/// parked on it can hang forever.
#[derive(Clone, Debug)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<Option<bool>>>,
}

impl ReadySignal {
    pub fn new() -> ReadySignal {
        let (tx, _) = watch::channel(None);
        ReadySignal { tx: Arc::new(tx) }
    }

    pub fn with_timeout(timeout: Duration) -> ReadySignal {
        let signal = ReadySignal::new();
        let timer = signal.clone();
        tokio::spawn(async move {
            sleep(timeout).await;
            timer.set(false);
        });
        signal
    }

    /// Publish `outcome` if the signal is unresolved; otherwise a silent
    /// no-op.  Never blocks.
    pub fn set(&self, outcome: bool) {
        self.tx.send_if_modified(|value| match value {
            None => {
                *value = Some(outcome);
                true
            },
            Some(_) => false,
        });
    }

    /// Block until resolved and return the outcome.
    pub async fn wait(&self) -> bool {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(outcome) = *rx.borrow_and_update() {
                return outcome;
            }

            // The sender can't be dropped while `self` holds it, so this
            // only fails if the whole signal went away mid-wait
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Non-blocking peek at the outcome.
    pub fn resolved(&self) -> Option<bool> {
        *self.tx.borrow()
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        ReadySignal::new()
    }
}

/// Await every input and resolve `output` with the logical AND.  Runs as a
/// background task so the caller can move on immediately.
pub fn combine(inputs: Vec<ReadySignal>, output: ReadySignal) {
    tokio::spawn(async move {
        let mut all = true;
        for input in &inputs {
            all &= input.wait().await;
        }
        output.set(all);
    });
}
