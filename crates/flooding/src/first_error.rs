use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::FloodError;

/// Keeps the first connection error of a run.
///
/// Offering never blocks: once the slot holds an error, further offers are
/// dropped until the stored one is taken.
#[derive(Debug)]
pub struct FirstErrorSlot {
    tx: mpsc::Sender<FloodError>,
    rx: Mutex<mpsc::Receiver<FloodError>>,
}

impl Default for FirstErrorSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FirstErrorSlot {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Returns `true` if `err` was stored.
    pub fn offer(&self, err: FloodError) -> bool {
        self.tx.try_send(err).is_ok()
    }

    pub fn take(&self) -> Option<FloodError> {
        self.rx.lock().try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid(msg: &str) -> FloodError {
        FloodError::InvalidConfig(msg.to_string())
    }

    #[test]
    fn test_keeps_first_error_only() {
        let slot = FirstErrorSlot::new();
        assert!(slot.take().is_none());

        assert!(slot.offer(invalid("first")));
        assert!(!slot.offer(invalid("second")));
        assert!(!slot.offer(invalid("third")));

        let err = slot.take().unwrap();
        assert!(err.to_string().contains("first"));
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_concurrent_offers_store_one() {
        let slot = std::sync::Arc::new(FirstErrorSlot::new());
        let stored: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let slot = &slot;
                    scope.spawn(move || slot.offer(invalid(&format!("worker {i}"))))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });
        assert_eq!(stored, 1);
        assert!(slot.take().is_some());
    }
}
