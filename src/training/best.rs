//! Best-state holder
//!
//! Holds exactly one snapshot at a time. It starts with the initial state at
//! accuracy 0.0 and is replaced only when a Testing pass is strictly better.

/// The best snapshot seen so far
#[derive(Debug, Clone)]
pub struct BestState<S> {
    state: S,
    accuracy: f64,
    epoch: Option<usize>,
}

impl<S> BestState<S> {
    /// Seed the holder with the initial state
    pub fn new(initial: S) -> Self {
        Self {
            state: initial,
            accuracy: 0.0,
            epoch: None,
        }
    }

    /// Replace the snapshot if `accuracy` is strictly greater than the best so
    /// far. `snapshot` is only called on improvement.
    pub fn offer<F>(&mut self, epoch: usize, accuracy: f64, snapshot: F) -> bool
    where
        F: FnOnce() -> S,
    {
        if accuracy > self.accuracy {
            self.state = snapshot();
            self.accuracy = accuracy;
            self.epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    /// Epoch of the held snapshot; `None` while it is still the initial state
    pub fn epoch(&self) -> Option<usize> {
        self.epoch
    }

    pub fn into_state(self) -> S {
        self.state
    }
}
