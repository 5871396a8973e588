//! Face-skip heuristic
//!
//! After several cycles without a face the locator is skipped for a few
//! cycles, then retried. Saves CPU on empty scenes at the cost of reacting a
//! little later when someone walks in.

/// Counts empty cycles and decides whether to run the locator
#[derive(Debug, Clone)]
pub struct FaceSkipGate {
    threshold: u32,
    cooldown: u32,
    counter: u32,
}

impl FaceSkipGate {
    pub fn new(threshold: u32, cooldown: u32) -> Self {
        Self {
            threshold,
            cooldown,
            counter: 0,
        }
    }

    /// Whether this cycle should run the locator.
    ///
    /// Skipped cycles advance the counter; once it passes
    /// `threshold + cooldown` it resets and the next cycle locates again.
    pub fn should_locate(&mut self) -> bool {
        if self.counter < self.threshold {
            return true;
        }
        self.counter += 1;
        if self.counter > self.threshold + self.cooldown {
            self.counter = 0;
        }
        false
    }

    /// Record the result of a locator run
    pub fn record(&mut self, found_faces: bool) {
        if found_faces {
            self.counter = 0;
        } else {
            self.counter += 1;
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locates_until_threshold() {
        let mut gate = FaceSkipGate::new(5, 3);
        for _ in 0..5 {
            assert!(gate.should_locate());
            gate.record(false);
        }
        assert!(!gate.should_locate());
    }

    #[test]
    fn test_skip_window_then_retry() {
        let mut gate = FaceSkipGate::new(5, 3);
        for _ in 0..5 {
            gate.should_locate();
            gate.record(false);
        }
        let skipped = (0..10).take_while(|_| !gate.should_locate()).count();
        assert_eq!(skipped, 4);
        assert_eq!(gate.counter(), 0);
    }

    #[test]
    fn test_face_resets_counter() {
        let mut gate = FaceSkipGate::new(5, 3);
        for _ in 0..4 {
            gate.record(false);
        }
        gate.record(true);
        assert_eq!(gate.counter(), 0);
        assert!(gate.should_locate());
    }
}
