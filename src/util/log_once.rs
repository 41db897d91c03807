//! Latch for rate-limiting repeated log messages.

/// Fires once until reset.
///
/// Used for conditions that persist across ticks (a missing directory, an
/// unparsable entry name) so they are reported when they start and when
/// they clear, not on every pass.
#[derive(Debug, Default, Clone)]
pub struct LogOnce {
    fired: bool,
}

impl LogOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time it is called after construction or reset.
    pub fn trigger(&mut self) -> bool {
        !std::mem::replace(&mut self.fired, true)
    }

    /// Re-arms the latch. Returns `true` if it had fired.
    pub fn reset(&mut self) -> bool {
        std::mem::replace(&mut self.fired, false)
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triggers_once_until_reset() {
        let mut latch = LogOnce::new();
        assert!(latch.trigger());
        assert!(!latch.trigger());
        assert!(latch.has_fired());

        assert!(latch.reset());
        assert!(!latch.reset());
        assert!(latch.trigger());
    }
}
