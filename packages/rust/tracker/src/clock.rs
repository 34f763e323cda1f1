//! Process-wide monotonic change counter.

use tabdrome_shared::Serial;

/// Moves forward every time anything observable happens to any tracked tab.
///
/// Removals bump the clock even though no surviving tab carries the new value,
/// so "current serial" is the cheapest possible "has anything changed" check.
#[derive(Debug, Default)]
pub struct SerialClock {
    current: Serial,
}

impl SerialClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently issued serial (0 before anything happened).
    pub fn current(&self) -> Serial {
        self.current
    }

    /// Issue the next serial.
    pub fn bump(&mut self) -> Serial {
        self.current += 1;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_is_strictly_increasing() {
        let mut clock = SerialClock::new();
        assert_eq!(clock.current(), 0);
        let a = clock.bump();
        let b = clock.bump();
        assert!(b > a);
        assert_eq!(clock.current(), b);
    }
}
