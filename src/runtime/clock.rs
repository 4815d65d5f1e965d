// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::time::Instant;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Monotonic clock anchored at runtime creation. All trace timestamps and sleep deadlines are
/// expressed as offsets from this anchor, so traces from different runs start near zero.
pub struct Clock {
    /// Anchor instant.
    epoch: Instant,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Clock
impl Clock {
    /// Starts a new clock anchored at the current instant.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Microseconds elapsed since the anchor.
    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Milliseconds elapsed since the anchor.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::Clock;
    use ::anyhow::Result;

    /// Tests that readings never move backwards.
    #[test]
    fn clock_is_monotonic() -> Result<()> {
        let clock: Clock = Clock::start();
        let first: u64 = clock.now_us();
        let second: u64 = clock.now_us();
        crate::ensure_eq!(second >= first, true);
        Ok(())
    }

    /// Tests that the millisecond reading tracks the microsecond reading.
    #[test]
    fn milliseconds_track_microseconds() -> Result<()> {
        let clock: Clock = Clock::start();
        let us: u64 = clock.now_us();
        let ms: u64 = clock.now_ms();
        crate::ensure_eq!(ms <= us / 1000 + 1, true);
        Ok(())
    }
}
