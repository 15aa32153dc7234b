// src/session/timer.rs

/// What a single tick did to the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Clock is stopped; nothing changed.
    Idle,
    /// One second elapsed; carries the new remaining time.
    Running(u32),
    /// Remaining time just hit zero. Reported once per timer.
    TimedOut,
}

/// In-memory countdown bound to one attempt.
///
/// The timer never persists anything and never looks at the wall clock:
/// it is seeded from the stored remaining time and advanced by `tick()`.
#[derive(Debug, Clone, Default)]
pub struct CountdownTimer {
    remaining: u32,
    running: bool,
    fired: bool,
}

impl CountdownTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed and run. A timer that already fired stays fired.
    pub fn start(&mut self, initial: u32) {
        self.remaining = initial;
        self.running = !self.fired;
    }

    pub fn tick(&mut self) -> Tick {
        if !self.running {
            return Tick::Idle;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return Tick::Running(self.remaining);
        }

        self.running = false;
        if self.fired {
            Tick::Idle
        } else {
            self.fired = true;
            Tick::TimedOut
        }
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}
