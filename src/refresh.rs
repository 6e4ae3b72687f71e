//! Refresh Throttling
//!
//! Heavy per-module work (rebuilding lookup tables, exchanging expander
//! messages, updating display state) only needs to follow slowly changing
//! control state, so it runs on a fraction of audio frames. The cheap
//! per-sample path keeps running at full rate.

/// Frames between two display/lights refreshes
pub const DISPLAY_REFRESH_STEP_SKIPS: u32 = 256;

/// Input refresh runs when `counter & mask == 0`, i.e. every 16 frames
pub const USER_INPUTS_STEP_SKIP_MASK: u32 = 0xF;

/// Frames between two message exchanges of a CV expander
pub const EXPANDER_REFRESH_STEP_SKIPS: u32 = 4;

/// Two-rate refresh counter shared by the chord modules
///
/// Call [`process_inputs`](Self::process_inputs) as often as needed in a
/// frame; it does not advance the counter. Call
/// [`process_lights`](Self::process_lights) exactly once per frame, which
/// advances it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshCounter {
    counter: u32,
}

impl RefreshCounter {
    /// Create a counter with a random phase so modules added together do
    /// not all refresh on the same frame
    #[cfg(feature = "random-phase")]
    pub fn new() -> Self {
        Self::with_phase(rand::random::<u32>())
    }

    /// Without `random-phase` every counter starts at phase 0
    #[cfg(not(feature = "random-phase"))]
    pub fn new() -> Self {
        Self::with_phase(0)
    }

    /// Create a counter starting at a fixed phase
    pub fn with_phase(phase: u32) -> Self {
        Self {
            counter: phase % DISPLAY_REFRESH_STEP_SKIPS,
        }
    }

    /// Whether this frame should read inputs and exchange messages
    #[inline]
    pub fn process_inputs(&self) -> bool {
        self.counter & USER_INPUTS_STEP_SKIP_MASK == 0
    }

    /// Advance one frame; true once every [`DISPLAY_REFRESH_STEP_SKIPS`]
    #[inline]
    pub fn process_lights(&mut self) -> bool {
        self.counter += 1;
        let process = self.counter >= DISPLAY_REFRESH_STEP_SKIPS;
        if process {
            self.counter = 0;
        }
        process
    }

    pub fn phase(&self) -> u32 {
        self.counter
    }
}

impl Default for RefreshCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Fires once every `period` calls to [`tick`](Self::tick)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    counter: u32,
    period: u32,
}

impl Throttle {
    pub fn new(period: u32) -> Self {
        Self {
            counter: 0,
            period: period.max(1),
        }
    }

    #[inline]
    pub fn tick(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.period {
            self.counter = 0;
            true
        } else {
            false
        }
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}
