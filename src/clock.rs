use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default V30MZ timing: 3.072 MHz master clock, 256 cycles per line,
/// 159 lines per frame (~75.47 Hz).
pub const DEFAULT_CLOCK_HZ: u32 = 3_072_000;
pub const DEFAULT_CYCLES_PER_LINE: u32 = 256;
pub const DEFAULT_LINES_PER_FRAME: u32 = 159;

/// Devices that advance with emulated time.
pub trait Tickable {
    fn tick(&mut self, cycles: u32);
}

/// Event types reported by [`Clock::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    LineStart(u32),
    FrameEnd,
    /// A one-shot event registered with [`Clock::schedule_in`].
    Scheduled(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub clock_hz: u32,
    pub cycles_per_line: u32,
    pub lines_per_frame: u32,
}

impl Timing {
    pub fn cycles_per_frame(&self) -> u64 {
        self.cycles_per_line as u64 * self.lines_per_frame as u64
    }

    pub fn frame_rate(&self) -> f64 {
        self.clock_hz as f64 / self.cycles_per_frame() as f64
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            clock_hz: DEFAULT_CLOCK_HZ,
            cycles_per_line: DEFAULT_CYCLES_PER_LINE,
            lines_per_frame: DEFAULT_LINES_PER_FRAME,
        }
    }
}

#[derive(Debug)]
struct ScheduledEvent {
    cycle: u64,
    id: u32,
}

/// Deterministic master clock. The machine asks it for the size of the next
/// CPU slice, runs the CPU for that budget and feeds back the cycles actually
/// consumed.
#[derive(Debug)]
pub struct Clock {
    timing: Timing,

    /// Upper bound for a single CPU slice
    slice_cycles: u32,

    total_cycles: u64,
    current_line: u32,
    line_cycle: u32,
    frame_count: u64,

    /// Pending one-shot events, ordered by cycle
    events: VecDeque<ScheduledEvent>,
}

impl Clock {
    pub fn new() -> Self {
        Self::with_timing(Timing::default())
    }

    pub fn with_timing(timing: Timing) -> Self {
        Self {
            timing: Timing {
                cycles_per_line: timing.cycles_per_line.max(1),
                lines_per_frame: timing.lines_per_frame.max(1),
                ..timing
            },
            slice_cycles: timing.cycles_per_line.max(1),
            total_cycles: 0,
            current_line: 0,
            line_cycle: 0,
            frame_count: 0,
            events: VecDeque::new(),
        }
    }

    pub fn set_slice_cycles(&mut self, cycles: u32) {
        self.slice_cycles = cycles.max(1);
    }

    pub fn slice_cycles(&self) -> u32 {
        self.slice_cycles
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Reset the clock to initial state. Scheduled events are dropped.
    pub fn reset(&mut self) {
        self.total_cycles = 0;
        self.current_line = 0;
        self.line_cycle = 0;
        self.frame_count = 0;
        self.events.clear();
    }

    /// Registers a one-shot event `cycles` from now.
    pub fn schedule_in(&mut self, cycles: u32, id: u32) {
        let cycle = self.total_cycles + cycles as u64;
        let index = self
            .events
            .iter()
            .position(|e| e.cycle > cycle)
            .unwrap_or(self.events.len());
        self.events.insert(index, ScheduledEvent { cycle, id });
    }

    /// Budget for the next CPU slice: never crosses a line boundary or a
    /// scheduled event.
    pub fn next_slice(&self) -> u32 {
        let mut slice = self
            .slice_cycles
            .min(self.timing.cycles_per_line - self.line_cycle);
        if let Some(event) = self.events.front() {
            let until = event.cycle.saturating_sub(self.total_cycles);
            slice = slice.min(until.min(u32::MAX as u64) as u32);
        }
        slice.max(1)
    }

    /// Advance the clock by the specified number of CPU cycles
    pub fn tick(&mut self, cycles: u32) -> Vec<ClockEvent> {
        let mut triggered = Vec::new();
        self.total_cycles += cycles as u64;

        let mut remaining = cycles;
        while remaining > 0 {
            let to_line_end = self.timing.cycles_per_line - self.line_cycle;
            if remaining < to_line_end {
                self.line_cycle += remaining;
                break;
            }
            remaining -= to_line_end;
            self.line_cycle = 0;
            self.current_line += 1;

            if self.current_line >= self.timing.lines_per_frame {
                self.current_line = 0;
                self.frame_count += 1;
                tracing::trace!(
                    "[CLK] Frame {} completed at cycle {}",
                    self.frame_count,
                    self.total_cycles
                );
                triggered.push(ClockEvent::FrameEnd);
            }
            triggered.push(ClockEvent::LineStart(self.current_line));
        }

        while let Some(event) = self.events.front() {
            if event.cycle > self.total_cycles {
                break;
            }
            if let Some(scheduled) = self.events.pop_front() {
                triggered.push(ClockEvent::Scheduled(scheduled.id));
            }
        }

        triggered
    }

    pub fn cycles_until_frame_end(&self) -> u64 {
        self.timing.cycles_per_frame() - self.cycles_in_frame()
    }

    fn cycles_in_frame(&self) -> u64 {
        self.current_line as u64 * self.timing.cycles_per_line as u64 + self.line_cycle as u64
    }

    /// Get progress through current frame (0.0 - 1.0)
    pub fn frame_progress(&self) -> f64 {
        self.cycles_in_frame() as f64 / self.timing.cycles_per_frame() as f64
    }

    pub fn current_line(&self) -> u32 {
        self.current_line
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
