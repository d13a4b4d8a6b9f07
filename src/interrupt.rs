//! Interrupt lines, latching and arbitration.
//!
//! Every source declares at registration whether it is edge or level
//! triggered. Nothing is inferred from how a device happens to drive its line:
//!
//! - **Edge**: a low-to-high transition latches a request. The latch stays set
//!   until the request is acknowledged, even if the line drops again. Holding
//!   the line high does not re-trigger.
//! - **Level**: the request is pending exactly while the line is held high.
//!   Acknowledging does not clear it; the device must drop the line (normally
//!   when its handler touches a status register).
//!
//! Non-maskable sources bypass the mask register and the CPU's IE flag.
//! Among maskable sources the lowest line number has the highest priority.

use std::{cell::RefCell, fmt, rc::Rc};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    Edge,
    Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptClass {
    Maskable,
    NonMaskable,
}

/// Vector used for non-maskable interrupts on x86-family cores.
pub const NMI_VECTOR: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptSource {
    pub name: String,
    pub vector: u8,
    pub class: InterruptClass,
    pub trigger: Trigger,
    asserted: bool,
    latched: bool,
}

impl InterruptSource {
    pub fn new(name: &str, vector: u8, class: InterruptClass, trigger: Trigger) -> Self {
        Self {
            name: name.to_string(),
            vector,
            class,
            trigger,
            asserted: false,
            latched: false,
        }
    }

    pub fn maskable(name: &str, vector: u8, trigger: Trigger) -> Self {
        Self::new(name, vector, InterruptClass::Maskable, trigger)
    }

    pub fn nmi(name: &str, trigger: Trigger) -> Self {
        Self::new(name, NMI_VECTOR, InterruptClass::NonMaskable, trigger)
    }

    pub fn asserted(&self) -> bool {
        self.asserted
    }

    pub fn is_pending(&self) -> bool {
        match self.trigger {
            Trigger::Edge => self.latched,
            Trigger::Level => self.asserted,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InterruptController {
    sources: Vec<InterruptSource>,
    /// Bit n set masks maskable line n.
    mask: u32,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn register(&mut self, source: InterruptSource) -> LineId {
        tracing::debug!(
            "[IRQ] Line {} '{}' vector {:02X} {:?} {:?}",
            self.sources.len(),
            source.name,
            source.vector,
            source.class,
            source.trigger
        );
        self.sources.push(source);
        LineId(self.sources.len() - 1)
    }

    pub fn source(&self, line: LineId) -> Option<&InterruptSource> {
        self.sources.get(line.0)
    }

    pub fn sources(&self) -> &[InterruptSource] {
        &self.sources
    }

    pub fn assert_line(&mut self, line: LineId, level: bool) {
        let Some(source) = self.sources.get_mut(line.0) else {
            tracing::warn!("[IRQ] Assert on unknown line {}", line.0);
            return;
        };

        let rising = level && !source.asserted;
        source.asserted = level;
        if source.trigger == Trigger::Edge && rising {
            source.latched = true;
        }
        tracing::trace!(
            "[IRQ] {} line {} -> {} (pending {})",
            source.name,
            line.0,
            level,
            source.is_pending()
        );
    }

    pub fn set_mask(&mut self, bits: u32) {
        self.mask = bits;
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    fn masked(&self, line: usize) -> bool {
        line < 32 && self.mask & (1 << line) != 0
    }

    pub fn nmi_pending(&self) -> bool {
        self.sources
            .iter()
            .any(|s| s.class == InterruptClass::NonMaskable && s.is_pending())
    }

    /// Highest priority maskable line that is pending and not masked.
    pub fn pending(&self) -> Option<LineId> {
        self.sources
            .iter()
            .enumerate()
            .find(|(i, s)| {
                s.class == InterruptClass::Maskable && s.is_pending() && !self.masked(*i)
            })
            .map(|(i, _)| LineId(i))
    }

    pub fn irq_pending(&self) -> bool {
        self.pending().is_some()
    }

    /// Consumes a pending NMI, returning its vector.
    pub fn take_nmi(&mut self) -> Option<u8> {
        let source = self
            .sources
            .iter_mut()
            .find(|s| s.class == InterruptClass::NonMaskable && s.is_pending())?;
        if source.trigger == Trigger::Edge {
            source.latched = false;
        }
        tracing::debug!("[IRQ] NMI acknowledged from {}", source.name);
        Some(source.vector)
    }

    /// Acknowledges the highest priority maskable request and returns its vector.
    /// Edge latches clear here; level requests stay pending while asserted.
    pub fn acknowledge(&mut self) -> Option<u8> {
        let line = self.pending()?;
        let source = &mut self.sources[line.0];
        if source.trigger == Trigger::Edge {
            source.latched = false;
        }
        tracing::debug!(
            "[IRQ] Acknowledged {} (line {}) vector {:02X}",
            source.name,
            line.0,
            source.vector
        );
        Some(source.vector)
    }

    /// Drops all latches and asserted levels and unmasks every line.
    /// Registered sources are kept.
    pub fn reset(&mut self) {
        for source in &mut self.sources {
            source.asserted = false;
            source.latched = false;
        }
        self.mask = 0;
    }
}

impl fmt::Display for InterruptController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.sources.iter().enumerate() {
            writeln!(
                f,
                "{:>2} {:<12} vec {:02X} {:?}/{:?} asserted={} pending={} masked={}",
                i,
                s.name,
                s.vector,
                s.class,
                s.trigger,
                s.asserted,
                s.is_pending(),
                self.masked(i)
            )?;
        }
        Ok(())
    }
}

/// A device's handle on its interrupt output.
#[derive(Debug, Clone)]
pub struct IrqLine {
    controller: Rc<RefCell<InterruptController>>,
    line: LineId,
}

impl IrqLine {
    pub fn new(controller: Rc<RefCell<InterruptController>>, line: LineId) -> Self {
        Self { controller, line }
    }

    pub fn line(&self) -> LineId {
        self.line
    }

    pub fn set(&self, level: bool) {
        self.controller.borrow_mut().assert_line(self.line, level);
    }

    pub fn raise(&self) {
        self.set(true);
    }

    pub fn lower(&self) {
        self.set(false);
    }

    /// Drives a full high-low pulse, for wiring a source as a single event.
    pub fn pulse(&self) {
        self.set(true);
        self.set(false);
    }
}
