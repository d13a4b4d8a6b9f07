//! Programmable interval timer.
//!
//! | Offset | Register                                       |
//! |--------|------------------------------------------------|
//! | 0      | Reload value, low byte                         |
//! | 1      | Reload value, high byte                        |
//! | 2      | Control: bit 0 enable, bit 1 periodic          |
//! | 3      | Status: bit 0 expired; any write acknowledges  |
//!
//! The interrupt output is a level: it stays high from expiry until the
//! handler acknowledges through the status register.

use crate::{address_space::Device, clock::Tickable, interrupt::IrqLine};

pub const CONTROL_ENABLE: u8 = 0x01;
pub const CONTROL_PERIODIC: u8 = 0x02;
pub const STATUS_EXPIRED: u8 = 0x01;

#[derive(Debug, Clone, Default)]
pub struct IntervalTimer {
    reload: u16,
    counter: u32,
    control: u8,
    expired: bool,
    expirations: u64,
    irq: Option<IrqLine>,
}

impl IntervalTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_irq(mut self, irq: IrqLine) -> Self {
        self.irq = Some(irq);
        self
    }

    pub fn enabled(&self) -> bool {
        self.control & CONTROL_ENABLE != 0 && self.reload != 0
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn expired(&self) -> bool {
        self.expired
    }

    /// Number of times the counter reached zero since reset.
    pub fn expirations(&self) -> u64 {
        self.expirations
    }

    fn expire(&mut self) {
        self.expired = true;
        self.expirations += 1;
        tracing::trace!("[TMR] Expired ({})", self.expirations);
        if let Some(irq) = &self.irq {
            irq.raise();
        }
    }

    fn acknowledge(&mut self) {
        self.expired = false;
        if let Some(irq) = &self.irq {
            irq.lower();
        }
    }
}

impl Tickable for IntervalTimer {
    fn tick(&mut self, cycles: u32) {
        if !self.enabled() {
            return;
        }

        let mut remaining = cycles;
        while remaining >= self.counter {
            remaining -= self.counter;
            self.expire();
            if self.control & CONTROL_PERIODIC != 0 {
                self.counter = self.reload as u32;
            } else {
                self.control &= !CONTROL_ENABLE;
                self.counter = 0;
                return;
            }
        }
        self.counter -= remaining;
    }
}

impl Device for IntervalTimer {
    fn read(&mut self, offset: u32) -> u8 {
        self.peek(offset).unwrap_or(0xFF)
    }

    fn write(&mut self, offset: u32, value: u8) {
        match offset & 3 {
            0 | 1 => {
                self.reload = if offset & 3 == 0 {
                    (self.reload & 0xFF00) | value as u16
                } else {
                    (self.reload & 0x00FF) | ((value as u16) << 8)
                };
                // Enabled before a reload was programmed: start counting now.
                if self.control & CONTROL_ENABLE != 0 && self.counter == 0 {
                    self.counter = self.reload as u32;
                }
            }
            2 => {
                let starting = value & CONTROL_ENABLE != 0 && self.control & CONTROL_ENABLE == 0;
                self.control = value & (CONTROL_ENABLE | CONTROL_PERIODIC);
                if starting {
                    self.counter = self.reload as u32;
                    tracing::debug!(
                        "[TMR] Started, reload {:04X}{}",
                        self.reload,
                        if value & CONTROL_PERIODIC != 0 { " periodic" } else { "" }
                    );
                }
            }
            _ => self.acknowledge(),
        }
    }

    fn peek(&self, offset: u32) -> Option<u8> {
        Some(match offset & 3 {
            0 => self.counter as u8,
            1 => (self.counter >> 8) as u8,
            2 => self.control,
            _ => {
                if self.expired {
                    STATUS_EXPIRED
                } else {
                    0
                }
            }
        })
    }

    fn reset(&mut self) {
        self.reload = 0;
        self.counter = 0;
        self.control = 0;
        self.expirations = 0;
        self.acknowledge();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot() {
        let mut timer = IntervalTimer::new();
        timer.write(0, 100);
        timer.write(2, CONTROL_ENABLE);

        timer.tick(99);
        assert!(!timer.expired());
        timer.tick(1);
        assert!(timer.expired());
        assert!(!timer.enabled());

        timer.tick(1000);
        assert_eq!(timer.expirations(), 1);
    }

    #[test]
    fn test_periodic_counts_every_period() {
        let mut timer = IntervalTimer::new();
        timer.write(0, 10);
        timer.write(2, CONTROL_ENABLE | CONTROL_PERIODIC);

        timer.tick(35);
        assert_eq!(timer.expirations(), 3);
        assert_eq!(timer.counter(), 5);

        timer.write(3, 0);
        assert_eq!(timer.read(3), 0);
    }

    #[test]
    fn test_reload_written_after_enable() {
        let mut timer = IntervalTimer::new();
        timer.write(2, CONTROL_ENABLE | CONTROL_PERIODIC);
        timer.tick(50);
        assert_eq!(timer.expirations(), 0);

        timer.write(0, 20);
        assert_eq!(timer.counter(), 20);
        timer.tick(19);
        assert!(!timer.expired());
        timer.tick(1);
        assert_eq!(timer.expirations(), 1);
        assert_eq!(timer.counter(), 20);
    }
}
