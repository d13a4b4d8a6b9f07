//! Motorola 6850 ACIA as wired on the Ohio Scientific and UK101 boards.
//!
//! Offset 0 is status (read) / control (write), offset 1 is receive data
//! (read) / transmit data (write). The interrupt output is level triggered and
//! follows the status register: it drops once the CPU reads the received byte
//! or disables the interrupt source.
//!
//! There is a single receive data register. A byte arriving while it is still
//! full is lost and sets the overrun flag; the host is expected to pace input
//! with [`Acia6850::can_receive`].

use crate::{address_space::Device, interrupt::IrqLine};

pub const STATUS_RDRF: u8 = 0x01;
pub const STATUS_TDRE: u8 = 0x02;
pub const STATUS_DCD: u8 = 0x04;
pub const STATUS_CTS: u8 = 0x08;
pub const STATUS_OVRN: u8 = 0x20;
pub const STATUS_IRQ: u8 = 0x80;

const CONTROL_MASTER_RESET: u8 = 0x03;
const CONTROL_TX_IRQ: u8 = 0x20;
const CONTROL_RX_IRQ: u8 = 0x80;

#[derive(Debug, Clone)]
pub struct Acia6850 {
    control: u8,
    rx_data: u8,
    rx_full: bool,
    overrun: bool,
    tx_log: Vec<u8>,
    irq: Option<IrqLine>,
}

impl Acia6850 {
    pub fn new() -> Self {
        Self {
            control: CONTROL_MASTER_RESET,
            rx_data: 0,
            rx_full: false,
            overrun: false,
            tx_log: Vec::new(),
            irq: None,
        }
    }

    pub fn with_irq(mut self, irq: IrqLine) -> Self {
        self.irq = Some(irq);
        self
    }

    /// A byte arriving on the serial line.
    pub fn receive(&mut self, byte: u8) {
        if self.in_reset() {
            tracing::trace!("[ACIA] RX {:02X} dropped in reset", byte);
            return;
        }
        if self.rx_full {
            tracing::debug!("[ACIA] Overrun, RX {:02X} lost", byte);
            self.overrun = true;
        } else {
            self.rx_data = byte;
            self.rx_full = true;
        }
        self.update_irq();
    }

    /// Whether the receive data register is free for the next byte.
    pub fn can_receive(&self) -> bool {
        !self.rx_full && !self.in_reset()
    }

    /// Bytes written by the CPU since the last call.
    pub fn take_transmitted(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx_log)
    }

    fn in_reset(&self) -> bool {
        self.control & 0x03 == CONTROL_MASTER_RESET
    }

    fn irq_active(&self) -> bool {
        if self.in_reset() {
            return false;
        }
        let rx = self.control & CONTROL_RX_IRQ != 0 && (self.rx_full || self.overrun);
        let tx = self.control & 0x60 == CONTROL_TX_IRQ;
        rx || tx
    }

    pub fn status(&self) -> u8 {
        let mut status = 0;
        if self.rx_full {
            status |= STATUS_RDRF;
        }
        if !self.in_reset() {
            status |= STATUS_TDRE;
        }
        if self.overrun {
            status |= STATUS_OVRN;
        }
        if self.irq_active() {
            status |= STATUS_IRQ;
        }
        status
    }

    fn update_irq(&self) {
        if let Some(irq) = &self.irq {
            irq.set(self.irq_active());
        }
    }
}

impl Default for Acia6850 {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Acia6850 {
    fn read(&mut self, offset: u32) -> u8 {
        match offset & 1 {
            0 => self.status(),
            _ => {
                let value = self.rx_data;
                self.rx_full = false;
                self.overrun = false;
                self.update_irq();
                value
            }
        }
    }

    fn write(&mut self, offset: u32, value: u8) {
        match offset & 1 {
            0 => {
                self.control = value;
                if self.in_reset() {
                    tracing::debug!("[ACIA] Master reset");
                    self.rx_full = false;
                    self.overrun = false;
                }
            }
            _ => {
                if !self.in_reset() {
                    tracing::trace!("[ACIA] TX {:02X}", value);
                    self.tx_log.push(value);
                }
            }
        }
        self.update_irq();
    }

    fn peek(&self, offset: u32) -> Option<u8> {
        Some(match offset & 1 {
            0 => self.status(),
            _ => self.rx_data,
        })
    }

    fn reset(&mut self) {
        self.control = CONTROL_MASTER_RESET;
        self.rx_full = false;
        self.overrun = false;
        self.update_irq();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::{InterruptController, InterruptSource, Trigger};

    #[test]
    fn test_receive_raises_level_irq_until_read() {
        let pic = InterruptController::shared();
        let line = pic
            .borrow_mut()
            .register(InterruptSource::maskable("acia", 0x0C, Trigger::Level));
        let mut acia = Acia6850::new().with_irq(IrqLine::new(pic.clone(), line));

        // 8N1, /16, receive interrupt enabled
        acia.write(0, 0x95);
        acia.receive(b'A');
        assert_eq!(acia.read(0) & (STATUS_RDRF | STATUS_IRQ), STATUS_RDRF | STATUS_IRQ);
        assert_eq!(pic.borrow_mut().acknowledge(), Some(0x0C));
        assert!(pic.borrow().irq_pending());

        assert_eq!(acia.read(1), b'A');
        assert!(!pic.borrow().irq_pending());
    }

    #[test]
    fn test_transmit_and_receive() {
        let mut acia = Acia6850::new();
        acia.write(1, b'X');
        assert!(acia.take_transmitted().is_empty());

        acia.write(0, 0x15);
        acia.write(1, b'O');
        acia.write(1, b'K');
        assert_eq!(acia.take_transmitted(), b"OK".to_vec());

        assert!(acia.can_receive());
        acia.receive(1);
        assert!(!acia.can_receive());
        assert_eq!(acia.read(1), 1);
        acia.receive(2);
        assert_eq!(acia.read(1), 2);
        assert_eq!(acia.status() & STATUS_RDRF, 0);
    }

    #[test]
    fn test_second_byte_before_read_overruns() {
        let pic = InterruptController::shared();
        let line = pic
            .borrow_mut()
            .register(InterruptSource::maskable("acia", 0x0C, Trigger::Level));
        let mut acia = Acia6850::new().with_irq(IrqLine::new(pic.clone(), line));

        // Receive interrupt on
        acia.write(0, 0x95);
        acia.receive(b'A');
        acia.receive(b'B');
        assert_eq!(
            acia.status() & (STATUS_RDRF | STATUS_OVRN | STATUS_IRQ),
            STATUS_RDRF | STATUS_OVRN | STATUS_IRQ
        );

        // The first byte is kept, the second is lost.
        assert_eq!(acia.read(1), b'A');
        assert_eq!(acia.status() & (STATUS_RDRF | STATUS_OVRN), 0);
        assert!(!pic.borrow().irq_pending());

        // Nothing is received during master reset.
        acia.write(0, 0x03);
        acia.receive(b'C');
        assert_eq!(acia.status() & STATUS_RDRF, 0);
    }
}
