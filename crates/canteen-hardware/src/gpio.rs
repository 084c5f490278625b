//! Single GPIO pin on a register bank.

use std::fmt;
use std::ops::Not;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{HardwareError, Result};
use crate::register::{Register, RegisterBlock};

/// Logic level of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "low"),
            Level::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// One bit of a GPIO bank.
///
/// The pin shares the bank with whatever else lives in the same window;
/// only its own bit is ever modified.
pub struct GpioPin {
    regs: Arc<dyn RegisterBlock>,
    bit: u8,
    direction: Mutex<Option<Direction>>,
}

impl GpioPin {
    /// Wrap bit `bit` of `regs` without touching any register.
    pub fn new(regs: Arc<dyn RegisterBlock>, bit: u8) -> Result<Self> {
        if bit > 31 {
            return Err(HardwareError::InvalidPin(bit));
        }
        Ok(Self {
            regs,
            bit,
            direction: Mutex::new(None),
        })
    }

    /// Create the pin and configure it as an input.
    pub fn input(regs: Arc<dyn RegisterBlock>, bit: u8) -> Result<Self> {
        let pin = Self::new(regs, bit)?;
        pin.configure_direction(Direction::Input);
        Ok(pin)
    }

    /// Create the pin, configure it as an output and drive it low.
    pub fn output(regs: Arc<dyn RegisterBlock>, bit: u8) -> Result<Self> {
        let pin = Self::new(regs, bit)?;
        pin.configure_direction(Direction::Output);
        pin.write(Level::Low);
        Ok(pin)
    }

    pub fn bit(&self) -> u8 {
        self.bit
    }

    pub fn direction(&self) -> Option<Direction> {
        *self.direction.lock()
    }

    fn mask(&self) -> u32 {
        1 << self.bit
    }

    /// Set (output) or clear (input) the pin's output-enable bit.
    pub fn configure_direction(&self, direction: Direction) {
        match direction {
            Direction::Output => self.regs.set_bits(Register::OutEnable, self.mask()),
            Direction::Input => self.regs.clear_bits(Register::OutEnable, self.mask()),
        }
        *self.direction.lock() = Some(direction);
        debug!(bit = self.bit, ?direction, "GPIO direction configured");
    }

    /// Drive the output latch. Ignored unless the pin is an output.
    pub fn write(&self, level: Level) {
        if self.direction() != Some(Direction::Output) {
            debug!(bit = self.bit, %level, "Ignoring write to non-output pin");
            return;
        }
        match level {
            Level::High => self.regs.set_bits(Register::Out, self.mask()),
            Level::Low => self.regs.clear_bits(Register::Out, self.mask()),
        }
    }

    /// Level at the pad.
    pub fn read(&self) -> Level {
        Level::from(self.regs.read(Register::Pad) & self.mask() != 0)
    }

    /// Level currently held in the output latch.
    pub fn output_level(&self) -> Level {
        Level::from(self.regs.read(Register::Out) & self.mask() != 0)
    }
}

impl fmt::Debug for GpioPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioPin")
            .field("bit", &self.bit)
            .field("direction", &self.direction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::MemoryRegisters;

    fn bank() -> Arc<MemoryRegisters> {
        Arc::new(MemoryRegisters::new())
    }

    #[test]
    fn test_level_ops() {
        assert_eq!(!Level::Low, Level::High);
        assert_eq!(Level::from(true), Level::High);
        assert!(!Level::Low.is_high());
        assert_eq!(Level::High.to_string(), "high");
    }

    #[test]
    fn test_invalid_pin() {
        assert!(matches!(
            GpioPin::new(bank(), 32),
            Err(HardwareError::InvalidPin(32))
        ));
    }

    #[test]
    fn test_output_pin_drives_only_its_bit() {
        let regs = bank();
        regs.write(Register::Out, 0b1);
        let pin = GpioPin::output(regs.clone(), 14).unwrap();

        assert_eq!(regs.read(Register::OutEnable), 1 << 14);
        assert_eq!(pin.output_level(), Level::Low);

        pin.write(Level::High);
        assert_eq!(regs.read(Register::Out), (1 << 14) | 0b1);
        pin.write(Level::Low);
        assert_eq!(regs.read(Register::Out), 0b1);
    }

    #[test]
    fn test_input_pin_reads_pad_and_ignores_writes() {
        let regs = bank();
        regs.write(Register::OutEnable, u32::MAX);
        let pin = GpioPin::input(regs.clone(), 30).unwrap();

        assert_eq!(regs.read(Register::OutEnable), !(1 << 30));
        assert_eq!(pin.read(), Level::High);

        regs.clear_bits(Register::Pad, 1 << 30);
        assert_eq!(pin.read(), Level::Low);

        pin.write(Level::High);
        assert_eq!(regs.read(Register::Out), 0);
    }

    #[test]
    fn test_unconfigured_pin_ignores_writes() {
        let regs = bank();
        let pin = GpioPin::new(regs.clone(), 3).unwrap();
        assert_eq!(pin.direction(), None);
        pin.write(Level::High);
        assert_eq!(regs.read(Register::Out), 0);
    }
}
