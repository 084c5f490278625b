//! Memory-mapped GPIO register access.
//!
//! Registers are only reachable through the named [`Register`] offsets, so
//! every access is word aligned and inside the 4 KiB window by construction.

use std::sync::atomic::{AtomicU32, Ordering};

/// Size of one mapped GPIO bank.
pub const WINDOW_SIZE: usize = 4096;

/// Registers of an S5P6818 GPIO bank used by the kiosk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Output level latch
    Out,
    /// Output enable: bit set = pin drives its output
    OutEnable,
    /// Pad level as seen by the input buffer
    Pad,
}

impl Register {
    /// Byte offset from the bank base.
    pub const fn offset(self) -> usize {
        match self {
            Register::Out => 0x00,
            Register::OutEnable => 0x04,
            Register::Pad => 0x18,
        }
    }

    const fn word(self) -> usize {
        self.offset() / 4
    }
}

/// A bank of 32-bit GPIO registers.
///
/// Implemented by the `/dev/mem` mapping and by [`MemoryRegisters`] for
/// machines without the board.
pub trait RegisterBlock: Send + Sync {
    fn read(&self, reg: Register) -> u32;

    fn write(&self, reg: Register, value: u32);

    fn set_bits(&self, reg: Register, mask: u32) {
        let value = self.read(reg);
        self.write(reg, value | mask);
    }

    fn clear_bits(&self, reg: Register, mask: u32) {
        let value = self.read(reg);
        self.write(reg, value & !mask);
    }
}

/// Plain memory standing in for a GPIO bank.
///
/// The pad register starts all ones, like inputs held high by their
/// pull-ups; everything else starts at zero.
pub struct MemoryRegisters {
    words: Box<[AtomicU32]>,
}

impl MemoryRegisters {
    pub fn new() -> Self {
        let words: Box<[AtomicU32]> = (0..WINDOW_SIZE / 4).map(|_| AtomicU32::new(0)).collect();
        words[Register::Pad.word()].store(u32::MAX, Ordering::SeqCst);
        Self { words }
    }
}

impl Default for MemoryRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBlock for MemoryRegisters {
    fn read(&self, reg: Register) -> u32 {
        self.words[reg.word()].load(Ordering::SeqCst)
    }

    fn write(&self, reg: Register, value: u32) {
        self.words[reg.word()].store(value, Ordering::SeqCst);
    }
}

#[cfg(unix)]
pub use self::mmap::RegisterWindow;

#[cfg(unix)]
mod mmap {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;
    use std::ptr::{self, NonNull};

    use tracing::{debug, warn};

    use super::{Register, RegisterBlock, WINDOW_SIZE};
    use crate::error::{HardwareError, Result};

    pub const MEM_DEVICE: &str = "/dev/mem";

    /// A 4 KiB window of physical address space mapped into the process.
    ///
    /// The mapping is created once and never moved, so the window can be
    /// shared (`Arc`) between the event loop and the key poller thread.
    /// It is unmapped on drop.
    pub struct RegisterWindow {
        base: u64,
        ptr: NonNull<u32>,
    }

    // SAFETY: the pointer targets a MAP_SHARED device mapping that lives as
    // long as `self`; all accesses are single volatile word reads/writes.
    unsafe impl Send for RegisterWindow {}
    unsafe impl Sync for RegisterWindow {}

    impl RegisterWindow {
        /// Map the GPIO bank at `physical_base` through `/dev/mem`.
        pub fn map(physical_base: u64) -> Result<Self> {
            Self::map_device(Path::new(MEM_DEVICE), physical_base)
        }

        /// Map `WINDOW_SIZE` bytes of `device` starting at `physical_base`.
        ///
        /// The file descriptor is closed as soon as the mapping exists.
        pub fn map_device(device: &Path, physical_base: u64) -> Result<Self> {
            if physical_base % WINDOW_SIZE as u64 != 0 {
                return Err(HardwareError::Unaligned(physical_base));
            }
            let offset = libc::off_t::try_from(physical_base).map_err(|_| HardwareError::Map {
                base: physical_base,
                source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
            })?;

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_SYNC)
                .open(device)
                .map_err(|source| HardwareError::DeviceOpen {
                    path: device.to_path_buf(),
                    source,
                })?;

            // SAFETY: fresh mapping with no address hint; the kernel checks
            // the descriptor, length and offset.
            let addr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    WINDOW_SIZE,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    offset,
                )
            };
            if addr == libc::MAP_FAILED {
                return Err(HardwareError::Map {
                    base: physical_base,
                    source: std::io::Error::last_os_error(),
                });
            }
            drop(file);

            let ptr = NonNull::new(addr.cast::<u32>()).ok_or_else(|| HardwareError::Map {
                base: physical_base,
                source: std::io::Error::from(std::io::ErrorKind::InvalidData),
            })?;
            debug!(base = format_args!("{:#x}", physical_base), "Register window mapped");
            Ok(Self {
                base: physical_base,
                ptr,
            })
        }

        pub fn physical_base(&self) -> u64 {
            self.base
        }

        fn register_ptr(&self, reg: Register) -> *mut u32 {
            debug_assert!(reg.offset() + 4 <= WINDOW_SIZE);
            // SAFETY: every Register offset lies inside the mapped window.
            unsafe { self.ptr.as_ptr().add(reg.word()) }
        }
    }

    impl RegisterBlock for RegisterWindow {
        fn read(&self, reg: Register) -> u32 {
            // SAFETY: aligned, in-bounds and mapped for the lifetime of self.
            unsafe { ptr::read_volatile(self.register_ptr(reg)) }
        }

        fn write(&self, reg: Register, value: u32) {
            // SAFETY: as in `read`.
            unsafe { ptr::write_volatile(self.register_ptr(reg), value) }
        }
    }

    impl Drop for RegisterWindow {
        fn drop(&mut self) {
            // SAFETY: ptr/len are exactly what mmap returned and nothing
            // can reference the window once it is being dropped.
            let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), WINDOW_SIZE) };
            if rc != 0 {
                warn!(
                    base = format_args!("{:#x}", self.base),
                    error = %std::io::Error::last_os_error(),
                    "munmap failed"
                );
            }
        }
    }

    impl std::fmt::Debug for RegisterWindow {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RegisterWindow")
                .field("base", &format_args!("{:#x}", self.base))
                .finish()
        }
    }
}
