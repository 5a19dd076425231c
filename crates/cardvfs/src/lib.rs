#![no_std]

// Firmware device contract: fixed-size handles and records, no allocator use.

#[cfg(test)]
extern crate std;

use core::fmt;
use core::panic::Location;

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Capacity of one card block, the unit counted by the mode word.
pub const CARD_BLOCK_SIZE: u32 = 0x2000;

/// Longest file name a directory entry carries, terminator excluded.
pub const MAX_NAME_LEN: usize = 20;

/// Status codes reported through [`File::errno`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum Errno {
    NoError = 0,
    NotFound = 2,
    Busy = 16,
    AlreadyExists = 17,
    OutOfSpace = 28,
}

pub type CardResult<T> = core::result::Result<T, Errno>;

bitflags! {
    /// Mode word passed to `open`. The high 16 bits carry the number of
    /// blocks requested by a create.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ = 0x0001;
        const WRITE = 0x0002;
        const NBLOCK = 0x0004;
        const SCAN = 0x0008;
        const RLOCK = 0x0010;
        const WLOCK = 0x0020;
        const APPEND = 0x0100;
        const CREAT = 0x0200;
        const TRUNC = 0x0400;
        const SCAN2 = 0x1000;
        const RCOM = 0x2000;
        const NBUF = 0x4000;
        const ASYNC = 0x8000;

        const _ = !0;
    }
}

impl OpenFlags {
    const BLOCK_COUNT_SHIFT: u32 = 16;

    /// Replace the requested block count.
    pub const fn with_blocks(self, count: u16) -> Self {
        Self::from_bits_retain((self.bits() & 0xffff) | ((count as u32) << Self::BLOCK_COUNT_SHIFT))
    }

    /// Create flags sized for `length` bytes, rounded up to whole blocks.
    pub fn for_length(length: u32) -> Self {
        let blocks = length.div_ceil(CARD_BLOCK_SIZE).min(u16::MAX as u32) as u16;
        Self::CREAT.with_blocks(blocks)
    }

    pub const fn block_count(self) -> u32 {
        (self.bits() >> Self::BLOCK_COUNT_SHIFT) & 0xffff
    }
}

bitflags! {
    /// Device class bits of a [`Device`] record.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DeviceFlags: u32 {
        const CHAR = 0x01;
        const CONS = 0x02;
        const BLOCK = 0x04;
        const RAW = 0x08;
        const FS = 0x10;
    }
}

/// Caller-owned file handle. Drivers fill in the fields they own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct File {
    pub device_id: i32,
    pub errno: Errno,
    /// First block of the file, used as a pseudo sector address.
    pub lba: i32,
    pub offset: u32,
    pub length: u32,
}

impl File {
    pub const fn new(device_id: i32) -> Self {
        Self {
            device_id,
            errno: Errno::NoError,
            lba: 0,
            offset: 0,
            length: 0,
        }
    }
}

/// One result of a `first_file`/`next_file` enumeration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name_len: u8,
    pub name: [u8; MAX_NAME_LEN],
    pub attributes: u8,
    pub size: u32,
    pub lba: u32,
}

impl DirEntry {
    pub const fn empty() -> Self {
        Self {
            name_len: 0,
            name: [0; MAX_NAME_LEN],
            attributes: 0,
            size: 0,
            lba: 0,
        }
    }

    pub fn set_name(&mut self, name: &[u8]) -> CardResult<()> {
        if name.len() > MAX_NAME_LEN {
            return Err(Errno::NotFound);
        }
        let len = name.len();
        self.name = [0; MAX_NAME_LEN];
        self.name[..len].copy_from_slice(name);
        self.name_len = len as u8;
        Ok(())
    }

    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len as usize]
    }
}

/// Operation record a driver registers under its device name.
///
/// Integer-returning entries report 0 on success and non-zero on failure,
/// with the reason left in [`File::errno`]. The enumeration entries return
/// `false` when no entry was produced.
#[derive(Clone, Copy)]
pub struct Device {
    pub name: &'static str,
    pub flags: DeviceFlags,
    pub block_size: u32,
    pub desc: &'static str,
    pub init: fn() -> i32,
    pub open: fn(&mut File, &str, OpenFlags) -> i32,
    pub action: fn() -> i32,
    pub close: fn(&mut File) -> i32,
    pub ioctl: fn() -> i32,
    pub read: fn(&mut File, &mut [u8]) -> i32,
    pub write: fn(&mut File, &[u8]) -> i32,
    pub erase: fn(&mut File, &str) -> i32,
    pub undelete: fn(&mut File, &str) -> i32,
    pub first_file: fn(&mut File, &str, &mut DirEntry) -> bool,
    pub next_file: fn(&mut File, &mut DirEntry) -> bool,
    pub format: fn(&mut File) -> i32,
    pub chdir: fn() -> i32,
    pub rename: fn(&mut File, &str, &mut File, &str) -> i32,
    pub deinit: fn() -> i32,
    pub check: fn() -> i32,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("block_size", &self.block_size)
            .field("desc", &self.desc)
            .finish_non_exhaustive()
    }
}

/// Entry used for the operations a device accepts and ignores.
pub fn dummy() -> i32 {
    0
}

/// Fatal stop raised by an operation this firmware generation lacks.
#[derive(Clone, Copy, Debug)]
pub struct FatalAbort {
    pub operation: &'static str,
    pub caller: &'static Location<'static>,
}

impl fmt::Display for FatalAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unimplemented memory card function {} from {}",
            self.operation, self.caller
        )
    }
}

/// Halt on an unimplemented operation, naming it and its call site.
///
/// Never returns. Release and dev profiles abort on panic, so nothing
/// above this call can recover.
#[track_caller]
pub fn halt_unimplemented(operation: &'static str) -> ! {
    let abort = FatalAbort {
        operation,
        caller: Location::caller(),
    };
    log::error!(
        "=== Unimplemented memory card function {} from {} ===",
        abort.operation,
        abort.caller
    );
    log::error!("=== halting ===");
    panic!("{}", abort)
}
