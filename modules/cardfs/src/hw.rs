use crate::allocation::TocSnapshot;
use crate::dir::{BrokenBlocks, DirectoryTable, Frame};

/// Outcome of polling a card's status register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardStatus {
    Idle,
    Busy,
    /// The card needs its low-level initialization before use.
    NeedsFormat,
    /// Still settling; poll again.
    TransientRetry,
}

/// Sector and status primitives of the card hardware.
///
/// Every call polls the hardware to completion before returning. Stalls
/// and timeouts are handled on this side of the seam.
pub trait CardHardware {
    /// Start a sector read into `buf`. `false` means the card did not answer.
    fn read_sector(&mut self, device_id: i32, sector: u32, buf: &mut Frame) -> bool;
    fn wait_for_status(&mut self, device_id: i32) -> CardStatus;
    /// Persist the entries of `table` whose `snapshot` byte is non-zero.
    fn write_directory_table(
        &mut self,
        device_id: i32,
        table: &DirectoryTable,
        snapshot: &TocSnapshot,
    ) -> bool;
    /// Write a blank directory to the card and mirror it into `table`.
    fn format(&mut self, device_id: i32, table: &mut DirectoryTable, broken: &mut BrokenBlocks) -> bool;
    /// Low-level initialization of a card reporting [`CardStatus::NeedsFormat`]:
    /// rebuild `table` and `broken` from the media.
    fn low_level_init(
        &mut self,
        device_id: i32,
        table: &mut DirectoryTable,
        broken: &mut BrokenBlocks,
    ) -> bool;
    /// Clear latched card events.
    fn reset_status(&mut self);
    /// Process-wide device status flag; selects which tag family lookups see.
    fn device_status(&self) -> i32;
    fn set_device_status(&mut self, status: i32);
}

impl<H: CardHardware + ?Sized> CardHardware for &mut H {
    fn read_sector(&mut self, device_id: i32, sector: u32, buf: &mut Frame) -> bool {
        (**self).read_sector(device_id, sector, buf)
    }

    fn wait_for_status(&mut self, device_id: i32) -> CardStatus {
        (**self).wait_for_status(device_id)
    }

    fn write_directory_table(
        &mut self,
        device_id: i32,
        table: &DirectoryTable,
        snapshot: &TocSnapshot,
    ) -> bool {
        (**self).write_directory_table(device_id, table, snapshot)
    }

    fn format(&mut self, device_id: i32, table: &mut DirectoryTable, broken: &mut BrokenBlocks) -> bool {
        (**self).format(device_id, table, broken)
    }

    fn low_level_init(
        &mut self,
        device_id: i32,
        table: &mut DirectoryTable,
        broken: &mut BrokenBlocks,
    ) -> bool {
        (**self).low_level_init(device_id, table, broken)
    }

    fn reset_status(&mut self) {
        (**self).reset_status()
    }

    fn device_status(&self) -> i32 {
        (**self).device_status()
    }

    fn set_device_status(&mut self, status: i32) {
        (**self).set_device_status(status)
    }
}

/// Poll until the card reports something other than a transient state.
pub fn wait_settled<H: CardHardware + ?Sized>(hw: &mut H, device_id: i32) -> CardStatus {
    loop {
        match hw.wait_for_status(device_id) {
            CardStatus::TransientRetry => core::hint::spin_loop(),
            status => return status,
        }
    }
}
