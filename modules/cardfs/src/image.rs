//! Emulated card slots backed by raw card images.

use crate::allocation::TocSnapshot;
use crate::config::{port_of, BROKEN_LIST_LEN, CARD_SIZE, DIR_ENTRY_COUNT, FRAME_SIZE, PORT_COUNT};
use crate::dir::{self, BrokenBlocks, DirectoryEntry, DirectoryTable, Frame};
use crate::hw::{CardHardware, CardStatus};

const HEADER_FRAME: usize = 0;
const DIR_FIRST_FRAME: usize = 1;
const BROKEN_FIRST_FRAME: usize = DIR_FIRST_FRAME + DIR_ENTRY_COUNT;
const WRITE_TEST_FRAME: usize = 63;
const FRAME_COUNT: usize = CARD_SIZE / FRAME_SIZE;

/// One card's raw image plus the fault knobs the emulation exposes.
pub struct MemoryCardImage<'a> {
    data: &'a mut [u8],
    /// Reject every frame write.
    pub write_protected: bool,
    /// Report [`CardStatus::NeedsFormat`] on the next settled poll.
    pub new_card: bool,
    /// Polls answered with [`CardStatus::TransientRetry`] before settling.
    pub transient_polls: u32,
    /// Answer every poll with [`CardStatus::Busy`].
    pub faulted: bool,
    error_latched: bool,
}

impl<'a> MemoryCardImage<'a> {
    /// Wrap a raw image; `None` if it is smaller than a card.
    pub fn new(data: &'a mut [u8]) -> Option<Self> {
        if data.len() < CARD_SIZE {
            return None;
        }
        Some(Self {
            data,
            write_protected: false,
            new_card: false,
            transient_polls: 0,
            faulted: false,
            error_latched: false,
        })
    }

    /// Wrap and format a raw image.
    pub fn formatted(data: &'a mut [u8]) -> Option<Self> {
        let mut image = Self::new(data)?;
        image.format();
        Some(image)
    }

    pub fn is_formatted(&self) -> bool {
        dir::has_magic(&self.data[..FRAME_SIZE])
    }

    pub fn error_latched(&self) -> bool {
        self.error_latched
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        if index >= FRAME_COUNT {
            return None;
        }
        let start = index * FRAME_SIZE;
        <&Frame>::try_from(&self.data[start..start + FRAME_SIZE]).ok()
    }

    pub fn read_frame(&self, index: usize, buf: &mut Frame) -> bool {
        match self.frame(index) {
            Some(frame) => {
                buf.copy_from_slice(frame);
                true
            }
            None => false,
        }
    }

    pub fn write_frame(&mut self, index: usize, frame: &Frame) -> bool {
        if self.write_protected || index >= FRAME_COUNT {
            return false;
        }
        let start = index * FRAME_SIZE;
        self.data[start..start + FRAME_SIZE].copy_from_slice(frame);
        true
    }

    /// Write a fresh header, free directory and empty broken list.
    pub fn format(&mut self) -> bool {
        let mut frame = [0u8; FRAME_SIZE];
        dir::encode_header(&mut frame);
        if !self.write_frame(HEADER_FRAME, &frame) || !self.write_frame(WRITE_TEST_FRAME, &frame) {
            return false;
        }
        let free = DirectoryEntry::free();
        free.encode(&mut frame);
        for index in 0..DIR_ENTRY_COUNT {
            if !self.write_frame(DIR_FIRST_FRAME + index, &frame) {
                return false;
            }
        }
        let broken = BrokenBlocks::empty();
        for slot in 0..BROKEN_LIST_LEN {
            broken.encode_slot(slot, &mut frame);
            if !self.write_frame(BROKEN_FIRST_FRAME + slot, &frame) {
                return false;
            }
        }
        true
    }

    /// Decode the directory and broken-sector frames.
    pub fn load_directory(&self, table: &mut DirectoryTable, broken: &mut BrokenBlocks) {
        let mut frame = [0u8; FRAME_SIZE];
        for index in 0..DIR_ENTRY_COUNT {
            if self.read_frame(DIR_FIRST_FRAME + index, &mut frame) {
                table[index] = DirectoryEntry::decode(&frame);
            }
        }
        for slot in 0..BROKEN_LIST_LEN {
            if self.read_frame(BROKEN_FIRST_FRAME + slot, &mut frame) {
                broken.decode_slot(slot, &frame);
            }
        }
    }

    /// Encode the entries `snapshot` marks and write their frames.
    pub fn write_entries(&mut self, table: &DirectoryTable, snapshot: &TocSnapshot) -> bool {
        let mut frame = [0u8; FRAME_SIZE];
        for (index, &mark) in snapshot.iter().enumerate() {
            if mark == 0 {
                continue;
            }
            table[index].encode(&mut frame);
            if !self.write_frame(DIR_FIRST_FRAME + index, &frame) {
                self.error_latched = true;
                return false;
            }
        }
        true
    }

    fn poll(&mut self) -> CardStatus {
        if self.faulted || self.error_latched {
            return CardStatus::Busy;
        }
        if self.transient_polls > 0 {
            self.transient_polls -= 1;
            return CardStatus::TransientRetry;
        }
        if self.new_card {
            self.new_card = false;
            return CardStatus::NeedsFormat;
        }
        CardStatus::Idle
    }
}

/// Both card slots plus the device status flag.
pub struct CardBus<'a> {
    slots: [Option<MemoryCardImage<'a>>; PORT_COUNT],
    status_flag: i32,
}

impl<'a> CardBus<'a> {
    pub const fn new() -> Self {
        Self {
            slots: [None, None],
            status_flag: 0,
        }
    }

    /// Put `image` in `port`, returning the card it replaces.
    pub fn insert(&mut self, port: usize, image: MemoryCardImage<'a>) -> Option<MemoryCardImage<'a>> {
        self.slots.get_mut(port)?.replace(image)
    }

    pub fn eject(&mut self, port: usize) -> Option<MemoryCardImage<'a>> {
        self.slots.get_mut(port)?.take()
    }

    pub fn slot(&self, port: usize) -> Option<&MemoryCardImage<'a>> {
        self.slots.get(port)?.as_ref()
    }

    pub fn slot_mut(&mut self, port: usize) -> Option<&mut MemoryCardImage<'a>> {
        self.slots.get_mut(port)?.as_mut()
    }

    fn card(&mut self, device_id: i32) -> Option<&mut MemoryCardImage<'a>> {
        self.slot_mut(port_of(device_id)?)
    }
}

impl Default for CardBus<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl CardHardware for CardBus<'_> {
    fn read_sector(&mut self, device_id: i32, sector: u32, buf: &mut Frame) -> bool {
        self.card(device_id)
            .is_some_and(|card| card.read_frame(sector as usize, buf))
    }

    fn wait_for_status(&mut self, device_id: i32) -> CardStatus {
        self.card(device_id).map_or(CardStatus::Busy, |card| card.poll())
    }

    fn write_directory_table(
        &mut self,
        device_id: i32,
        table: &DirectoryTable,
        snapshot: &TocSnapshot,
    ) -> bool {
        self.card(device_id)
            .is_some_and(|card| card.write_entries(table, snapshot))
    }

    fn format(&mut self, device_id: i32, table: &mut DirectoryTable, broken: &mut BrokenBlocks) -> bool {
        let Some(card) = self.card(device_id) else {
            return false;
        };
        if !card.format() {
            return false;
        }
        card.load_directory(table, broken);
        true
    }

    fn low_level_init(
        &mut self,
        device_id: i32,
        table: &mut DirectoryTable,
        broken: &mut BrokenBlocks,
    ) -> bool {
        let Some(card) = self.card(device_id) else {
            return false;
        };
        card.load_directory(table, broken);
        true
    }

    fn reset_status(&mut self) {
        for card in self.slots.iter_mut().flatten() {
            card.error_latched = false;
        }
    }

    fn device_status(&self) -> i32 {
        self.status_flag
    }

    fn set_device_status(&mut self, status: i32) {
        self.status_flag = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::AllocState;
    use std::vec;

    #[test]
    fn short_images_are_rejected() {
        let mut data = vec![0u8; CARD_SIZE - 1];
        assert!(MemoryCardImage::new(&mut data).is_none());
    }

    #[test]
    fn format_lays_out_header_and_directory() {
        let mut data = vec![0xeeu8; CARD_SIZE];
        let image = MemoryCardImage::formatted(&mut data).unwrap();
        assert!(image.is_formatted());
        assert_eq!(image.frame(WRITE_TEST_FRAME), image.frame(HEADER_FRAME));
        let mut table = DirectoryTable::zeroed();
        let mut broken = BrokenBlocks::empty();
        broken.sectors[0] = 9;
        image.load_directory(&mut table, &mut broken);
        assert_eq!(table, DirectoryTable::formatted());
        assert_eq!(broken, BrokenBlocks::empty());
        let dir_frame = image.frame(DIR_FIRST_FRAME).unwrap();
        assert_eq!(&dir_frame[..4], &[0xa0, 0, 0, 0]);
        assert_eq!(dir_frame[FRAME_SIZE - 1], dir::frame_checksum(dir_frame));
    }

    #[test]
    fn write_entries_touches_marked_frames_only() {
        let mut data = vec![0u8; CARD_SIZE];
        let mut image = MemoryCardImage::formatted(&mut data).unwrap();
        let mut table = DirectoryTable::formatted();
        table[0].state = AllocState::FirstPending;
        table[0].set_name(b"SAVE");
        table[1].state = AllocState::LastPending;
        let mut snapshot: TocSnapshot = [0; DIR_ENTRY_COUNT];
        snapshot[0] = 0x51;
        assert!(image.write_entries(&table, &snapshot));
        let mut loaded = DirectoryTable::zeroed();
        image.load_directory(&mut loaded, &mut BrokenBlocks::empty());
        assert_eq!(loaded[0], table[0]);
        assert_eq!(loaded[1].state, AllocState::Free);
    }

    #[test]
    fn failed_write_latches_until_reset() {
        let mut data = vec![0u8; CARD_SIZE];
        let mut image = MemoryCardImage::formatted(&mut data).unwrap();
        image.write_protected = true;
        let mut bus = CardBus::new();
        bus.insert(0, image);
        let mut snapshot: TocSnapshot = [0; DIR_ENTRY_COUNT];
        snapshot[3] = 0x51;
        assert!(!bus.write_directory_table(0, &DirectoryTable::formatted(), &snapshot));
        assert!(bus.slot(0).unwrap().error_latched());
        assert_eq!(bus.wait_for_status(0), CardStatus::Busy);
        bus.reset_status();
        assert_eq!(bus.wait_for_status(0), CardStatus::Idle);
    }

    #[test]
    fn poll_script_order() {
        let mut data = vec![0u8; CARD_SIZE];
        let mut image = MemoryCardImage::formatted(&mut data).unwrap();
        image.transient_polls = 1;
        image.new_card = true;
        let mut bus = CardBus::new();
        bus.insert(1, image);
        assert_eq!(bus.wait_for_status(0x10), CardStatus::TransientRetry);
        assert_eq!(bus.wait_for_status(0x10), CardStatus::NeedsFormat);
        assert_eq!(bus.wait_for_status(0x10), CardStatus::Idle);
        assert_eq!(bus.wait_for_status(0x00), CardStatus::Busy);
    }

    #[test]
    fn empty_slot_does_not_answer() {
        let mut bus = CardBus::new();
        let mut frame = [0u8; FRAME_SIZE];
        assert!(!bus.read_sector(0, 0, &mut frame));
        let mut data = vec![0u8; CARD_SIZE];
        bus.insert(0, MemoryCardImage::formatted(&mut data).unwrap());
        assert!(bus.read_sector(0, 0, &mut frame));
        assert!(dir::has_magic(&frame));
        assert!(bus.eject(0).is_some());
        assert!(!bus.read_sector(0, 0, &mut frame));
    }

    #[test]
    fn bus_format_refreshes_table() {
        let mut data = vec![0u8; CARD_SIZE];
        let mut bus = CardBus::new();
        bus.insert(0, MemoryCardImage::new(&mut data).unwrap());
        let mut table = DirectoryTable::zeroed();
        let mut broken = BrokenBlocks::empty();
        assert!(bus.format(0, &mut table, &mut broken));
        assert_eq!(table, DirectoryTable::formatted());
        assert!(bus.slot(0).unwrap().is_formatted());
        bus.slot_mut(0).unwrap().write_protected = true;
        assert!(!bus.format(0, &mut table, &mut broken));
    }
}
