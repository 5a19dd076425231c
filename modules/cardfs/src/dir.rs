//! In-memory card directory and its on-media frame encoding.

use core::ops::{Index, IndexMut};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::{BROKEN_LIST_LEN, CARD_MAGIC, DIR_ENTRY_COUNT, FRAME_SIZE, NAME_LEN};

const ENTRY_STATE_OFFSET: usize = 0x00;
const ENTRY_SIZE_OFFSET: usize = 0x04;
const ENTRY_NEXT_OFFSET: usize = 0x08;
const ENTRY_NAME_OFFSET: usize = 0x0a;
const BROKEN_SECTOR_OFFSET: usize = 0x00;
const CHECKSUM_OFFSET: usize = FRAME_SIZE - 1;
const NEXT_TERMINAL: u16 = 0xffff;
const FAMILY_MASK: u8 = 0xf0;
const FREE_FAMILY: u8 = 0xa0;

pub type Frame = [u8; FRAME_SIZE];

/// Allocation code of a directory entry. The values are the on-media
/// bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AllocState {
    /// Zeroed entry left behind by an unreadable card.
    Blank = 0x00,
    FirstPending = 0x51,
    MiddlePending = 0x52,
    LastPending = 0x53,
    Free = 0xa0,
    FirstCommitted = 0xa1,
    MiddleCommitted = 0xa2,
    FreeFragmented = 0xa3,
    Unusable = 0xff,
}

impl AllocState {
    pub fn raw(self) -> u8 {
        self.into()
    }

    /// High nibble, reported as the enumeration attribute.
    pub fn family(self) -> u8 {
        self.raw() & FAMILY_MASK
    }

    /// Free by mask: every `0xaN` code counts, committed first and middle
    /// blocks included.
    pub fn is_free_family(self) -> bool {
        self.family() == FREE_FAMILY
    }

    fn from_media(raw: u32) -> Self {
        u8::try_from(raw)
            .ok()
            .and_then(|code| Self::try_from(code).ok())
            .unwrap_or(Self::Unusable)
    }
}

/// One allocation unit of the directory. Chains link units by index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub state: AllocState,
    /// Byte length of the file; meaningful on first blocks only.
    pub size: u32,
    pub name: [u8; NAME_LEN],
    /// Next unit of the chain, `None` on the last one.
    pub next: Option<u8>,
}

impl DirectoryEntry {
    /// All-zero entry, as left by clearing the raw structure.
    pub const fn zeroed() -> Self {
        Self {
            state: AllocState::Blank,
            size: 0,
            name: [0; NAME_LEN],
            next: Some(0),
        }
    }

    pub const fn free() -> Self {
        Self {
            state: AllocState::Free,
            size: 0,
            name: [0; NAME_LEN],
            next: None,
        }
    }

    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.name[..len]
    }

    /// Copy at most `NAME_LEN` bytes of `name` and zero the remainder.
    pub fn set_name(&mut self, name: &[u8]) {
        self.name = [0; NAME_LEN];
        for (dst, &src) in self.name.iter_mut().zip(name.iter().take_while(|&&b| b != 0)) {
            *dst = src;
        }
    }

    pub fn encode(&self, frame: &mut Frame) {
        frame.fill(0);
        write_u32(frame, ENTRY_STATE_OFFSET, self.state.raw() as u32);
        write_u32(frame, ENTRY_SIZE_OFFSET, self.size);
        let next = self.next.map_or(NEXT_TERMINAL, u16::from);
        write_u16(frame, ENTRY_NEXT_OFFSET, next);
        frame[ENTRY_NAME_OFFSET..ENTRY_NAME_OFFSET + NAME_LEN].copy_from_slice(&self.name);
        seal_frame(frame);
    }

    /// Links outside the directory decode as terminal and unknown state
    /// codes as [`AllocState::Unusable`]; re-encoding writes the
    /// normalized values (`0xFFFF`, `0xFF`), not the originals.
    pub fn decode(frame: &Frame) -> Self {
        let next = match read_u16(frame, ENTRY_NEXT_OFFSET) {
            raw if (raw as usize) < DIR_ENTRY_COUNT => Some(raw as u8),
            _ => None,
        };
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&frame[ENTRY_NAME_OFFSET..ENTRY_NAME_OFFSET + NAME_LEN]);
        Self {
            state: AllocState::from_media(read_u32(frame, ENTRY_STATE_OFFSET)),
            size: read_u32(frame, ENTRY_SIZE_OFFSET),
            name,
            next,
        }
    }
}

/// The 15 directory entries of one card, indexed by allocation unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryTable {
    entries: [DirectoryEntry; DIR_ENTRY_COUNT],
}

impl DirectoryTable {
    pub const fn zeroed() -> Self {
        Self {
            entries: [DirectoryEntry::zeroed(); DIR_ENTRY_COUNT],
        }
    }

    pub const fn formatted() -> Self {
        Self {
            entries: [DirectoryEntry::free(); DIR_ENTRY_COUNT],
        }
    }

    pub fn clear(&mut self) {
        *self = Self::zeroed();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter()
    }
}

impl Default for DirectoryTable {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Index<usize> for DirectoryTable {
    type Output = DirectoryEntry;

    fn index(&self, index: usize) -> &DirectoryEntry {
        &self.entries[index]
    }
}

impl IndexMut<usize> for DirectoryTable {
    fn index_mut(&mut self, index: usize) -> &mut DirectoryEntry {
        &mut self.entries[index]
    }
}

/// Sector numbers the card reported as broken; `-1` marks an empty slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrokenBlocks {
    pub sectors: [i32; BROKEN_LIST_LEN],
}

impl BrokenBlocks {
    pub const fn empty() -> Self {
        Self {
            sectors: [-1; BROKEN_LIST_LEN],
        }
    }

    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    pub fn encode_slot(&self, slot: usize, frame: &mut Frame) {
        frame.fill(0);
        write_u32(frame, BROKEN_SECTOR_OFFSET, self.sectors[slot] as u32);
        seal_frame(frame);
    }

    pub fn decode_slot(&mut self, slot: usize, frame: &Frame) {
        self.sectors[slot] = read_u32(frame, BROKEN_SECTOR_OFFSET) as i32;
    }
}

impl Default for BrokenBlocks {
    fn default() -> Self {
        Self::empty()
    }
}

/// Build the header frame of a freshly formatted card.
pub fn encode_header(frame: &mut Frame) {
    frame.fill(0);
    frame[..CARD_MAGIC.len()].copy_from_slice(&CARD_MAGIC);
    seal_frame(frame);
}

/// Only the two magic bytes are checked; the checksum is not.
pub fn has_magic(buf: &[u8]) -> bool {
    buf.len() >= CARD_MAGIC.len() && buf[..CARD_MAGIC.len()] == CARD_MAGIC
}

/// XOR of every frame byte except the checksum itself.
pub fn frame_checksum(frame: &Frame) -> u8 {
    frame[..CHECKSUM_OFFSET].iter().fold(0, |acc, &b| acc ^ b)
}

fn seal_frame(frame: &mut Frame) {
    frame[CHECKSUM_OFFSET] = frame_checksum(frame);
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_family_is_a_mask() {
        assert!(AllocState::Free.is_free_family());
        assert!(AllocState::FreeFragmented.is_free_family());
        assert!(AllocState::FirstCommitted.is_free_family());
        assert!(AllocState::MiddleCommitted.is_free_family());
        assert!(!AllocState::FirstPending.is_free_family());
        assert!(!AllocState::LastPending.is_free_family());
        assert!(!AllocState::Blank.is_free_family());
        assert_eq!(AllocState::FirstCommitted.family(), 0xa0);
        assert_eq!(AllocState::MiddlePending.family(), 0x50);
    }

    #[test]
    fn entry_frame_layout() {
        let mut entry = DirectoryEntry::free();
        entry.state = AllocState::FirstPending;
        entry.size = 0x4000;
        entry.set_name(b"BESLES-00001");
        entry.next = Some(3);
        let mut frame = [0u8; FRAME_SIZE];
        entry.encode(&mut frame);
        assert_eq!(&frame[0..4], &[0x51, 0, 0, 0]);
        assert_eq!(&frame[4..8], &[0x00, 0x40, 0, 0]);
        assert_eq!(&frame[8..10], &[3, 0]);
        assert_eq!(&frame[0x0a..0x0a + 12], b"BESLES-00001");
        assert_eq!(frame[0x1e], 0);
        assert_eq!(frame[CHECKSUM_OFFSET], frame_checksum(&frame));
        assert_eq!(DirectoryEntry::decode(&frame), entry);
    }

    #[test]
    fn terminal_link_encodes_as_ffff() {
        let entry = DirectoryEntry::free();
        let mut frame = [0u8; FRAME_SIZE];
        entry.encode(&mut frame);
        assert_eq!(&frame[8..10], &[0xff, 0xff]);
        assert_eq!(DirectoryEntry::decode(&frame).next, None);
    }

    #[test]
    fn unknown_codes_decode_unusable() {
        let mut frame = [0u8; FRAME_SIZE];
        frame[0] = 0x42;
        assert_eq!(DirectoryEntry::decode(&frame).state, AllocState::Unusable);
        frame[0] = 0x51;
        frame[1] = 0x01;
        assert_eq!(DirectoryEntry::decode(&frame).state, AllocState::Unusable);
    }

    #[test]
    fn out_of_range_fields_normalize_on_reencode() {
        let mut frame = [0u8; FRAME_SIZE];
        frame[0] = 0x42;
        frame[8..10].copy_from_slice(&0x0020u16.to_le_bytes());
        let entry = DirectoryEntry::decode(&frame);
        assert_eq!(entry.next, None);
        let mut again = [0u8; FRAME_SIZE];
        entry.encode(&mut again);
        assert_eq!(&again[0..4], &[0xff, 0, 0, 0]);
        assert_eq!(&again[8..10], &[0xff, 0xff]);
        frame[8..10].copy_from_slice(&0x000eu16.to_le_bytes());
        assert_eq!(DirectoryEntry::decode(&frame).next, Some(14));
    }

    #[test]
    fn set_name_truncates_and_pads() {
        let mut entry = DirectoryEntry::free();
        entry.set_name(b"ABCDEFGHIJKLMNOPQRSTUVWXYZ");
        assert_eq!(entry.name(), b"ABCDEFGHIJKLMNOPQRST");
        entry.set_name(b"AB");
        assert_eq!(entry.name(), b"AB");
        assert!(entry.name[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn header_magic() {
        let mut frame = [0u8; FRAME_SIZE];
        assert!(!has_magic(&frame));
        encode_header(&mut frame);
        assert!(has_magic(&frame));
        assert_eq!(frame[CHECKSUM_OFFSET], b'M' ^ b'C');
    }

    #[test]
    fn broken_slots_roundtrip_through_frames() {
        let mut broken = BrokenBlocks::empty();
        broken.sectors[4] = 0x123;
        let mut frame = [0u8; FRAME_SIZE];
        broken.encode_slot(4, &mut frame);
        let mut loaded = BrokenBlocks::empty();
        loaded.sectors[4] = 0;
        loaded.decode_slot(4, &frame);
        assert_eq!(loaded.sectors[4], 0x123);
        broken.encode_slot(0, &mut frame);
        assert_eq!(&frame[..4], &[0xff; 4]);
    }

    #[test]
    fn zeroed_table_has_no_free_blocks() {
        let table = DirectoryTable::zeroed();
        assert!(table.iter().all(|e| !e.state.is_free_family()));
        assert_eq!(table[0].next, Some(0));
        let table = DirectoryTable::formatted();
        assert!(table.iter().all(|e| e.state == AllocState::Free));
    }
}
