//! Allocation state machine for card files.

use crate::config::{BLOCK_SIZE, DIR_ENTRY_COUNT};
use crate::dir::{AllocState, DirectoryTable};
use crate::pattern;

/// Per-entry marks handed to the directory writer; non-zero entries are
/// persisted.
pub type TocSnapshot = [u8; DIR_ENTRY_COUNT];

/// Which tag family a lookup treats as an existing file.
///
/// Picked from the device status flag, never from the entry itself: with
/// the flag at 0 only pending first blocks are visible, otherwise only
/// committed ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Pending,
    Committed,
}

impl Visibility {
    pub fn from_status(flag: i32) -> Self {
        if flag == 0 {
            Self::Pending
        } else {
            Self::Committed
        }
    }

    pub fn first_block_tag(self) -> AllocState {
        match self {
            Self::Pending => AllocState::FirstPending,
            Self::Committed => AllocState::FirstCommitted,
        }
    }
}

/// First index at or after `start` holding a visible, named file whose
/// name matches `pattern`.
pub fn find_visible(
    table: &DirectoryTable,
    start: usize,
    pattern: &[u8],
    visibility: Visibility,
) -> Option<usize> {
    let tag = visibility.first_block_tag();
    (start..DIR_ENTRY_COUNT).find(|&index| {
        let entry = &table[index];
        entry.state == tag && !entry.name().is_empty() && pattern::matches(entry.name(), pattern)
    })
}

pub fn free_block_count(table: &DirectoryTable) -> u32 {
    table.iter().filter(|entry| entry.state.is_free_family()).count() as u32
}

pub fn required_blocks(length: u32) -> u32 {
    length.div_ceil(BLOCK_SIZE)
}

/// Result of [`allocate_chain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// Unit holding the first block.
    pub first: usize,
    /// Whether the directory writer accepted the chain.
    pub committed: bool,
}

/// Tag free units for a file of `length` bytes named `name`, then commit.
///
/// Units are taken in index order. The first becomes
/// [`AllocState::FirstPending`] and carries the name and length; later
/// ones become [`AllocState::MiddlePending`] and the final one of a
/// multi-block chain [`AllocState::LastPending`]. Reused units keep their
/// old size and name bytes unless they hold the first block. A zero
/// length still takes one unit.
///
/// Once the chain is long enough it is committed. A chain starting at
/// unit 0 is not released, and the scan goes on: every later free unit is
/// linked onto the tail, tagged as a last block and committed again, until
/// the units run out or a commit fails. A chain starting elsewhere gets
/// one [`release_after_commit`] step and the scan stops. A failed commit
/// stops the scan and leaves the chain pending. Returns `None` if no free
/// unit was found.
pub fn allocate_chain<F>(
    table: &mut DirectoryTable,
    name: &[u8],
    length: u32,
    mut commit: F,
) -> Option<Allocation>
where
    F: FnMut(&DirectoryTable, &TocSnapshot) -> bool,
{
    let required = required_blocks(length);
    let mut snapshot: TocSnapshot = [0; DIR_ENTRY_COUNT];
    let mut first = None;
    let mut committed = false;
    let mut prev = 0usize;
    let mut taken = 0u32;
    for index in 0..DIR_ENTRY_COUNT {
        if !table[index].state.is_free_family() {
            continue;
        }
        let head = match first {
            None => {
                let entry = &mut table[index];
                entry.state = AllocState::FirstPending;
                entry.size = length;
                entry.set_name(name);
                snapshot[index] = AllocState::FirstPending.raw();
                first = Some(index);
                index
            }
            Some(head) => {
                table[prev].next = Some(index as u8);
                table[index].state = AllocState::MiddlePending;
                // The last block is marked as a middle one here as well.
                snapshot[index] = AllocState::MiddlePending.raw();
                head
            }
        };
        prev = index;
        taken += 1;
        if required > taken {
            continue;
        }
        let entry = &mut table[index];
        entry.next = None;
        if taken > 1 {
            entry.state = AllocState::LastPending;
        }
        committed = commit(&*table, &snapshot);
        if !committed {
            log::warn!("cardfs: directory commit failed, chain at {} left pending", head);
            break;
        }
        if head != 0 {
            release_after_commit(table, head);
            break;
        }
    }
    first.map(|first| Allocation { first, committed })
}

/// Free-back walk run after a successful commit.
///
/// The loop guard tests the index captured before the walk while the
/// chain pointer advances to the terminal link the body has just written.
/// Only the first block is released, and nothing is released when the
/// chain starts at unit 0; later blocks stay allocated. This outcome is
/// part of the on-card behavior and must not change.
pub fn release_after_commit(table: &mut DirectoryTable, first: usize) {
    let guard = first;
    let mut cursor = Some(first);
    while let Some(index) = cursor.filter(|_| guard != 0) {
        let entry = &mut table[index];
        entry.next = None;
        cursor = entry.next.map(usize::from);
        entry.state = AllocState::Free;
        entry.size = 0;
    }
}
