//! Memory card session controller.

use cardvfs::{halt_unimplemented, CardResult, DirEntry, Errno, File, OpenFlags};

use crate::allocation::{self, Visibility};
use crate::config::{port_of, CardConfig, BLOCK_SIZE, FRAMES_PER_BLOCK, FRAME_SIZE, PORT_COUNT};
use crate::dir::{self, BrokenBlocks, DirectoryTable, Frame};
use crate::hw::{self, CardHardware, CardStatus};
use crate::pattern::FindCursor;

/// State kept for one card slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Port {
    /// Last sector read during card initialization.
    pub buffer: Frame,
    pub table: DirectoryTable,
    pub broken: BrokenBlocks,
    /// Set while an asynchronous card operation owns the port.
    pub operation_pending: bool,
}

impl Port {
    pub const fn new() -> Self {
        Self {
            buffer: [0; FRAME_SIZE],
            table: DirectoryTable::zeroed(),
            broken: BrokenBlocks::empty(),
            operation_pending: false,
        }
    }
}

impl Default for Port {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CardDriver<H> {
    hw: H,
    config: CardConfig,
    ports: [Port; PORT_COUNT],
    cursor: FindCursor,
}

impl<H: CardHardware> CardDriver<H> {
    pub fn new(hw: H, config: CardConfig) -> Self {
        Self {
            hw,
            config,
            ports: [Port::new(); PORT_COUNT],
            cursor: FindCursor::new(),
        }
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn set_auto_format(&mut self, enabled: bool) {
        self.config.auto_format = enabled;
    }

    pub fn port(&self, index: usize) -> Option<&Port> {
        self.ports.get(index)
    }

    pub fn cursor(&self) -> &FindCursor {
        &self.cursor
    }

    /// Mark or clear an outstanding asynchronous operation on the port of
    /// `device_id`.
    pub fn set_operation_pending(&mut self, device_id: i32, pending: bool) -> CardResult<()> {
        let port = port_index(device_id)?;
        self.ports[port].operation_pending = pending;
        Ok(())
    }

    /// Load the directory and broken-block list of a card from its media.
    pub fn mount(&mut self, device_id: i32) -> CardResult<()> {
        let port = port_index(device_id)?;
        let state = &mut self.ports[port];
        if state.operation_pending {
            return Err(Errno::Busy);
        }
        if !self.hw.low_level_init(device_id, &mut state.table, &mut state.broken) {
            return Err(Errno::Busy);
        }
        log::debug!("cardfs: port {} directory loaded", port);
        Ok(())
    }

    /// Card initialization is deferred to the first open or enumeration.
    pub fn init(&mut self, _device_id: i32) -> CardResult<()> {
        Ok(())
    }

    /// Open `path`, or create it when `flags` has [`OpenFlags::CREAT`].
    ///
    /// A create reserves `flags.block_count()` blocks. `path` is used as a
    /// lookup pattern, so `?` in it matches any byte.
    pub fn open(&mut self, file: &mut File, path: &str, flags: OpenFlags) -> CardResult<()> {
        file.errno = Errno::Busy;
        let result = self.open_file(file, path.as_bytes(), flags);
        settle(file, result)
    }

    /// Release the card status for the handle's port.
    pub fn close(&mut self, file: &mut File) -> CardResult<()> {
        let port = port_index(file.device_id)?;
        if self.ports[port].operation_pending {
            file.errno = Errno::Busy;
            return Err(Errno::Busy);
        }
        self.hw.reset_status();
        Ok(())
    }

    /// Start an enumeration for `filter`, replacing any in progress, and
    /// return its first hit.
    pub fn first_file(&mut self, file: &mut File, filter: &str, entry: &mut DirEntry) -> CardResult<()> {
        file.errno = Errno::Busy;
        let result = self.start_enumeration(file, filter.as_bytes(), entry);
        settle(file, result)
    }

    /// Continue the current enumeration past the entry last returned.
    pub fn next_file(&mut self, file: &mut File, entry: &mut DirEntry) -> CardResult<()> {
        let result = self.continue_enumeration(file, entry);
        settle(file, result)
    }

    pub fn format(&mut self, file: &mut File) -> CardResult<()> {
        let result = self.format_card(file.device_id);
        settle(file, result)
    }

    #[track_caller]
    pub fn read(&mut self, _file: &mut File, _buf: &mut [u8]) -> ! {
        halt_unimplemented("mcRead")
    }

    #[track_caller]
    pub fn write(&mut self, _file: &mut File, _buf: &[u8]) -> ! {
        halt_unimplemented("mcWrite")
    }

    #[track_caller]
    pub fn erase(&mut self, _file: &mut File, _path: &str) -> ! {
        halt_unimplemented("mcErase")
    }

    #[track_caller]
    pub fn undelete(&mut self, _file: &mut File, _path: &str) -> ! {
        halt_unimplemented("mcUndelete")
    }

    #[track_caller]
    pub fn rename(&mut self, _from: &mut File, _old: &str, _to: &mut File, _new: &str) -> ! {
        halt_unimplemented("mcRename")
    }

    #[track_caller]
    pub fn deinit(&mut self) -> ! {
        halt_unimplemented("mcDeinit")
    }

    fn open_file(&mut self, file: &mut File, path: &[u8], flags: OpenFlags) -> CardResult<()> {
        let port = port_index(file.device_id)?;
        if self.ports[port].operation_pending {
            return Err(Errno::Busy);
        }
        self.hw.reset_status();
        if !flags.contains(OpenFlags::ASYNC) && !self.init_card(file.device_id, port) {
            return Err(Errno::Busy);
        }
        self.hw.set_device_status(0);
        let first = if flags.contains(OpenFlags::CREAT) {
            self.create_file(file, port, path, flags.block_count())?
        } else {
            self.lookup(port, 0, path).ok_or(Errno::NotFound)?
        };
        file.lba = first as i32;
        file.offset = 0;
        file.length = self.ports[port].table[first].size;
        Ok(())
    }

    fn create_file(&mut self, file: &mut File, port: usize, name: &[u8], blocks: u32) -> CardResult<usize> {
        if self.lookup(port, 0, name).is_some() {
            return Err(Errno::AlreadyExists);
        }
        let available = allocation::free_block_count(&self.ports[port].table);
        file.length = blocks * BLOCK_SIZE;
        if blocks > available {
            return Err(Errno::OutOfSpace);
        }
        let device_id = file.device_id;
        let Self { hw, ports, .. } = self;
        let created = allocation::allocate_chain(&mut ports[port].table, name, file.length, |table, snapshot| {
            hw.write_directory_table(device_id, table, snapshot)
        })
        .ok_or(Errno::OutOfSpace)?;
        Ok(created.first)
    }

    fn start_enumeration(&mut self, file: &mut File, filter: &[u8], entry: &mut DirEntry) -> CardResult<()> {
        let port = port_index(file.device_id)?;
        if self.ports[port].operation_pending {
            return Err(Errno::Busy);
        }
        self.hw.reset_status();
        if !self.init_card(file.device_id, port) {
            return Err(Errno::Busy);
        }
        self.cursor.restart(filter);
        self.continue_enumeration(file, entry)
    }

    fn continue_enumeration(&mut self, file: &mut File, entry: &mut DirEntry) -> CardResult<()> {
        let port = port_index(file.device_id)?;
        if self.ports[port].operation_pending {
            return Err(Errno::Busy);
        }
        self.hw.reset_status();
        let pattern = self.cursor.pattern;
        let index = self
            .lookup(port, self.cursor.resume_index(), pattern.as_bytes())
            .ok_or(Errno::NotFound)?;
        let found = &self.ports[port].table[index];
        entry.attributes = found.state.family();
        entry.lba = (index as u32 + 1) * FRAMES_PER_BLOCK;
        entry.size = found.size;
        entry.set_name(found.name())?;
        Ok(())
    }

    fn format_card(&mut self, device_id: i32) -> CardResult<()> {
        let port = port_index(device_id)?;
        if self.ports[port].operation_pending {
            return Err(Errno::Busy);
        }
        self.hw.reset_status();
        let state = &mut self.ports[port];
        if !self.hw.format(device_id, &mut state.table, &mut state.broken) {
            return Err(Errno::Busy);
        }
        Ok(())
    }

    /// Visible entry matching `pattern` at or after `start`. A hit becomes
    /// the enumeration cursor position whichever operation asked.
    fn lookup(&mut self, port: usize, start: usize, pattern: &[u8]) -> Option<usize> {
        let visibility = Visibility::from_status(self.hw.device_status());
        let found = allocation::find_visible(&self.ports[port].table, start, pattern, visibility);
        if let Some(index) = found {
            self.cursor.last = index as i32;
        }
        log::trace!("cardfs: lookup port {} from {} -> {:?}", port, start, found);
        found
    }

    /// Check the card in `port` before an access.
    ///
    /// An unreadable card counts as blank: the directory mirror is zeroed
    /// and the access goes ahead.
    fn init_card(&mut self, device_id: i32, port: usize) -> bool {
        let Self { hw, config, ports, .. } = self;
        let state = &mut ports[port];
        if !hw.read_sector(device_id, 0, &mut state.buffer) {
            log::debug!("cardfs: port {} unreadable, using a blank directory", port);
            state.table.clear();
            state.broken.clear();
            return true;
        }
        match hw::wait_settled(&mut *hw, device_id) {
            CardStatus::Idle => {}
            CardStatus::NeedsFormat => {
                log::debug!("cardfs: port {} needs low-level init", port);
                return hw.low_level_init(device_id, &mut state.table, &mut state.broken);
            }
            status => {
                log::debug!("cardfs: port {} not ready ({:?})", port, status);
                return false;
            }
        }
        if dir::has_magic(&state.buffer) {
            return true;
        }
        if config.auto_format {
            log::debug!("cardfs: port {} unformatted, formatting", port);
            return hw.format(device_id, &mut state.table, &mut state.broken);
        }
        false
    }
}

fn port_index(device_id: i32) -> CardResult<usize> {
    port_of(device_id).ok_or(Errno::NotFound)
}

fn settle(file: &mut File, result: CardResult<()>) -> CardResult<()> {
    file.errno = match result {
        Ok(()) => Errno::NoError,
        Err(errno) => errno,
    };
    result
}
