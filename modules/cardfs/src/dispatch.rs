//! The `"bu"` device record and its binding to the installed driver.

use cardvfs::{dummy, halt_unimplemented, CardResult, Device, DeviceFlags, DirEntry, Errno, File, OpenFlags};
use spin::Mutex;

use crate::config::{CardConfig, DEVICE_NAME, FRAME_SIZE};
use crate::devtab;
use crate::device::CardDriver;
use crate::hw::CardHardware;

pub type CardHandle = &'static mut (dyn CardHardware + Send);

static CARD: Mutex<Option<CardDriver<CardHandle>>> = Mutex::new(None);

/// Install the driver the `"bu"` record talks to, replacing any previous
/// one together with its directory state.
pub fn install(hw: CardHandle, config: CardConfig) {
    *CARD.lock() = Some(CardDriver::new(hw, config));
    log::info!("cardfs: driver installed (auto_format={})", config.auto_format);
}

/// Run `f` on the installed driver.
pub fn with_card<R>(f: impl FnOnce(&mut CardDriver<CardHandle>) -> R) -> Option<R> {
    CARD.lock().as_mut().map(f)
}

pub static CARD_DEVICE: Device = Device {
    name: DEVICE_NAME,
    flags: DeviceFlags::BLOCK.union(DeviceFlags::FS),
    block_size: FRAME_SIZE as u32,
    desc: "MEMORY CARD",
    init: dummy,
    open: card_open,
    action: dummy,
    close: card_close,
    ioctl: dummy,
    read: card_read,
    write: card_write,
    erase: card_erase,
    undelete: card_undelete,
    first_file: card_first_file,
    next_file: card_next_file,
    format: card_format,
    chdir: dummy,
    rename: card_rename,
    deinit: card_deinit,
    check: dummy,
};

/// Register [`CARD_DEVICE`] in the device table.
pub fn add_memory_card_device() -> bool {
    devtab::add_device(&CARD_DEVICE)
}

fn call(file: &mut File, f: impl FnOnce(&mut CardDriver<CardHandle>, &mut File) -> CardResult<()>) -> CardResult<()> {
    let mut card = CARD.lock();
    match card.as_mut() {
        Some(driver) => f(driver, file),
        None => {
            log::warn!("cardfs: no driver installed");
            file.errno = Errno::Busy;
            Err(Errno::Busy)
        }
    }
}

fn status(result: CardResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn card_open(file: &mut File, path: &str, flags: OpenFlags) -> i32 {
    status(call(file, |driver, file| driver.open(file, path, flags)))
}

fn card_close(file: &mut File) -> i32 {
    status(call(file, |driver, file| driver.close(file)))
}

fn card_first_file(file: &mut File, filter: &str, entry: &mut DirEntry) -> bool {
    call(file, |driver, file| driver.first_file(file, filter, entry)).is_ok()
}

fn card_next_file(file: &mut File, entry: &mut DirEntry) -> bool {
    call(file, |driver, file| driver.next_file(file, entry)).is_ok()
}

fn card_format(file: &mut File) -> i32 {
    status(call(file, |driver, file| driver.format(file)))
}

#[track_caller]
fn card_read(_file: &mut File, _buf: &mut [u8]) -> i32 {
    halt_unimplemented("mcRead")
}

#[track_caller]
fn card_write(_file: &mut File, _buf: &[u8]) -> i32 {
    halt_unimplemented("mcWrite")
}

#[track_caller]
fn card_erase(_file: &mut File, _path: &str) -> i32 {
    halt_unimplemented("mcErase")
}

#[track_caller]
fn card_undelete(_file: &mut File, _path: &str) -> i32 {
    halt_unimplemented("mcUndelete")
}

#[track_caller]
fn card_rename(_from: &mut File, _old: &str, _to: &mut File, _new: &str) -> i32 {
    halt_unimplemented("mcRename")
}

#[track_caller]
fn card_deinit() -> i32 {
    halt_unimplemented("mcDeinit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CARD_SIZE;
    use crate::image::{CardBus, MemoryCardImage};
    use std::boxed::Box;
    use std::format;
    use std::string::String;
    use std::vec;

    #[test]
    fn record_metadata() {
        assert_eq!(CARD_DEVICE.name, "bu");
        assert_eq!(CARD_DEVICE.flags.bits(), 0x14);
        assert_eq!(CARD_DEVICE.block_size, 0x80);
        assert_eq!(CARD_DEVICE.desc, "MEMORY CARD");
        assert_eq!((CARD_DEVICE.init)(), 0);
        assert_eq!((CARD_DEVICE.action)(), 0);
        assert_eq!((CARD_DEVICE.ioctl)(), 0);
        assert_eq!((CARD_DEVICE.chdir)(), 0);
        assert_eq!((CARD_DEVICE.check)(), 0);
    }

    // The driver slot and device table are process-wide, so every check
    // touching them lives in this one test.
    #[test]
    fn registered_device_drives_installed_card() {
        let mut file = File::new(0);
        assert_eq!((CARD_DEVICE.open)(&mut file, "SAVE", OpenFlags::READ), 1);
        assert_eq!(file.errno, Errno::Busy);
        assert!(with_card(|_| ()).is_none());

        let data = Box::leak(vec![0u8; CARD_SIZE].into_boxed_slice());
        let mut bus = CardBus::new();
        bus.insert(0, MemoryCardImage::formatted(data).unwrap());
        install(Box::leak(Box::new(bus)), CardConfig::new());
        assert_eq!(with_card(|driver| driver.mount(0)), Some(Ok(())));

        assert!(add_memory_card_device());
        assert!(!add_memory_card_device());
        let (device, device_id, name) = devtab::resolve_path("bu00:BASLUS-00001SAVE").unwrap();
        assert_eq!(device.name, "bu");

        let mut file = File::new(device_id);
        assert_eq!((device.open)(&mut file, name, OpenFlags::for_length(0x3000)), 0);
        assert_eq!(file.errno, Errno::NoError);
        assert_eq!(file.length, 0x4000);
        assert_eq!((device.open)(&mut file, name, OpenFlags::CREAT.with_blocks(1)), 1);
        assert_eq!(file.errno, Errno::AlreadyExists);

        let mut entry = DirEntry::empty();
        assert!((device.first_file)(&mut file, "BASLUS*", &mut entry));
        assert_eq!(entry.name(), b"BASLUS-00001SAVE");
        assert_eq!(entry.size, 0x4000);
        assert!(!(device.next_file)(&mut file, &mut entry));
        assert_eq!(file.errno, Errno::NotFound);

        with_card(|driver| driver.set_operation_pending(0, true)).unwrap().unwrap();
        assert_eq!((device.close)(&mut file), 1);
        assert_eq!(file.errno, Errno::Busy);
        with_card(|driver| driver.set_operation_pending(0, false)).unwrap().unwrap();
        assert_eq!((device.close)(&mut file), 0);

        assert_eq!((device.format)(&mut file), 0);
        assert!(!(device.first_file)(&mut file, "*", &mut entry));

        assert!(devtab::remove_device("bu"));
        assert!(devtab::find_device("bu").is_none());
    }

    #[test]
    fn halt_names_the_calling_line() {
        let line = line!() + 1;
        let payload = std::panic::catch_unwind(|| card_read(&mut File::new(0), &mut [])).unwrap_err();
        let message = payload.downcast_ref::<String>().unwrap();
        assert!(message.contains("mcRead"));
        assert!(message.contains(&format!("{}:{}:", file!(), line)), "{}", message);
    }

    #[test]
    #[should_panic(expected = "mcErase")]
    fn erase_entry_halts() {
        let mut file = File::new(0);
        (CARD_DEVICE.erase)(&mut file, "SAVE");
    }

    #[test]
    #[should_panic(expected = "mcDeinit")]
    fn deinit_entry_halts() {
        (CARD_DEVICE.deinit)();
    }
}
