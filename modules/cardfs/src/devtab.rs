use cardvfs::{CardResult, Device, Errno};
use spin::Mutex;

pub const MAX_DEVICES: usize = 10;

pub struct DeviceTable {
    devices: [Option<&'static Device>; MAX_DEVICES],
}

impl DeviceTable {
    pub const fn new() -> Self {
        Self {
            devices: [None; MAX_DEVICES],
        }
    }

    /// Register `device`. Fails if the name is taken or the table is full.
    pub fn add(&mut self, device: &'static Device) -> bool {
        if self.find(device.name).is_some() {
            log::warn!("devtab: device {} already registered", device.name);
            return false;
        }
        let Some(slot) = self.devices.iter_mut().find(|slot| slot.is_none()) else {
            log::warn!("devtab: no room for device {}", device.name);
            return false;
        };
        *slot = Some(device);
        log::info!("devtab: added device {} ({})", device.name, device.desc);
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self
            .devices
            .iter_mut()
            .find(|slot| slot.is_some_and(|device| device.name == name))
        {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn find(&self, name: &str) -> Option<&'static Device> {
        self.devices.iter().flatten().copied().find(|device| device.name == name)
    }

    pub fn len(&self) -> usize {
        self.devices.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split `path` into its device, device id and file name.
    ///
    /// `"bu10:SAVE"` yields the `"bu"` record, id `0x10` and `"SAVE"`. A
    /// missing id means 0.
    pub fn resolve<'p>(&self, path: &'p str) -> CardResult<(&'static Device, i32, &'p str)> {
        let (prefix, file) = path.split_once(':').ok_or(Errno::NotFound)?;
        let split = prefix
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(prefix.len());
        let (name, digits) = prefix.split_at(split);
        let device = self.find(name).ok_or(Errno::NotFound)?;
        let device_id = parse_device_id(digits).ok_or(Errno::NotFound)?;
        Ok((device, device_id, file))
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_device_id(digits: &str) -> Option<i32> {
    if digits.is_empty() {
        return Some(0);
    }
    i32::from_str_radix(digits, 16).ok()
}

static DEVICES: Mutex<DeviceTable> = Mutex::new(DeviceTable::new());

pub fn add_device(device: &'static Device) -> bool {
    DEVICES.lock().add(device)
}

pub fn remove_device(name: &str) -> bool {
    DEVICES.lock().remove(name)
}

pub fn find_device(name: &str) -> Option<&'static Device> {
    DEVICES.lock().find(name)
}

pub fn resolve_path(path: &str) -> CardResult<(&'static Device, i32, &str)> {
    DEVICES.lock().resolve(path)
}
