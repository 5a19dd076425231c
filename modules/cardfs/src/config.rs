/// Physical card slots served by the driver.
pub const PORT_COUNT: usize = 2;
/// Allocation units tracked by one card directory.
pub const DIR_ENTRY_COUNT: usize = 15;
/// Broken-block markers kept per port.
pub const BROKEN_LIST_LEN: usize = 20;
/// Bytes held by one allocation unit.
pub const BLOCK_SIZE: u32 = cardvfs::CARD_BLOCK_SIZE;
/// Bytes in one addressable card sector (a "frame").
pub const FRAME_SIZE: usize = 128;
/// Frames per block; also the multiplier for enumerated pseudo-LBAs.
pub const FRAMES_PER_BLOCK: u32 = BLOCK_SIZE / FRAME_SIZE as u32;
/// Blocks on a card, directory block included.
pub const CARD_BLOCKS: usize = DIR_ENTRY_COUNT + 1;
/// Bytes in a raw card image.
pub const CARD_SIZE: usize = CARD_BLOCKS * BLOCK_SIZE as usize;
/// Directory entry name capacity, terminator excluded.
pub const NAME_LEN: usize = cardvfs::MAX_NAME_LEN;
/// Leading bytes of a formatted card's header frame.
pub const CARD_MAGIC: [u8; 2] = *b"MC";
/// Name the driver registers under in the device table.
pub const DEVICE_NAME: &str = "bu";

/// Format cards lacking the header magic instead of failing the access.
/// Enabled through `--features auto-format`.
pub const AUTO_FORMAT_DEFAULT: bool = cfg!(feature = "auto-format");

/// Runtime knobs of a [`crate::device::CardDriver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardConfig {
    pub auto_format: bool,
}

impl CardConfig {
    pub const fn new() -> Self {
        Self {
            auto_format: AUTO_FORMAT_DEFAULT,
        }
    }
}

impl Default for CardConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a device id onto its card port: ids `0x00..=0x0f` address port 0,
/// `0x10..=0x1f` port 1.
pub fn port_of(device_id: i32) -> Option<usize> {
    let biased = if device_id >= 0 { device_id } else { device_id + 15 };
    let port = biased >> 4;
    if (0..PORT_COUNT as i32).contains(&port) {
        Some(port as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_map_to_ports() {
        assert_eq!(port_of(0x00), Some(0));
        assert_eq!(port_of(0x0f), Some(0));
        assert_eq!(port_of(0x10), Some(1));
        assert_eq!(port_of(0x1f), Some(1));
        assert_eq!(port_of(-1), Some(0));
        assert_eq!(port_of(0x20), None);
        assert_eq!(port_of(-17), None);
    }

    #[test]
    fn geometry() {
        assert_eq!(FRAMES_PER_BLOCK, 0x40);
        assert_eq!(CARD_SIZE, 128 * 1024);
    }
}
