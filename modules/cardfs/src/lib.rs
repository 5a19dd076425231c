#![no_std]

pub mod allocation;
pub mod config;
pub mod device;
pub mod devtab;
pub mod dir;
pub mod dispatch;
pub mod hw;
pub mod image;
pub mod pattern;

pub use cardvfs::{CardResult, DirEntry, Errno, File, OpenFlags};
pub use config::CardConfig;
pub use device::CardDriver;
pub use hw::{CardHardware, CardStatus};

#[cfg(test)]
extern crate std;
