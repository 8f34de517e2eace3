//! FAT32 on block devices, with USB mass-storage access through [`msc`].
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod byte_device;
pub mod config;
pub mod error;
pub mod fat32;
#[cfg(feature = "std")]
pub mod file_device;
pub mod mount;
pub mod partition;
pub mod ram;

pub use byte_device::ByteDevice;
pub use config::{FixedClock, MountConfig, PartitionScheme, TimeSource};
#[cfg(feature = "std")]
pub use config::SystemClock;
pub use error::FatError;
pub use fat32::{format_fat32, DirEntry, DirHandle, FileHandle, FileSystem, FormatOptions, Handle};
#[cfg(feature = "std")]
pub use file_device::FileBlockDevice;
pub use mount::mount_partitions;
pub use msc::BlockDevice;
pub use partition::{PartitionDevice, PartitionEntry, PartitionError, PartitionKind};
pub use ram::RamBlockDevice;
