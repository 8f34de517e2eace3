use alloc::vec::Vec;

use msc::BlockDevice;

use crate::config::MountConfig;
use crate::error::FatError;
use crate::fat32::FileSystem;
use crate::partition::{self, PartitionDevice, PartitionError};

/// Every FAT32 volume found on `device`, in partition table order.
///
/// Partitions holding another file system are skipped.
pub fn mount_partitions<'a, B: BlockDevice>(
    device: &'a B,
    config: &MountConfig,
) -> Result<Vec<FileSystem<PartitionDevice<&'a B>>>, FatError<PartitionError<B::Error>>> {
    let entries =
        partition::discover(device, &config.schemes).map_err(|err| err.map_device(PartitionError::Device))?;
    let mut mounted = Vec::new();
    for entry in entries.iter() {
        match FileSystem::mount(PartitionDevice::new(device, entry), config.clone()) {
            Ok(fs) => mounted.push(fs),
            Err(FatError::UnsupportedFileSystem) => {
                log::info!(
                    "mount: skip kind={:?} start={} blocks={}",
                    entry.kind,
                    entry.start_block,
                    entry.block_count
                );
            }
            Err(FatError::Device(PartitionError::OutOfRange { .. })) => {
                log::warn!(
                    "mount: skip past_device_end start={} blocks={}",
                    entry.start_block,
                    entry.block_count
                );
            }
            Err(err) => return Err(err),
        }
    }
    Ok(mounted)
}
