use core::fmt::Debug;

/// Block-addressed storage: every transfer covers whole blocks.
///
/// Methods take `&self` so one device can back several partitions at once;
/// implementations serialize access internally.
pub trait BlockDevice {
    type Error: Debug;

    fn block_size(&self) -> u32;

    fn block_count(&self) -> u64;

    /// `buf.len()` must be a multiple of [`BlockDevice::block_size`].
    fn read_blocks(&self, block: u64, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// `buf.len()` must be a multiple of [`BlockDevice::block_size`].
    fn write_blocks(&self, block: u64, buf: &[u8]) -> Result<(), Self::Error>;
}

impl<T: BlockDevice + ?Sized> BlockDevice for &T {
    type Error = T::Error;

    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn read_blocks(&self, block: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read_blocks(block, buf)
    }

    fn write_blocks(&self, block: u64, buf: &[u8]) -> Result<(), Self::Error> {
        (**self).write_blocks(block, buf)
    }
}
