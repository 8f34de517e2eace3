use alloc::vec;
use alloc::vec::Vec;

use embedded_storage::{ReadStorage, Storage};
use msc::BlockDevice;

use crate::error::FatError;

pub struct ByteDevice<B: BlockDevice> {
    device: B,
    block_size: usize,
    scratch: Vec<u8>,
}

impl<B: BlockDevice> ByteDevice<B> {
    /// Fails on a device that reports no block size yet, such as an uninitialised SCSI unit.
    pub fn new(device: B) -> Result<Self, FatError<B::Error>> {
        let block_size = device.block_size() as usize;
        if block_size == 0 {
            return Err(FatError::ZeroBlockSize);
        }
        Ok(Self {
            device,
            block_size,
            scratch: vec![0u8; block_size],
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn len(&self) -> u64 {
        self.device.block_count().saturating_mul(self.block_size as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn device(&self) -> &B {
        &self.device
    }

    pub fn into_inner(self) -> B {
        self.device
    }

    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), B::Error> {
        let bs = self.block_size as u64;
        let mut block = offset / bs;
        let head = (offset % bs) as usize;
        let mut done = 0usize;

        if head != 0 && !buf.is_empty() {
            self.device.read_blocks(block, &mut self.scratch)?;
            let n = (self.block_size - head).min(buf.len());
            buf[..n].copy_from_slice(&self.scratch[head..head + n]);
            done = n;
            block += 1;
        }

        let whole = (buf.len() - done) / self.block_size * self.block_size;
        if whole > 0 {
            self.device.read_blocks(block, &mut buf[done..done + whole])?;
            done += whole;
            block += (whole / self.block_size) as u64;
        }

        if done < buf.len() {
            self.device.read_blocks(block, &mut self.scratch)?;
            let n = buf.len() - done;
            buf[done..].copy_from_slice(&self.scratch[..n]);
        }
        Ok(())
    }

    pub fn write(&mut self, offset: u64, buf: &[u8]) -> Result<(), B::Error> {
        let bs = self.block_size as u64;
        let mut block = offset / bs;
        let head = (offset % bs) as usize;
        let mut done = 0usize;

        if head != 0 && !buf.is_empty() {
            self.device.read_blocks(block, &mut self.scratch)?;
            let n = (self.block_size - head).min(buf.len());
            self.scratch[head..head + n].copy_from_slice(&buf[..n]);
            self.device.write_blocks(block, &self.scratch)?;
            done = n;
            block += 1;
        }

        let whole = (buf.len() - done) / self.block_size * self.block_size;
        if whole > 0 {
            self.device.write_blocks(block, &buf[done..done + whole])?;
            done += whole;
            block += (whole / self.block_size) as u64;
        }

        if done < buf.len() {
            // Bytes past the request keep their on-disk contents.
            self.device.read_blocks(block, &mut self.scratch)?;
            let n = buf.len() - done;
            self.scratch[..n].copy_from_slice(&buf[done..]);
            self.device.write_blocks(block, &self.scratch)?;
        }
        Ok(())
    }
}

impl<B: BlockDevice> ReadStorage for ByteDevice<B> {
    type Error = B::Error;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        ByteDevice::read(self, offset as u64, bytes)
    }

    fn capacity(&self) -> usize {
        usize::try_from(self.len()).unwrap_or(usize::MAX)
    }
}

impl<B: BlockDevice> Storage for ByteDevice<B> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        ByteDevice::write(self, offset as u64, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::RamBlockDevice;

    #[test]
    fn unaligned_write_preserves_neighbours() {
        let ram = RamBlockDevice::new(512, 4);
        ram.write_blocks(0, &[0xAAu8; 2048]).unwrap();
        let mut bytes = ByteDevice::new(&ram).unwrap();

        bytes.write(510, &[1, 2, 3, 4, 5]).unwrap();

        let mut raw = [0u8; 1024];
        ram.read_blocks(0, &mut raw).unwrap();
        assert_eq!(raw[509], 0xAA);
        assert_eq!(&raw[510..515], &[1, 2, 3, 4, 5]);
        assert_eq!(raw[515], 0xAA);
        assert_eq!(ram.stats().misaligned, 0);
    }

    #[test]
    fn tail_write_keeps_trailing_bytes() {
        let ram = RamBlockDevice::new(512, 4);
        ram.write_blocks(0, &[0x55u8; 2048]).unwrap();
        let mut bytes = ByteDevice::new(&ram).unwrap();

        bytes.write(512, &[7u8; 600]).unwrap();

        let mut raw = [0u8; 2048];
        ram.read_blocks(0, &mut raw).unwrap();
        assert!(raw[512..1112].iter().all(|&b| b == 7));
        assert!(raw[1112..].iter().all(|&b| b == 0x55));
    }

    #[test]
    fn read_spanning_three_blocks() {
        let ram = RamBlockDevice::new(512, 4);
        let mut pattern = [0u8; 2048];
        for (i, b) in pattern.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        ram.write_blocks(0, &pattern).unwrap();
        let mut bytes = ByteDevice::new(&ram).unwrap();

        let mut out = [0u8; 1100];
        bytes.read(300, &mut out).unwrap();
        assert_eq!(&out[..], &pattern[300..1400]);
    }

    #[test]
    fn embedded_storage_view() {
        let ram = RamBlockDevice::new(512, 2);
        let mut bytes = ByteDevice::new(&ram).unwrap();
        assert_eq!(ReadStorage::capacity(&bytes), 1024);
        Storage::write(&mut bytes, 100, b"hello").unwrap();
        let mut out = [0u8; 5];
        ReadStorage::read(&mut bytes, 100, &mut out).unwrap();
        assert_eq!(&out, b"hello");
    }

    struct Unready;

    impl BlockDevice for Unready {
        type Error = ();

        fn block_size(&self) -> u32 {
            0
        }

        fn block_count(&self) -> u64 {
            0
        }

        fn read_blocks(&self, _block: u64, _buf: &mut [u8]) -> Result<(), ()> {
            Ok(())
        }

        fn write_blocks(&self, _block: u64, _buf: &[u8]) -> Result<(), ()> {
            Ok(())
        }
    }

    #[test]
    fn zero_block_size_is_rejected() {
        assert!(matches!(ByteDevice::new(Unready), Err(FatError::ZeroBlockSize)));
    }
}
