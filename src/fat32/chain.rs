use msc::BlockDevice;

use super::boot::BootSector;
use crate::{byte_device::ByteDevice, error::FatError};

/// Device spans covering `[offset, offset + len)` of a chain.
///
/// Physically consecutive clusters are merged into one span.
struct Runs<'a> {
    boot: &'a BootSector,
    chain: &'a [u32],
    index: usize,
    intra: u64,
    remaining: u64,
}

impl Iterator for Runs<'_> {
    type Item = (u64, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let cluster_size = self.boot.cluster_size() as u64;
        let first = self.chain[self.index];
        let mut end = self.index + 1;
        let mut span = cluster_size - self.intra;
        while span < self.remaining && end < self.chain.len() && self.chain[end] == self.chain[end - 1] + 1 {
            span += cluster_size;
            end += 1;
        }
        let take = span.min(self.remaining);
        let offset = self.boot.cluster_offset(first) + self.intra;

        self.remaining -= take;
        let consumed = self.intra + take;
        self.index += (consumed / cluster_size) as usize;
        self.intra = consumed % cluster_size;
        Some((offset, take as usize))
    }
}

fn runs<'a, E>(
    boot: &'a BootSector,
    chain: &'a [u32],
    offset: u64,
    len: usize,
) -> Result<Runs<'a>, FatError<E>> {
    let cluster_size = boot.cluster_size() as u64;
    let needed = offset + len as u64;
    let allocated = chain.len() as u64 * cluster_size;
    if needed > allocated {
        return Err(FatError::ChainTooShort { needed, allocated });
    }
    Ok(Runs {
        boot,
        chain,
        index: (offset / cluster_size) as usize,
        intra: offset % cluster_size,
        remaining: len as u64,
    })
}

pub fn read<B: BlockDevice>(
    dev: &mut ByteDevice<B>,
    boot: &BootSector,
    chain: &[u32],
    offset: u64,
    buf: &mut [u8],
) -> Result<(), FatError<B::Error>> {
    let mut done = 0usize;
    for (device_offset, len) in runs(boot, chain, offset, buf.len())? {
        dev.read(device_offset, &mut buf[done..done + len])?;
        done += len;
    }
    Ok(())
}

pub fn write<B: BlockDevice>(
    dev: &mut ByteDevice<B>,
    boot: &BootSector,
    chain: &[u32],
    offset: u64,
    data: &[u8],
) -> Result<(), FatError<B::Error>> {
    let mut done = 0usize;
    for (device_offset, len) in runs(boot, chain, offset, data.len())? {
        dev.write(device_offset, &data[done..done + len])?;
        done += len;
    }
    Ok(())
}

pub fn zero<B: BlockDevice>(
    dev: &mut ByteDevice<B>,
    boot: &BootSector,
    chain: &[u32],
    offset: u64,
    len: usize,
) -> Result<(), FatError<B::Error>> {
    let zeros = alloc::vec![0u8; boot.cluster_size() as usize];
    for (mut device_offset, mut len) in runs(boot, chain, offset, len)? {
        while len > 0 {
            let n = len.min(zeros.len());
            dev.write(device_offset, &zeros[..n])?;
            device_offset += n as u64;
            len -= n;
        }
    }
    Ok(())
}
