use core::fmt::Write as _;

use crate::cbw::Direction;

pub const OP_TEST_UNIT_READY: u8 = 0x00;
pub const OP_REQUEST_SENSE: u8 = 0x03;
pub const OP_INQUIRY: u8 = 0x12;
pub const OP_READ_CAPACITY_10: u8 = 0x25;
pub const OP_READ_10: u8 = 0x28;
pub const OP_WRITE_10: u8 = 0x2A;

pub const INQUIRY_LEN: u8 = 36;
pub const READ_CAPACITY_LEN: u32 = 8;
const CDB_MAX: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cdb {
    bytes: [u8; CDB_MAX],
    len: u8,
}

impl Cdb {
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        if raw.is_empty() || raw.len() > CDB_MAX {
            return None;
        }
        let mut bytes = [0u8; CDB_MAX];
        bytes[..raw.len()].copy_from_slice(raw);
        Some(Self {
            bytes,
            len: raw.len() as u8,
        })
    }

    fn six(opcode: u8, allocation_length: u8) -> Self {
        let mut bytes = [0u8; CDB_MAX];
        bytes[0] = opcode;
        bytes[4] = allocation_length;
        Self { bytes, len: 6 }
    }

    fn ten(opcode: u8, lba: u32, blocks: u16) -> Self {
        let mut bytes = [0u8; CDB_MAX];
        bytes[0] = opcode;
        bytes[2..6].copy_from_slice(&lba.to_be_bytes());
        bytes[7..9].copy_from_slice(&blocks.to_be_bytes());
        Self { bytes, len: 10 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    /// Logical block address of a 10-byte read/write CDB.
    pub fn lba(&self) -> u32 {
        u32::from_be_bytes([self.bytes[2], self.bytes[3], self.bytes[4], self.bytes[5]])
    }

    /// Transfer length in blocks of a 10-byte read/write CDB.
    pub fn blocks(&self) -> u16 {
        u16::from_be_bytes([self.bytes[7], self.bytes[8]])
    }

    /// Allocation length of a 6-byte CDB.
    pub fn allocation_length(&self) -> u8 {
        self.bytes[4]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScsiCommand {
    TestUnitReady,
    RequestSense { allocation_length: u8 },
    Inquiry { allocation_length: u8 },
    ReadCapacity10,
    Read10 { lba: u32, blocks: u16, block_size: u32 },
    Write10 { lba: u32, blocks: u16, block_size: u32 },
}

impl ScsiCommand {
    pub fn opcode(&self) -> u8 {
        match self {
            ScsiCommand::TestUnitReady => OP_TEST_UNIT_READY,
            ScsiCommand::RequestSense { .. } => OP_REQUEST_SENSE,
            ScsiCommand::Inquiry { .. } => OP_INQUIRY,
            ScsiCommand::ReadCapacity10 => OP_READ_CAPACITY_10,
            ScsiCommand::Read10 { .. } => OP_READ_10,
            ScsiCommand::Write10 { .. } => OP_WRITE_10,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            ScsiCommand::TestUnitReady => Direction::None,
            ScsiCommand::Write10 { .. } => Direction::Out,
            _ => Direction::In,
        }
    }

    pub fn data_transfer_length(&self) -> u32 {
        match *self {
            ScsiCommand::TestUnitReady => 0,
            ScsiCommand::RequestSense { allocation_length }
            | ScsiCommand::Inquiry { allocation_length } => allocation_length as u32,
            ScsiCommand::ReadCapacity10 => READ_CAPACITY_LEN,
            ScsiCommand::Read10 {
                blocks, block_size, ..
            }
            | ScsiCommand::Write10 {
                blocks, block_size, ..
            } => blocks as u32 * block_size,
        }
    }

    pub fn cdb(&self) -> Cdb {
        match *self {
            ScsiCommand::TestUnitReady => Cdb::six(OP_TEST_UNIT_READY, 0),
            ScsiCommand::RequestSense { allocation_length } => {
                Cdb::six(OP_REQUEST_SENSE, allocation_length)
            }
            ScsiCommand::Inquiry { allocation_length } => Cdb::six(OP_INQUIRY, allocation_length),
            ScsiCommand::ReadCapacity10 => Cdb::ten(OP_READ_CAPACITY_10, 0, 0),
            ScsiCommand::Read10 { lba, blocks, .. } => Cdb::ten(OP_READ_10, lba, blocks),
            ScsiCommand::Write10 { lba, blocks, .. } => Cdb::ten(OP_WRITE_10, lba, blocks),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InquiryResponse {
    pub peripheral_qualifier: u8,
    pub peripheral_device_type: u8,
    pub removable: bool,
    pub spc_version: u8,
    pub response_data_format: u8,
    pub vendor: heapless::String<8>,
    pub product: heapless::String<16>,
    pub revision: heapless::String<4>,
}

impl InquiryResponse {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < INQUIRY_LEN as usize {
            return None;
        }
        Some(Self {
            peripheral_qualifier: data[0] >> 5,
            peripheral_device_type: data[0] & 0x1F,
            removable: (data[1] & 0x80) != 0,
            spc_version: data[2],
            response_data_format: data[3] & 0x0F,
            vendor: ascii_field(&data[8..16]),
            product: ascii_field(&data[16..32]),
            revision: ascii_field(&data[32..36]),
        })
    }

    pub fn is_direct_access(&self) -> bool {
        self.peripheral_qualifier == 0 && self.peripheral_device_type == 0
    }
}

fn ascii_field<const N: usize>(raw: &[u8]) -> heapless::String<N> {
    let mut out = heapless::String::new();
    let end = raw.iter().rposition(|&b| b != b' ' && b != 0).map_or(0, |i| i + 1);
    for &b in &raw[..end] {
        let ch = if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' };
        if out.write_char(ch).is_err() {
            break;
        }
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capacity {
    pub last_lba: u32,
    pub block_size: u32,
}

impl Capacity {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < READ_CAPACITY_LEN as usize {
            return None;
        }
        Some(Self {
            last_lba: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            block_size: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        })
    }

    pub fn block_count(&self) -> u64 {
        self.last_lba as u64 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read10_length_is_blocks_times_block_size() {
        let command = ScsiCommand::Read10 {
            lba: 10,
            blocks: 3,
            block_size: 512,
        };
        assert_eq!(command.data_transfer_length(), 1536);
        assert_eq!(command.direction(), Direction::In);
        let cdb = command.cdb();
        assert_eq!(cdb.as_bytes().len(), 10);
        assert_eq!(cdb.lba(), 10);
        assert_eq!(cdb.blocks(), 3);
    }

    #[test]
    fn six_byte_commands() {
        assert_eq!(ScsiCommand::TestUnitReady.cdb().as_bytes(), &[0, 0, 0, 0, 0, 0]);
        assert_eq!(ScsiCommand::TestUnitReady.direction(), Direction::None);
        let sense = ScsiCommand::RequestSense { allocation_length: 18 };
        assert_eq!(sense.cdb().as_bytes(), &[0x03, 0, 0, 0, 18, 0]);
        assert_eq!(sense.data_transfer_length(), 18);
    }

    #[test]
    fn inquiry_parse_trims_identification() {
        let mut data = [0u8; 36];
        data[0] = 0x00;
        data[1] = 0x80;
        data[8..16].copy_from_slice(b"ACME    ");
        data[16..32].copy_from_slice(b"Flash Disk      ");
        data[32..36].copy_from_slice(b"1.00");
        let inquiry = InquiryResponse::parse(&data).unwrap();
        assert!(inquiry.is_direct_access());
        assert!(inquiry.removable);
        assert_eq!(inquiry.vendor.as_str(), "ACME");
        assert_eq!(inquiry.product.as_str(), "Flash Disk");
        assert_eq!(inquiry.revision.as_str(), "1.00");

        data[0] = 0x25;
        let cdrom = InquiryResponse::parse(&data).unwrap();
        assert_eq!(cdrom.peripheral_qualifier, 1);
        assert_eq!(cdrom.peripheral_device_type, 5);
        assert!(!cdrom.is_direct_access());
    }

    #[test]
    fn capacity_is_big_endian() {
        let cap = Capacity::parse(&[0x00, 0x00, 0x0F, 0xFF, 0x00, 0x00, 0x02, 0x00]).unwrap();
        assert_eq!(cap.last_lba, 4095);
        assert_eq!(cap.block_size, 512);
        assert_eq!(cap.block_count(), 4096);
    }
}
