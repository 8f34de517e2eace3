use crate::commands::Cdb;

pub const CBW_SIGNATURE: u32 = 0x4342_5355;
pub const CBW_LEN: usize = 31;
const CBW_FLAG_DATA_IN: u8 = 0x80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandBlockWrapper {
    pub tag: u32,
    pub data_transfer_length: u32,
    pub direction: Direction,
    pub lun: u8,
    pub cdb: Cdb,
}

impl CommandBlockWrapper {
    pub fn new(tag: u32, data_transfer_length: u32, direction: Direction, lun: u8, cdb: Cdb) -> Self {
        Self {
            tag,
            data_transfer_length,
            direction,
            lun,
            cdb,
        }
    }

    pub fn to_bytes(&self) -> [u8; CBW_LEN] {
        let mut out = [0u8; CBW_LEN];
        out[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        out[4..8].copy_from_slice(&self.tag.to_le_bytes());
        out[8..12].copy_from_slice(&self.data_transfer_length.to_le_bytes());
        out[12] = match self.direction {
            Direction::In => CBW_FLAG_DATA_IN,
            _ => 0,
        };
        out[13] = self.lun & 0x0F;
        let cdb = self.cdb.as_bytes();
        out[14] = cdb.len() as u8;
        out[15..15 + cdb.len()].copy_from_slice(cdb);
        out
    }

    /// Decodes a wrapper as a device would see it on the bulk-out pipe.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() != CBW_LEN {
            return None;
        }
        let signature = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if signature != CBW_SIGNATURE {
            return None;
        }
        let tag = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let data_transfer_length = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        let direction = if data_transfer_length == 0 {
            Direction::None
        } else if (raw[12] & CBW_FLAG_DATA_IN) != 0 {
            Direction::In
        } else {
            Direction::Out
        };
        let cdb_len = raw[14] as usize;
        if cdb_len == 0 || cdb_len > CBW_LEN - 15 {
            return None;
        }
        let cdb = Cdb::from_slice(&raw[15..15 + cdb_len])?;
        Some(Self {
            tag,
            data_transfer_length,
            direction,
            lun: raw[13] & 0x0F,
            cdb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ScsiCommand;

    #[test]
    fn read10_wrapper_layout() {
        let command = ScsiCommand::Read10 {
            lba: 0x0102_0304,
            blocks: 2,
            block_size: 512,
        };
        let cbw = CommandBlockWrapper::new(7, command.data_transfer_length(), command.direction(), 1, command.cdb());
        let raw = cbw.to_bytes();

        assert_eq!(&raw[0..4], b"USBC");
        assert_eq!(u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]), 7);
        assert_eq!(u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]), 1024);
        assert_eq!(raw[12], 0x80);
        assert_eq!(raw[13], 1);
        assert_eq!(raw[14], 10);
        assert_eq!(raw[15], 0x28);
        assert_eq!(&raw[17..21], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&raw[22..24], &[0x00, 0x02]);
        assert_eq!(CommandBlockWrapper::parse(&raw), Some(cbw));
    }

    #[test]
    fn write_direction_leaves_flag_clear() {
        let command = ScsiCommand::Write10 {
            lba: 0,
            blocks: 1,
            block_size: 512,
        };
        let raw = CommandBlockWrapper::new(1, 512, command.direction(), 0, command.cdb()).to_bytes();
        assert_eq!(raw[12], 0);
        assert_eq!(raw[15], 0x2A);
    }

    #[test]
    fn parse_rejects_bad_signature() {
        let mut raw = CommandBlockWrapper::new(1, 0, Direction::None, 0, ScsiCommand::TestUnitReady.cdb()).to_bytes();
        raw[0] = b'X';
        assert!(CommandBlockWrapper::parse(&raw).is_none());
    }
}
