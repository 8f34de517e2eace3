pub const CSW_SIGNATURE: u32 = 0x5342_5355;
pub const CSW_LEN: usize = 13;

const CSW_STATUS_PASSED: u8 = 0x00;
const CSW_STATUS_FAILED: u8 = 0x01;
const CSW_STATUS_PHASE_ERROR: u8 = 0x02;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Passed,
    Failed,
    PhaseError,
}

impl CommandStatus {
    pub fn code(self) -> u8 {
        match self {
            CommandStatus::Passed => CSW_STATUS_PASSED,
            CommandStatus::Failed => CSW_STATUS_FAILED,
            CommandStatus::PhaseError => CSW_STATUS_PHASE_ERROR,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CswDecodeError {
    BadLength(usize),
    BadSignature(u32),
    BadStatus(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandStatusWrapper {
    pub tag: u32,
    pub data_residue: u32,
    pub status: CommandStatus,
}

impl CommandStatusWrapper {
    pub fn parse(raw: &[u8]) -> Result<Self, CswDecodeError> {
        if raw.len() != CSW_LEN {
            return Err(CswDecodeError::BadLength(raw.len()));
        }
        let signature = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if signature != CSW_SIGNATURE {
            return Err(CswDecodeError::BadSignature(signature));
        }
        let status = match raw[12] {
            CSW_STATUS_PASSED => CommandStatus::Passed,
            CSW_STATUS_FAILED => CommandStatus::Failed,
            CSW_STATUS_PHASE_ERROR => CommandStatus::PhaseError,
            other => return Err(CswDecodeError::BadStatus(other)),
        };
        Ok(Self {
            tag: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            data_residue: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            status,
        })
    }

    pub fn to_bytes(&self) -> [u8; CSW_LEN] {
        let mut out = [0u8; CSW_LEN];
        out[0..4].copy_from_slice(&CSW_SIGNATURE.to_le_bytes());
        out[4..8].copy_from_slice(&self.tag.to_le_bytes());
        out[8..12].copy_from_slice(&self.data_residue.to_le_bytes());
        out[12] = self.status.code();
        out
    }
}
