use core::fmt;

pub const SENSE_FIXED_LEN: u8 = 18;
pub const SENSE_MIN_LEN: usize = 14;
pub const SENSE_HEADER_LEN: u8 = 8;

const ASC_NOT_READY: u8 = 0x04;
const ASC_MEDIUM_NOT_PRESENT: u8 = 0x3A;
const ASC_WRITE_ERROR: u8 = 0x0C;
const ASC_UNRECOVERED_READ: u8 = 0x11;
const ASC_MEDIUM_FORMAT_CORRUPTED: u8 = 0x31;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenseKey {
    NoSense,
    RecoveredError,
    NotReady,
    MediumError,
    HardwareError,
    IllegalRequest,
    UnitAttention,
    DataProtect,
    BlankCheck,
    VendorSpecific,
    CopyAborted,
    AbortedCommand,
    VolumeOverflow,
    Miscompare,
    Completed,
    Reserved(u8),
}

impl SenseKey {
    pub fn from_code(code: u8) -> Self {
        match code & 0x0F {
            0x0 => SenseKey::NoSense,
            0x1 => SenseKey::RecoveredError,
            0x2 => SenseKey::NotReady,
            0x3 => SenseKey::MediumError,
            0x4 => SenseKey::HardwareError,
            0x5 => SenseKey::IllegalRequest,
            0x6 => SenseKey::UnitAttention,
            0x7 => SenseKey::DataProtect,
            0x8 => SenseKey::BlankCheck,
            0x9 => SenseKey::VendorSpecific,
            0xA => SenseKey::CopyAborted,
            0xB => SenseKey::AbortedCommand,
            0xD => SenseKey::VolumeOverflow,
            0xE => SenseKey::Miscompare,
            0xF => SenseKey::Completed,
            other => SenseKey::Reserved(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SenseResponse {
    pub response_code: u8,
    pub valid: bool,
    pub sense_key: SenseKey,
    pub information: u32,
    pub additional_length: u8,
    pub command_specific: u32,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseResponse {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < SENSE_MIN_LEN {
            return None;
        }
        Some(Self {
            response_code: data[0] & 0x7F,
            valid: (data[0] & 0x80) != 0,
            sense_key: SenseKey::from_code(data[2]),
            information: u32::from_be_bytes([data[3], data[4], data[5], data[6]]),
            additional_length: data[7],
            command_specific: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            asc: data[12],
            ascq: data[13],
        })
    }

    pub fn announced_len(&self) -> usize {
        self.additional_length as usize + SENSE_HEADER_LEN as usize
    }

    pub fn classify(&self) -> Result<SenseNote, SenseError> {
        let sense = *self;
        match self.sense_key {
            SenseKey::NoSense => Ok(SenseNote::NoSense),
            SenseKey::RecoveredError => Ok(SenseNote::Recovered),
            SenseKey::Completed => Ok(SenseNote::Completed),
            SenseKey::NotReady => Err(classify_not_ready(sense)),
            SenseKey::MediumError => Err(match self.asc {
                ASC_WRITE_ERROR => SenseError::MediumWrite(sense),
                ASC_UNRECOVERED_READ => SenseError::MediumRead(sense),
                ASC_MEDIUM_FORMAT_CORRUPTED => SenseError::MediumCorrupted(sense),
                _ => SenseError::Medium(sense),
            }),
            SenseKey::HardwareError => Err(SenseError::Hardware(sense)),
            SenseKey::IllegalRequest => Err(SenseError::IllegalRequest(sense)),
            SenseKey::UnitAttention => Err(SenseError::UnitAttention(sense)),
            SenseKey::DataProtect => Err(SenseError::DataProtect(sense)),
            SenseKey::BlankCheck => Err(SenseError::BlankCheck(sense)),
            SenseKey::CopyAborted => Err(SenseError::CopyAborted(sense)),
            SenseKey::AbortedCommand => Err(SenseError::Aborted(sense)),
            SenseKey::VolumeOverflow => Err(SenseError::VolumeOverflow(sense)),
            SenseKey::Miscompare => Err(SenseError::Miscompare(sense)),
            SenseKey::VendorSpecific | SenseKey::Reserved(_) => Err(SenseError::Unknown(sense)),
        }
    }
}

fn classify_not_ready(sense: SenseResponse) -> SenseError {
    // Medium absence is decided by the ASC alone; ASCQ varies by vendor.
    if sense.asc == ASC_MEDIUM_NOT_PRESENT {
        return SenseError::MediaNotInserted(sense);
    }
    if sense.asc == ASC_NOT_READY {
        return match sense.ascq {
            0x01 | 0x04 | 0x07 | 0x09 => SenseError::NotReadyTryAgain(sense),
            0x03 => SenseError::NotReadyManualIntervention(sense),
            0x12 => SenseError::NotReadyOffline(sense),
            0x22 => SenseError::NotReadyRestartRequired(sense),
            _ => SenseError::NotReady(sense),
        };
    }
    SenseError::NotReady(sense)
}

/// Sense conditions that still count as a successful command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenseNote {
    NoSense,
    Recovered,
    Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenseError {
    NotReadyTryAgain(SenseResponse),
    NotReadyManualIntervention(SenseResponse),
    NotReadyRestartRequired(SenseResponse),
    NotReadyOffline(SenseResponse),
    MediaNotInserted(SenseResponse),
    NotReady(SenseResponse),
    MediumWrite(SenseResponse),
    MediumRead(SenseResponse),
    MediumCorrupted(SenseResponse),
    Medium(SenseResponse),
    Hardware(SenseResponse),
    IllegalRequest(SenseResponse),
    UnitAttention(SenseResponse),
    DataProtect(SenseResponse),
    BlankCheck(SenseResponse),
    CopyAborted(SenseResponse),
    Aborted(SenseResponse),
    VolumeOverflow(SenseResponse),
    Miscompare(SenseResponse),
    Unknown(SenseResponse),
}

/// What a caller is expected to do about a sense condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    ManualIntervention,
    Restart,
    SkipUnit,
    Abort,
}

impl SenseError {
    pub fn response(&self) -> &SenseResponse {
        match self {
            SenseError::NotReadyTryAgain(s)
            | SenseError::NotReadyManualIntervention(s)
            | SenseError::NotReadyRestartRequired(s)
            | SenseError::NotReadyOffline(s)
            | SenseError::MediaNotInserted(s)
            | SenseError::NotReady(s)
            | SenseError::MediumWrite(s)
            | SenseError::MediumRead(s)
            | SenseError::MediumCorrupted(s)
            | SenseError::Medium(s)
            | SenseError::Hardware(s)
            | SenseError::IllegalRequest(s)
            | SenseError::UnitAttention(s)
            | SenseError::DataProtect(s)
            | SenseError::BlankCheck(s)
            | SenseError::CopyAborted(s)
            | SenseError::Aborted(s)
            | SenseError::VolumeOverflow(s)
            | SenseError::Miscompare(s)
            | SenseError::Unknown(s) => s,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            SenseError::NotReadyTryAgain(_) => Disposition::Retry,
            SenseError::NotReadyManualIntervention(_) => Disposition::ManualIntervention,
            SenseError::NotReadyRestartRequired(_) => Disposition::Restart,
            SenseError::MediaNotInserted(_) => Disposition::SkipUnit,
            _ => Disposition::Abort,
        }
    }
}

impl fmt::Display for SenseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            SenseError::NotReadyTryAgain(_) => "logical unit not ready, try again",
            SenseError::NotReadyManualIntervention(_) => "manual intervention required",
            SenseError::NotReadyRestartRequired(_) => "power cycle required",
            SenseError::NotReadyOffline(_) => "logical unit offline",
            SenseError::MediaNotInserted(_) => "medium not present",
            SenseError::NotReady(_) => "logical unit not ready",
            SenseError::MediumWrite(_) => "write error",
            SenseError::MediumRead(_) => "unrecovered read error",
            SenseError::MediumCorrupted(_) => "medium format corrupted",
            SenseError::Medium(_) => "medium error",
            SenseError::Hardware(_) => "hardware error",
            SenseError::IllegalRequest(_) => "illegal request",
            SenseError::UnitAttention(_) => "unit attention",
            SenseError::DataProtect(_) => "data protect",
            SenseError::BlankCheck(_) => "blank check",
            SenseError::CopyAborted(_) => "copy aborted",
            SenseError::Aborted(_) => "aborted command",
            SenseError::VolumeOverflow(_) => "volume overflow",
            SenseError::Miscompare(_) => "miscompare",
            SenseError::Unknown(_) => "unknown sense key",
        };
        let s = self.response();
        write!(f, "{} (asc=0x{:02x} ascq=0x{:02x})", what, s.asc, s.ascq)
    }
}
