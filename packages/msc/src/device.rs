use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use embedded_hal::delay::DelayNs;

use crate::{
    block::BlockDevice,
    cbw::{CommandBlockWrapper, CBW_LEN},
    commands::{Capacity, InquiryResponse, ScsiCommand, INQUIRY_LEN},
    csw::{CommandStatus, CommandStatusWrapper, CSW_LEN},
    error::ScsiError,
    sense::{SenseError, SenseResponse, SENSE_FIXED_LEN},
    transport::{bulk_only_reset, get_max_lun, UsbTransport},
};

const SENSE_MAX_LEN: usize = 252;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScsiConfig {
    pub lun: u8,
    pub recovery_attempts: u8,
    pub recovery_delay_ms: u32,
    pub not_ready_retries: u8,
    pub not_ready_backoff_ms: u32,
    pub dynamic_sense: bool,
    pub max_blocks_per_transfer: u16,
}

impl Default for ScsiConfig {
    fn default() -> Self {
        Self {
            lun: 0,
            recovery_attempts: 20,
            recovery_delay_ms: 500,
            not_ready_retries: 5,
            not_ready_backoff_ms: 100,
            dynamic_sense: false,
            max_blocks_per_transfer: 128,
        }
    }
}

impl ScsiConfig {
    pub fn with_lun(mut self, lun: u8) -> Self {
        self.lun = lun;
        self
    }

    pub fn with_recovery(mut self, attempts: u8, delay_ms: u32) -> Self {
        self.recovery_attempts = attempts;
        self.recovery_delay_ms = delay_ms;
        self
    }

    pub fn with_not_ready_retries(mut self, retries: u8, backoff_ms: u32) -> Self {
        self.not_ready_retries = retries;
        self.not_ready_backoff_ms = backoff_ms;
        self
    }

    pub fn with_dynamic_sense(mut self, enabled: bool) -> Self {
        self.dynamic_sense = enabled;
        self
    }

    pub fn with_max_blocks_per_transfer(mut self, blocks: u16) -> Self {
        self.max_blocks_per_transfer = blocks.max(1);
        self
    }
}

enum DataPhase<'a> {
    None,
    In(&'a mut [u8]),
    Out(&'a [u8]),
}

struct Session<T, D> {
    transport: T,
    delay: D,
    next_tag: u32,
}

impl<T: UsbTransport, D: DelayNs> Session<T, D> {
    fn execute(
        &mut self,
        config: &ScsiConfig,
        command: ScsiCommand,
        mut data: DataPhase<'_>,
    ) -> Result<CommandStatusWrapper, ScsiError<T::Error>> {
        let mut retries = 0u8;
        loop {
            match self.execute_once(config, command, &mut data) {
                Err(ScsiError::Sense(SenseError::NotReadyTryAgain(sense)))
                    if retries < config.not_ready_retries =>
                {
                    retries += 1;
                    log::debug!(
                        "msc: not_ready_retry op=0x{:02x} attempt={} ascq=0x{:02x}",
                        command.opcode(),
                        retries,
                        sense.ascq
                    );
                    self.delay.delay_ms(config.not_ready_backoff_ms);
                }
                other => return other,
            }
        }
    }

    fn execute_once(
        &mut self,
        config: &ScsiConfig,
        command: ScsiCommand,
        data: &mut DataPhase<'_>,
    ) -> Result<CommandStatusWrapper, ScsiError<T::Error>> {
        let csw = self.transfer_with_recovery(config, command, data)?;
        match csw.status {
            CommandStatus::Passed => Ok(csw),
            CommandStatus::PhaseError => {
                log::warn!("msc: phase_error op=0x{:02x} tag={}", command.opcode(), csw.tag);
                self.reset_recovery()?;
                Err(ScsiError::PhaseError)
            }
            CommandStatus::Failed => {
                let sense = self.request_sense(config)?;
                match sense.classify() {
                    Ok(note) => {
                        log::debug!("msc: csw_failed_benign op=0x{:02x} note={:?}", command.opcode(), note);
                        Ok(csw)
                    }
                    Err(err) => {
                        log::debug!(
                            "msc: csw_failed op=0x{:02x} key={:?} asc=0x{:02x} ascq=0x{:02x}",
                            command.opcode(),
                            sense.sense_key,
                            sense.asc,
                            sense.ascq
                        );
                        Err(ScsiError::Sense(err))
                    }
                }
            }
        }
    }

    fn request_sense(&mut self, config: &ScsiConfig) -> Result<SenseResponse, ScsiError<T::Error>> {
        let mut buf = [0u8; SENSE_MAX_LEN];
        let sense = self.sense_round(config, &mut buf[..SENSE_FIXED_LEN as usize])?;
        if !config.dynamic_sense || sense.announced_len() <= SENSE_FIXED_LEN as usize {
            return Ok(sense);
        }
        let len = sense.announced_len().min(SENSE_MAX_LEN);
        self.sense_round(config, &mut buf[..len])
    }

    fn sense_round(
        &mut self,
        config: &ScsiConfig,
        buf: &mut [u8],
    ) -> Result<SenseResponse, ScsiError<T::Error>> {
        let command = ScsiCommand::RequestSense {
            allocation_length: buf.len() as u8,
        };
        let csw = self.transfer_with_recovery(config, command, &mut DataPhase::In(&mut *buf))?;
        if csw.status != CommandStatus::Passed {
            return Err(ScsiError::CommandFailed);
        }
        SenseResponse::parse(buf).ok_or(ScsiError::CommandFailed)
    }

    fn transfer_with_recovery(
        &mut self,
        config: &ScsiConfig,
        command: ScsiCommand,
        data: &mut DataPhase<'_>,
    ) -> Result<CommandStatusWrapper, ScsiError<T::Error>> {
        let mut attempt = 0u8;
        loop {
            match self.transfer(config.lun, command, data) {
                Err(err) if err.is_transport_fault() && attempt < config.recovery_attempts => {
                    log::warn!(
                        "msc: transfer_fault op=0x{:02x} attempt={} err={:?}",
                        command.opcode(),
                        attempt,
                        err
                    );
                    self.recovery_step(attempt);
                    self.delay.delay_ms(config.recovery_delay_ms);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    // Alternate between a class reset with halt clearing and a port reset.
    fn recovery_step(&mut self, attempt: u8) {
        let result = if attempt % 2 == 0 {
            bulk_only_reset(&mut self.transport)
        } else {
            self.transport.reset_device()
        };
        if let Err(err) = result {
            log::warn!("msc: recovery_step_failed attempt={} err={:?}", attempt, err);
        }
    }

    fn reset_recovery(&mut self) -> Result<(), ScsiError<T::Error>> {
        bulk_only_reset(&mut self.transport).map_err(ScsiError::Transport)
    }

    fn transfer(
        &mut self,
        lun: u8,
        command: ScsiCommand,
        data: &mut DataPhase<'_>,
    ) -> Result<CommandStatusWrapper, ScsiError<T::Error>> {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);

        let length = command.data_transfer_length() as usize;
        let cbw = CommandBlockWrapper::new(tag, length as u32, command.direction(), lun, command.cdb());
        let raw = cbw.to_bytes();
        let written = self.transport.bulk_out(&raw).map_err(ScsiError::Transport)?;
        if written != CBW_LEN {
            return Err(ScsiError::ShortTransfer {
                expected: CBW_LEN,
                actual: written,
            });
        }

        match data {
            DataPhase::None => {}
            DataPhase::In(buf) => {
                let available = buf.len();
                let target = buf.get_mut(..length).ok_or(ScsiError::InvalidLength {
                    len: available,
                    block_size: length as u32,
                })?;
                read_exact(&mut self.transport, target)?;
            }
            DataPhase::Out(buf) => {
                let available = buf.len();
                let source = buf.get(..length).ok_or(ScsiError::InvalidLength {
                    len: available,
                    block_size: length as u32,
                })?;
                write_all(&mut self.transport, source)?;
            }
        }

        let mut raw_csw = [0u8; CSW_LEN];
        let read = self.transport.bulk_in(&mut raw_csw).map_err(ScsiError::Transport)?;
        let csw = CommandStatusWrapper::parse(&raw_csw[..read.min(CSW_LEN)])?;
        if csw.tag != tag {
            return Err(ScsiError::TagMismatch {
                expected: tag,
                actual: csw.tag,
            });
        }
        if csw.data_residue != 0 {
            log::debug!("msc: csw_residue op=0x{:02x} residue={}", command.opcode(), csw.data_residue);
        }
        Ok(csw)
    }
}

fn read_exact<T: UsbTransport>(transport: &mut T, buf: &mut [u8]) -> Result<(), ScsiError<T::Error>> {
    let mut done = 0usize;
    while done < buf.len() {
        let n = transport.bulk_in(&mut buf[done..]).map_err(ScsiError::Transport)?;
        if n == 0 {
            return Err(ScsiError::ShortTransfer {
                expected: buf.len(),
                actual: done,
            });
        }
        done = done.saturating_add(n);
    }
    Ok(())
}

fn write_all<T: UsbTransport>(transport: &mut T, buf: &[u8]) -> Result<(), ScsiError<T::Error>> {
    let mut done = 0usize;
    while done < buf.len() {
        let n = transport.bulk_out(&buf[done..]).map_err(ScsiError::Transport)?;
        if n == 0 {
            return Err(ScsiError::ShortTransfer {
                expected: buf.len(),
                actual: done,
            });
        }
        done = done.saturating_add(n);
    }
    Ok(())
}

/// SCSI transparent command set over bulk-only transport, for one logical unit.
///
/// Every command runs inside one critical section of `M`; a command issued
/// while another is in flight on the same device fails with
/// [`ScsiError::Busy`].
pub struct ScsiBlockDevice<M: RawMutex, T: UsbTransport, D: DelayNs> {
    session: Mutex<M, RefCell<Session<T, D>>>,
    config: ScsiConfig,
    block_size: u32,
    block_count: u64,
    inquiry: Option<InquiryResponse>,
}

impl<M: RawMutex, T: UsbTransport, D: DelayNs> ScsiBlockDevice<M, T, D> {
    pub fn new(transport: T, delay: D, config: ScsiConfig) -> Self {
        Self {
            session: Mutex::new(RefCell::new(Session {
                transport,
                delay,
                next_tag: 1,
            })),
            config,
            block_size: 0,
            block_count: 0,
            inquiry: None,
        }
    }

    /// Initializes the first logical unit that has media inserted.
    pub fn open(transport: T, delay: D, config: ScsiConfig) -> Result<Self, ScsiError<T::Error>> {
        let mut device = Self::new(transport, delay, config);
        let max_lun = device.with_session(|session| Ok(get_max_lun(&mut session.transport)))?;
        log::info!("msc: luns max_lun={}", max_lun);
        for lun in 0..=max_lun {
            device.config.lun = lun;
            match device.init() {
                Ok(()) => return Ok(device),
                Err(err) if err.is_media_not_inserted() => {
                    log::info!("msc: lun_skipped lun={} reason=no_media", lun);
                }
                Err(err) => return Err(err),
            }
        }
        Err(ScsiError::NoMedia)
    }

    pub fn init(&mut self) -> Result<(), ScsiError<T::Error>> {
        let inquiry = self.inquiry()?;
        log::info!(
            "msc: inquiry lun={} vendor={} product={} removable={}",
            self.config.lun,
            inquiry.vendor,
            inquiry.product,
            inquiry.removable
        );
        if !inquiry.is_direct_access() {
            return Err(ScsiError::UnsupportedDevice {
                qualifier: inquiry.peripheral_qualifier,
                device_type: inquiry.peripheral_device_type,
            });
        }

        if let Err(err) = self.test_unit_ready() {
            log::warn!("msc: unit_not_ready lun={} err={:?}", self.config.lun, err);
        }

        let capacity = self.read_capacity()?;
        if capacity.block_size == 0 {
            return Err(ScsiError::InvalidResponse);
        }
        self.block_size = capacity.block_size;
        self.block_count = capacity.block_count();
        self.inquiry = Some(inquiry);
        log::info!(
            "msc: capacity lun={} block_size={} blocks={}",
            self.config.lun,
            self.block_size,
            self.block_count
        );
        Ok(())
    }

    pub fn lun(&self) -> u8 {
        self.config.lun
    }

    pub fn config(&self) -> &ScsiConfig {
        &self.config
    }

    pub fn inquiry_data(&self) -> Option<&InquiryResponse> {
        self.inquiry.as_ref()
    }

    pub fn inquiry(&self) -> Result<InquiryResponse, ScsiError<T::Error>> {
        let mut buf = [0u8; INQUIRY_LEN as usize];
        self.run(
            ScsiCommand::Inquiry {
                allocation_length: INQUIRY_LEN,
            },
            DataPhase::In(&mut buf),
        )?;
        InquiryResponse::parse(&buf).ok_or(ScsiError::InvalidResponse)
    }

    pub fn test_unit_ready(&self) -> Result<(), ScsiError<T::Error>> {
        self.run(ScsiCommand::TestUnitReady, DataPhase::None).map(|_| ())
    }

    pub fn read_capacity(&self) -> Result<Capacity, ScsiError<T::Error>> {
        let mut buf = [0u8; 8];
        self.run(ScsiCommand::ReadCapacity10, DataPhase::In(&mut buf))?;
        Capacity::parse(&buf).ok_or(ScsiError::InvalidResponse)
    }

    pub fn request_sense(&self) -> Result<SenseResponse, ScsiError<T::Error>> {
        let config = self.config;
        self.with_session(|session| session.request_sense(&config))
    }

    pub fn reset_recovery(&self) -> Result<(), ScsiError<T::Error>> {
        self.with_session(|session| session.reset_recovery())
    }

    pub fn read10(&self, block: u64, buf: &mut [u8]) -> Result<(), ScsiError<T::Error>> {
        self.check_range(block, buf.len())?;
        let block_size = self.block_size as usize;
        let chunk_len = self.config.max_blocks_per_transfer.max(1) as usize * block_size;
        let mut lba = block;
        for chunk in buf.chunks_mut(chunk_len) {
            let blocks = chunk.len() / block_size;
            let command = ScsiCommand::Read10 {
                lba: u32::try_from(lba).map_err(|_| ScsiError::LbaOutOfRange(lba))?,
                blocks: blocks as u16,
                block_size: self.block_size,
            };
            self.run(command, DataPhase::In(chunk))?;
            lba += blocks as u64;
        }
        Ok(())
    }

    pub fn write10(&self, block: u64, buf: &[u8]) -> Result<(), ScsiError<T::Error>> {
        self.check_range(block, buf.len())?;
        let block_size = self.block_size as usize;
        let chunk_len = self.config.max_blocks_per_transfer.max(1) as usize * block_size;
        let mut lba = block;
        for chunk in buf.chunks(chunk_len) {
            let blocks = chunk.len() / block_size;
            let command = ScsiCommand::Write10 {
                lba: u32::try_from(lba).map_err(|_| ScsiError::LbaOutOfRange(lba))?,
                blocks: blocks as u16,
                block_size: self.block_size,
            };
            self.run(command, DataPhase::Out(chunk))?;
            lba += blocks as u64;
        }
        Ok(())
    }

    pub fn into_parts(self) -> (T, D) {
        let session = self.session.into_inner().into_inner();
        (session.transport, session.delay)
    }

    fn check_range(&self, block: u64, len: usize) -> Result<(), ScsiError<T::Error>> {
        let block_size = self.block_size;
        if block_size == 0 || len % block_size as usize != 0 {
            return Err(ScsiError::InvalidLength { len, block_size });
        }
        let blocks = (len / block_size as usize) as u64;
        let end = block.checked_add(blocks).ok_or(ScsiError::LbaOutOfRange(block))?;
        if end > self.block_count {
            return Err(ScsiError::LbaOutOfRange(end.saturating_sub(1)));
        }
        Ok(())
    }

    fn run(
        &self,
        command: ScsiCommand,
        data: DataPhase<'_>,
    ) -> Result<CommandStatusWrapper, ScsiError<T::Error>> {
        let config = self.config;
        self.with_session(|session| session.execute(&config, command, data))
    }

    fn with_session<R>(
        &self,
        f: impl FnOnce(&mut Session<T, D>) -> Result<R, ScsiError<T::Error>>,
    ) -> Result<R, ScsiError<T::Error>> {
        self.session.lock(|cell| {
            let mut session = cell.try_borrow_mut().map_err(|_| ScsiError::Busy)?;
            f(&mut session)
        })
    }
}

impl<M: RawMutex, T: UsbTransport, D: DelayNs> BlockDevice for ScsiBlockDevice<M, T, D> {
    type Error = ScsiError<T::Error>;

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_blocks(&self, block: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.read10(block, buf)
    }

    fn write_blocks(&self, block: u64, buf: &[u8]) -> Result<(), Self::Error> {
        self.write10(block, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cbw::Direction, transport::{ControlRequest, Endpoint}};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::collections::VecDeque;

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    /// Replays scripted device responses and records everything the host sends.
    #[derive(Default)]
    struct Scripted {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
        controls: Vec<ControlRequest>,
        halts: Vec<Endpoint>,
        resets: usize,
        fail_next_out: bool,
    }

    impl Scripted {
        fn reply(&mut self, data: &[u8]) {
            self.replies.push_back(data.to_vec());
        }

        fn csw(&mut self, tag: u32, status: CommandStatus) {
            let raw = CommandStatusWrapper {
                tag,
                data_residue: 0,
                status,
            }
            .to_bytes();
            self.reply(&raw);
        }
    }

    impl UsbTransport for Scripted {
        type Error = &'static str;

        fn interface_number(&self) -> u16 {
            0
        }

        fn bulk_out(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
            if self.fail_next_out {
                self.fail_next_out = false;
                return Err("stall");
            }
            self.sent.push(data.to_vec());
            Ok(data.len())
        }

        fn bulk_in(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let next = self.replies.pop_front().ok_or("no reply")?;
            buf[..next.len()].copy_from_slice(&next);
            Ok(next.len())
        }

        fn control_transfer(
            &mut self,
            request: ControlRequest,
            _data: &mut [u8],
        ) -> Result<usize, Self::Error> {
            self.controls.push(request);
            Ok(0)
        }

        fn clear_halt(&mut self, endpoint: Endpoint) -> Result<(), Self::Error> {
            self.halts.push(endpoint);
            Ok(())
        }

        fn reset_device(&mut self) -> Result<(), Self::Error> {
            self.resets += 1;
            Ok(())
        }
    }

    fn device(script: Scripted) -> ScsiBlockDevice<NoopRawMutex, Scripted, NoDelay> {
        let mut dev = ScsiBlockDevice::new(script, NoDelay, ScsiConfig::default());
        dev.block_size = 512;
        dev.block_count = 64;
        dev
    }

    fn sense_bytes(key: u8, asc: u8, ascq: u8) -> [u8; 18] {
        let mut raw = [0u8; 18];
        raw[0] = 0x70;
        raw[2] = key;
        raw[7] = 10;
        raw[12] = asc;
        raw[13] = ascq;
        raw
    }

    #[test]
    fn failed_status_is_classified_through_request_sense() {
        let mut script = Scripted::default();
        script.csw(1, CommandStatus::Failed);
        script.reply(&sense_bytes(0x02, 0x3A, 0x00));
        script.csw(2, CommandStatus::Passed);
        let dev = device(script);

        let err = dev.test_unit_ready().unwrap_err();
        assert!(err.is_media_not_inserted());

        let (transport, _) = dev.into_parts();
        let sense_cbw = CommandBlockWrapper::parse(&transport.sent[1]).unwrap();
        assert_eq!(sense_cbw.cdb.opcode(), 0x03);
        assert_eq!(sense_cbw.data_transfer_length, 18);
        assert_eq!(sense_cbw.direction, Direction::In);
    }

    #[test]
    fn not_ready_try_again_is_retried() {
        let mut script = Scripted::default();
        script.csw(1, CommandStatus::Failed);
        script.reply(&sense_bytes(0x02, 0x04, 0x01));
        script.csw(2, CommandStatus::Passed);
        script.csw(3, CommandStatus::Passed);
        let dev = device(script);

        dev.test_unit_ready().unwrap();
        let (transport, _) = dev.into_parts();
        assert_eq!(transport.sent.len(), 3);
    }

    #[test]
    fn tag_mismatch_triggers_recovery_then_retry() {
        let mut script = Scripted::default();
        script.csw(99, CommandStatus::Passed);
        script.csw(2, CommandStatus::Passed);
        let dev = device(script);

        dev.test_unit_ready().unwrap();
        let (transport, _) = dev.into_parts();
        assert_eq!(transport.controls, vec![ControlRequest::bulk_only_reset(0)]);
        assert_eq!(transport.halts, vec![Endpoint::BulkIn, Endpoint::BulkOut]);
        assert_eq!(transport.resets, 0);
    }

    #[test]
    fn recovery_alternates_reset_kinds_then_gives_up() {
        let mut script = Scripted::default();
        script.fail_next_out = true;
        let mut dev = ScsiBlockDevice::<NoopRawMutex, _, _>::new(
            script,
            NoDelay,
            ScsiConfig::default().with_recovery(2, 0),
        );
        dev.block_size = 512;
        dev.block_count = 8;

        // First attempt stalls, second finds no reply, third gives up.
        let err = dev.test_unit_ready().unwrap_err();
        assert!(matches!(err, ScsiError::Transport("no reply")));
        let (transport, _) = dev.into_parts();
        assert_eq!(transport.controls.len(), 1);
        assert_eq!(transport.resets, 1);
    }

    #[test]
    fn dynamic_sense_reissues_with_announced_length() {
        let mut script = Scripted::default();
        let mut long = sense_bytes(0x05, 0x24, 0x00);
        long[7] = 14;
        script.reply(&long);
        script.csw(1, CommandStatus::Passed);
        let mut full = [0u8; 22];
        full[..18].copy_from_slice(&long);
        script.reply(&full);
        script.csw(2, CommandStatus::Passed);
        let mut dev = device(script);
        dev.config = dev.config.with_dynamic_sense(true);

        let sense = dev.request_sense().unwrap();
        assert_eq!(sense.asc, 0x24);
        let (transport, _) = dev.into_parts();
        let second = CommandBlockWrapper::parse(&transport.sent[1]).unwrap();
        assert_eq!(second.data_transfer_length, 22);
    }

    #[test]
    fn read_rejects_partial_blocks_and_out_of_range() {
        let dev = device(Scripted::default());
        let mut buf = [0u8; 100];
        assert!(matches!(
            dev.read10(0, &mut buf),
            Err(ScsiError::InvalidLength { len: 100, block_size: 512 })
        ));
        let mut two = [0u8; 1024];
        assert!(matches!(dev.read10(63, &mut two), Err(ScsiError::LbaOutOfRange(64))));
    }

    #[test]
    fn large_reads_are_split_per_transfer_limit() {
        let mut script = Scripted::default();
        script.reply(&[1u8; 1024]);
        script.csw(1, CommandStatus::Passed);
        script.reply(&[2u8; 512]);
        script.csw(2, CommandStatus::Passed);
        let mut dev = device(script);
        dev.config = dev.config.with_max_blocks_per_transfer(2);

        let mut buf = [0u8; 1536];
        dev.read10(4, &mut buf).unwrap();
        assert!(buf[..1024].iter().all(|&b| b == 1));
        assert!(buf[1024..].iter().all(|&b| b == 2));
        let (transport, _) = dev.into_parts();
        let first = CommandBlockWrapper::parse(&transport.sent[0]).unwrap();
        let second = CommandBlockWrapper::parse(&transport.sent[1]).unwrap();
        assert_eq!((first.cdb.lba(), first.cdb.blocks()), (4, 2));
        assert_eq!((second.cdb.lba(), second.cdb.blocks()), (6, 1));
    }
}
