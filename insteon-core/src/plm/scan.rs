//! Device link table reads and writes.
//!
//! Engine version 0 devices are read one byte at a time: `set_address_msb`
//! selects a page, then `peek_one_byte` returns the byte under the cursor in
//! the ack's cmd_2. Later engines return a whole record in an extended reply
//! to `read_aldb`, caught by a trigger keyed on the requested address.

use super::Plm;
use crate::aldb::{AldbCursor, AldbKey, LinkRecord, ScanStep, RECORD_LEN};
use crate::commands;
use crate::conversation::Label;
use crate::device::ScanMode;
use crate::error::CoreError;
use crate::event::NetworkEvent;
use crate::node::{Node, NodeId};
use crate::queue::MessageToken;
use crate::trigger::FramePredicate;
use insteon_protocol::{Address, Field, PlmCommand, PlmMessage};
use std::time::Instant;

/// Sub-command of `read_aldb`/`write_aldb` in `usr_2` of a record reply.
const ALDB_RECORD_RESPONSE: u8 = 0x01;

fn read_trigger_name(address: Address) -> String {
    format!("aldb_read_{address}")
}

/// Eight record bytes carried in `usr_6..=usr_13`.
fn record_from_user_data(msg: &PlmMessage) -> Option<LinkRecord> {
    let user = msg.insteon()?.user_data()?;
    let mut record = [0u8; RECORD_LEN];
    record.copy_from_slice(&user[5..5 + RECORD_LEN]);
    Some(LinkRecord(record))
}

impl Plm {
    /// Clears the cached link table of a device and reads it again.
    ///
    /// When the engine version is unknown it is requested first and the read
    /// starts once the answer arrives.
    pub fn query_device_aldb(&mut self, address: Address, now: Instant) -> Result<(), CoreError> {
        let device = self.device_or_err(address)?;
        let Some(mode) = device.scan_mode() else {
            device.set_scan_deferred(true);
            self.queue_device(address, commands::GET_ENGINE_VERSION, &[], Label::QUERY_ALDB, now)?;
            return Ok(());
        };

        device.set_scan_deferred(false);
        device.core_mut().aldb.clear();
        *device.cursor_mut() = AldbCursor::START;
        tracing::info!("[{}] Reading link table of {} ({:?})", self.name, address, mode);
        match mode {
            ScanMode::Legacy => {
                self.queue_device(address, commands::SET_ADDRESS_MSB, &[], Label::QUERY_ALDB, now)?;
            }
            ScanMode::Extended => self.request_record(address, now)?,
        }
        Ok(())
    }

    /// Queues a `read_aldb` at the cursor and waits for the record reply.
    fn request_record(&mut self, address: Address, now: Instant) -> Result<(), CoreError> {
        let cursor = self.device_or_err(address)?.cursor();
        self.queue_device(address, commands::READ_ALDB, &[], Label::QUERY_ALDB, now)?;

        let predicate = FramePredicate::new()
            .command(PlmCommand::InsteonExtReceived)
            .field(Field::FromAddrHi, address.hi())
            .field(Field::FromAddrMid, address.mid())
            .field(Field::FromAddrLow, address.low())
            .field(Field::Cmd1, 0x2F)
            .field(Field::Usr(2), ALDB_RECORD_RESPONSE)
            .field(Field::Usr(3), cursor.msb)
            .field(Field::Usr(4), cursor.lsb);
        let expires = self.config.trigger_ttl().map(|ttl| now + ttl);
        self.triggers.register(
            read_trigger_name(address),
            predicate,
            expires,
            Box::new(move |plm: &mut Plm, msg: &PlmMessage, now: Instant| {
                plm.on_record_read(address, msg, now)
            }),
        );
        Ok(())
    }

    fn on_record_read(&mut self, address: Address, msg: &PlmMessage, now: Instant) {
        let Some(record) = record_from_user_data(msg) else {
            return;
        };
        let Some(device) = self.devices.get_mut(&address) else {
            return;
        };
        let mut cursor = device.cursor();
        let step = device.core_mut().aldb.apply_record(&mut cursor, record);
        *device.cursor_mut() = cursor;
        device.core_mut().refresh(&Label::QUERY_ALDB, now);

        match step {
            ScanStep::Finished => self.finish_device_scan(address, now),
            ScanStep::Continue | ScanStep::NextPage => {
                if let Err(e) = self.request_record(address, now) {
                    tracing::warn!(
                        "[{}] Failed to continue link table read of {}: {}",
                        self.name,
                        address,
                        e
                    );
                }
            }
        }
    }

    fn legacy_scan_active(&self, address: Address) -> bool {
        self.devices
            .get(&address)
            .is_some_and(|device| *device.active_label() == Label::QUERY_ALDB)
    }

    pub(super) fn on_set_msb_ack(&mut self, address: Address, msb: u8, now: Instant) {
        let on_page = self.devices.get(&address).is_some_and(|d| d.cursor().msb == msb);
        if !self.legacy_scan_active(address) || !on_page {
            return;
        }
        if let Err(e) =
            self.queue_device(address, commands::PEEK_ONE_BYTE, &[], Label::QUERY_ALDB, now)
        {
            tracing::warn!("[{}] Failed to peek link table of {}: {}", self.name, address, e);
        }
    }

    pub(super) fn on_peek_ack(&mut self, address: Address, byte: u8, now: Instant) {
        if !self.legacy_scan_active(address) {
            return;
        }
        let Some(device) = self.devices.get_mut(&address) else {
            return;
        };
        let mut cursor = device.cursor();
        let step = device.core_mut().aldb.apply_peek(&mut cursor, byte);
        *device.cursor_mut() = cursor;
        device.core_mut().refresh(&Label::QUERY_ALDB, now);

        let next = match step {
            ScanStep::Continue => commands::PEEK_ONE_BYTE,
            ScanStep::NextPage => commands::SET_ADDRESS_MSB,
            ScanStep::Finished => {
                self.finish_device_scan(address, now);
                return;
            }
        };
        if let Err(e) = self.queue_device(address, next, &[], Label::QUERY_ALDB, now) {
            tracing::warn!(
                "[{}] Failed to continue link table read of {}: {}",
                self.name,
                address,
                e
            );
        }
    }

    /// Ends a device scan and asks for the link table delta the cache now
    /// corresponds to.
    fn finish_device_scan(&mut self, address: Address, now: Instant) {
        let Some(device) = self.devices.get_mut(&address) else {
            return;
        };
        device.core_mut().release(&Label::QUERY_ALDB);
        let records = device.aldb().len();
        let delta_command = if device.command_spec(commands::LIGHT_STATUS_REQUEST).is_ok() {
            commands::LIGHT_STATUS_REQUEST
        } else {
            commands::GET_ALDB_DELTA
        };
        self.triggers.remove(&read_trigger_name(address));
        self.emit(NetworkEvent::AldbScanComplete {
            node: NodeId::Device(address),
            records,
        });
        if let Err(e) = self.queue_device(address, delta_command, &[], Label::DEFAULT, now) {
            tracing::warn!(
                "[{}] Failed to request link table delta of {}: {}",
                self.name,
                address,
                e
            );
        }
    }

    /// Writes one record into a device link table. Needs engine version 1 or
    /// later; the cache is updated once the device acks.
    pub fn write_device_aldb(
        &mut self,
        address: Address,
        key: AldbKey,
        record: LinkRecord,
        now: Instant,
    ) -> Result<MessageToken, CoreError> {
        let device = self.device_or_err(address)?;
        if device.scan_mode() != Some(ScanMode::Extended) {
            return Err(CoreError::CommandNotApplicable {
                command: commands::WRITE_ALDB.to_string(),
                address,
            });
        }

        let lsb = key.lsb() - key.lsb() % RECORD_LEN as u8;
        let mut overrides = vec![(Field::Usr(3), key.msb()), (Field::Usr(4), lsb)];
        overrides.extend(
            record.0.iter().enumerate().map(|(i, byte)| (Field::Usr(6 + i as u8), *byte)),
        );
        self.queue_device(address, commands::WRITE_ALDB, &overrides, Label::DEFAULT, now)
    }

    /// Mirrors an acked `write_aldb` into the cached table.
    pub(super) fn on_write_ack(&mut self, address: Address, sent: &PlmMessage) {
        let Some(view) = sent.insteon() else {
            return;
        };
        let (Some(msb), Some(lsb)) = (view.usr(3), view.usr(4)) else {
            return;
        };
        let Some(record) = record_from_user_data(sent) else {
            return;
        };
        let key = AldbKey::memory(msb, lsb - lsb % RECORD_LEN as u8 + (RECORD_LEN as u8 - 1));
        if let Some(device) = self.devices.get_mut(&address) {
            device.core_mut().aldb.edit(key, record);
            tracing::debug!("[{}] Wrote link {:04X} of {}", self.name, key.0, address);
        }
    }
}
