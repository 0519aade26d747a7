//! Frames about the gateway itself: echoes of host frames, link table
//! records and all-link notifications.

use super::{address_of, Plm};
use crate::aldb::{LinkRecord, CONTROLLER_LINK_FLAGS, RESPONDER_LINK_FLAGS};
use crate::conversation::Label;
use crate::error::CoreError;
use crate::event::NetworkEvent;
use crate::node::{attr, Node, NodeId};
use crate::queue::Delivery;
use crate::scheduler::{FailureReason, InFlight};
use insteon_protocol::{Field, NackAction, PlmCommand, PlmMessage, PlmResponse};
use std::time::Instant;

/// Link codes of an all-link complete frame.
const LINK_CODE_RESPONDER: u8 = 0x00;
const LINK_CODE_CONTROLLER: u8 = 0x01;
const LINK_CODE_DELETED: u8 = 0xFF;

impl Plm {
    /// Clears the cached gateway link table and reads it again.
    pub fn query_gateway_aldb(&mut self, now: Instant) -> Result<(), CoreError> {
        self.gateway.core_mut().aldb.clear();
        let message = PlmMessage::outbound(PlmCommand::AllLinkFirstRec, false)?;
        self.queue_gateway(message, Label::QUERY_ALDB, Delivery::gateway_only(), now);
        Ok(())
    }

    fn gateway_scan_running(&self) -> bool {
        *self.gateway.active_label() == Label::QUERY_ALDB
            || self.gateway.core().queue.pending(&Label::QUERY_ALDB).next().is_some()
    }

    pub(super) fn handle_echo(&mut self, msg: &PlmMessage, now: Instant) {
        let expected = self
            .slot
            .current()
            .is_some_and(|flight| !flight.gateway_ack && msg.echoes(&flight.outbound.message));
        if !expected {
            self.emit(NetworkEvent::SpuriousEcho { frame: msg.to_hex() });
            return;
        }

        match msg.response() {
            Some(PlmResponse::Ack) => self.on_gateway_ack(msg, now),
            Some(PlmResponse::Nack) => self.on_gateway_nack(msg, now),
            Some(PlmResponse::BadCommand) => {
                self.slot.hold_for(now, self.config.nack_backoff());
                self.emit(NetworkEvent::BadCommand {
                    command: msg.command().name(),
                });
                self.fail_in_flight(FailureReason::BadCommand);
            }
            None => self.emit(NetworkEvent::MalformedFrame {
                bytes: msg.to_hex(),
                reason: "unknown response byte".to_string(),
            }),
        }
    }

    fn on_gateway_ack(&mut self, msg: &PlmMessage, now: Instant) {
        let Some(flight) = self.slot.current_mut() else {
            return;
        };
        flight.gateway_ack = true;
        let token = flight.outbound.token;
        let sent = flight.outbound.message.clone();

        match msg.command() {
            PlmCommand::PlmInfo => {
                let address = address_of(
                    msg,
                    [Field::PlmAddrHi, Field::PlmAddrMid, Field::PlmAddrLow],
                );
                self.gateway.set_info(
                    address,
                    msg.get(Field::DevCat).unwrap_or(0),
                    msg.get(Field::SubCat).unwrap_or(0),
                    msg.get(Field::Firmware).unwrap_or(0),
                );
                tracing::info!("[{}] Gateway address is {}", self.name, address);
            }
            PlmCommand::GetConfig => {
                if let Some(flags) = msg.get(Field::ConfFlags) {
                    self.gateway.core_mut().attributes.set_u8(attr::CONFIG_FLAGS, flags);
                }
            }
            PlmCommand::AllLinkManageRec => {
                self.gateway.apply_link_write(&sent);
                self.gateway.take_link_write(token);
            }
            PlmCommand::X10Send => self.on_x10_ack(now),
            _ => {}
        }
        self.complete_if_resolved(now);
    }

    fn on_gateway_nack(&mut self, msg: &PlmMessage, now: Instant) {
        match msg.schema().nack {
            NackAction::EndOfLinkTable => {
                self.slot.take();
                self.finish_gateway_scan(now);
            }
            NackAction::LinkWriteRejected => {
                if let Some(flight) = self.slot.take() {
                    self.link_write_rejected(flight, now);
                }
            }
            NackAction::Backoff => {
                self.slot.hold_for(now, self.config.nack_backoff());
                self.emit(NetworkEvent::GatewayNack {
                    command: msg.command().name(),
                });
                self.fail_in_flight(FailureReason::GatewayNack);
            }
        }
    }

    /// A rejected link write usually means the cached table is stale. The
    /// first rejection rereads the table and retries; a second one fails.
    fn link_write_rejected(&mut self, flight: InFlight, now: Instant) {
        let Some(pending) = self.gateway.take_link_write(flight.outbound.token) else {
            self.emit(NetworkEvent::GatewayNack {
                command: PlmCommand::AllLinkManageRec.name(),
            });
            self.message_failed(flight.origin, &flight.outbound, FailureReason::GatewayNack);
            return;
        };

        if pending.repaired {
            self.message_failed(flight.origin, &flight.outbound, FailureReason::GatewayNack);
            self.emit(NetworkEvent::LinkWriteFailed {
                group: pending.request.group,
                address: pending.request.address,
                controller: pending.request.controller,
            });
            return;
        }

        tracing::info!(
            "[{}] Link write to {} group {} rejected, rereading link table",
            self.name,
            pending.request.address,
            pending.request.group
        );
        self.gateway.defer_until_rescan(pending.request);
        if !self.gateway_scan_running() {
            if let Err(e) = self.query_gateway_aldb(now) {
                tracing::warn!("[{}] Failed to start link table read: {}", self.name, e);
            }
        }
    }

    fn finish_gateway_scan(&mut self, now: Instant) {
        self.gateway.core_mut().release(&Label::QUERY_ALDB);
        let records = self.gateway.aldb().len();
        self.emit(NetworkEvent::AldbScanComplete {
            node: NodeId::Gateway,
            records,
        });

        for request in self.gateway.take_deferred_links() {
            if let Err(e) = self.queue_link_write(request, true, now) {
                tracing::warn!("[{}] Failed to retry link write: {}", self.name, e);
            }
        }
    }

    /// One record of a gateway link table read; asks for the next.
    pub(super) fn handle_link_record(&mut self, msg: &PlmMessage, now: Instant) {
        let address = address_of(msg, [Field::DevAddrHi, Field::DevAddrMid, Field::DevAddrLow]);
        let record = LinkRecord::new(
            msg.get(Field::LinkFlags).unwrap_or(0),
            msg.get(Field::Group).unwrap_or(0),
            address,
            [
                msg.get(Field::Data1).unwrap_or(0),
                msg.get(Field::Data2).unwrap_or(0),
                msg.get(Field::Data3).unwrap_or(0),
            ],
        );
        let key = self.gateway.add_record(record);
        tracing::debug!("[{}] Gateway link {} = {}", self.name, key.0, record.to_hex());

        self.gateway.core_mut().refresh(&Label::QUERY_ALDB, now);
        match PlmMessage::outbound(PlmCommand::AllLinkNextRec, false) {
            Ok(message) => {
                self.queue_gateway(message, Label::QUERY_ALDB, Delivery::gateway_only(), now);
            }
            Err(e) => tracing::warn!("[{}] Failed to continue link table read: {}", self.name, e),
        }
    }

    pub(super) fn handle_all_link_complete(&mut self, msg: &PlmMessage) {
        let link_code = msg.get(Field::LinkCode).unwrap_or(0);
        let group = msg.get(Field::Group).unwrap_or(0);
        let address = address_of(msg, [Field::FromAddrHi, Field::FromAddrMid, Field::FromAddrLow]);
        let identity = [
            msg.get(Field::DevCat).unwrap_or(0),
            msg.get(Field::SubCat).unwrap_or(0),
            msg.get(Field::Firmware).unwrap_or(0),
        ];

        match link_code {
            LINK_CODE_DELETED => {
                self.gateway.remove_links(group, address);
            }
            code => {
                let flags = if code == LINK_CODE_CONTROLLER {
                    CONTROLLER_LINK_FLAGS
                } else {
                    if code != LINK_CODE_RESPONDER {
                        tracing::debug!("[{}] Unrecognised link code {:#04x}", self.name, code);
                    }
                    RESPONDER_LINK_FLAGS
                };
                self.gateway.add_record(LinkRecord::new(flags, group, address, identity));
                if let Some(device) = self.devices.get_mut(&address) {
                    device.set_identity(identity[0], identity[1], identity[2]);
                }
            }
        }
        self.emit(NetworkEvent::AllLinkComplete {
            link_code,
            group,
            address,
        });
    }

    /// End of an all-link group send. Clears the sequence lock either way;
    /// only success ends the group send conversation.
    pub(super) fn handle_clean_status(&mut self, msg: &PlmMessage) {
        let group_send = self
            .slot
            .current()
            .is_some_and(|flight| flight.outbound.message.command() == PlmCommand::AllLinkSend);
        if !group_send {
            tracing::debug!("[{}] Ignored all-link status without a group send", self.name);
            return;
        }

        let success = msg.response() == Some(PlmResponse::Ack);
        if let Some(flight) = self.slot.take() {
            if success {
                self.gateway.core_mut().release(&flight.outbound.label);
            }
        }
        self.emit(NetworkEvent::AllLinkCleanStatus { success });
    }
}
