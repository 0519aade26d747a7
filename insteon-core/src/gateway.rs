//! The PLM itself as a node: its link table and link writes.

use crate::aldb::{
    AldbKey, KeyStyle, LinkRecord, RecordQuery, CONTROLLER_LINK_FLAGS, RESPONDER_LINK_FLAGS,
};
use crate::error::CoreError;
use crate::node::{attr, Node, NodeCore, NodeId};
use crate::queue::MessageToken;
use insteon_protocol::{Address, Field, PlmCommand, PlmMessage};
use std::collections::{BTreeSet, HashMap};

/// Control codes of an `all_link_manage_rec` instruction.
pub mod ctrl {
    /// Modify the first record matching role, group and address.
    pub const MODIFY: u8 = 0x20;
    pub const ADD_CONTROLLER: u8 = 0x40;
    pub const ADD_RESPONDER: u8 = 0x41;
    /// Delete the first record matching role, group and address.
    pub const DELETE: u8 = 0x80;
}

/// A link the gateway should hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRequest {
    /// The gateway is the controller of the link, else the responder.
    pub controller: bool,
    pub group: u8,
    pub address: Address,
    pub data: [u8; 3],
}

impl LinkRequest {
    pub fn flags(&self) -> u8 {
        if self.controller {
            CONTROLLER_LINK_FLAGS
        } else {
            RESPONDER_LINK_FLAGS
        }
    }

    /// Records this request would modify.
    pub fn query(&self) -> RecordQuery {
        let query = RecordQuery::new().group(self.group).address(self.address);
        if self.controller {
            query.controller(true)
        } else {
            query.responder(true)
        }
    }

    pub fn record(&self) -> LinkRecord {
        LinkRecord::new(self.flags(), self.group, self.address, self.data)
    }
}

/// A link write waiting for the gateway's verdict.
#[derive(Debug, Clone, Copy)]
pub struct PendingLink {
    pub request: LinkRequest,
    /// Set once the write was retried after a link table rescan.
    pub repaired: bool,
}

/// The Power-Line Modem.
#[derive(Debug)]
pub struct GatewayNode {
    core: NodeCore,
    link_writes: HashMap<MessageToken, PendingLink>,
    awaiting_rescan: Vec<LinkRequest>,
}

impl GatewayNode {
    pub fn new() -> Self {
        Self {
            core: NodeCore::new(KeyStyle::Position),
            link_writes: HashMap::new(),
            awaiting_rescan: Vec::new(),
        }
    }

    /// Address reported by `plm_info`.
    pub fn address(&self) -> Option<Address> {
        self.core.attributes.get_text(attr::ADDRESS)?.parse().ok()
    }

    pub fn set_info(&mut self, address: Address, dev_cat: u8, sub_cat: u8, firmware: u8) {
        let attributes = &mut self.core.attributes;
        attributes.set_text(attr::ADDRESS, address.to_string());
        attributes.set_u8(attr::DEV_CAT, dev_cat);
        attributes.set_u8(attr::SUB_CAT, sub_cat);
        attributes.set_u8(attr::FIRMWARE, firmware);
    }

    /// Chooses the instruction for `request` against the cached table:
    /// modify when a matching record exists, add otherwise.
    pub fn link_instruction(&self, request: &LinkRequest) -> u8 {
        let existing = self.core.aldb.find_matching(&request.query());
        if !existing.is_empty() {
            ctrl::MODIFY
        } else if request.controller {
            ctrl::ADD_CONTROLLER
        } else {
            ctrl::ADD_RESPONDER
        }
    }

    /// Encodes the `all_link_manage_rec` frame for `request`.
    pub fn build_link_write(&self, request: &LinkRequest) -> Result<PlmMessage, CoreError> {
        let mut msg = PlmMessage::outbound(PlmCommand::AllLinkManageRec, false)?;
        let address = request.address;
        let fields = [
            (Field::CtrlCode, self.link_instruction(request)),
            (Field::LinkFlags, request.flags()),
            (Field::Group, request.group),
            (Field::DevAddrHi, address.hi()),
            (Field::DevAddrMid, address.mid()),
            (Field::DevAddrLow, address.low()),
            (Field::Data1, request.data[0]),
            (Field::Data2, request.data[1]),
            (Field::Data3, request.data[2]),
        ];
        for (field, value) in fields {
            msg.set(field, value)?;
        }
        Ok(msg)
    }

    pub fn track_link_write(&mut self, token: MessageToken, pending: PendingLink) {
        self.link_writes.insert(token, pending);
    }

    pub fn take_link_write(&mut self, token: MessageToken) -> Option<PendingLink> {
        self.link_writes.remove(&token)
    }

    /// Parks a rejected write until the link table was re-read.
    pub fn defer_until_rescan(&mut self, request: LinkRequest) {
        self.awaiting_rescan.push(request);
    }

    pub fn has_deferred_links(&self) -> bool {
        !self.awaiting_rescan.is_empty()
    }

    pub fn take_deferred_links(&mut self) -> Vec<LinkRequest> {
        std::mem::take(&mut self.awaiting_rescan)
    }

    /// Mirrors an acknowledged link write into the cached table.
    pub fn apply_link_write(&mut self, sent: &PlmMessage) {
        let (Some(code), Some(flags), Some(group)) = (
            sent.get(Field::CtrlCode),
            sent.get(Field::LinkFlags),
            sent.get(Field::Group),
        ) else {
            return;
        };
        let address = Address::new(
            sent.get(Field::DevAddrHi).unwrap_or(0),
            sent.get(Field::DevAddrMid).unwrap_or(0),
            sent.get(Field::DevAddrLow).unwrap_or(0),
        );
        let data = [
            sent.get(Field::Data1).unwrap_or(0),
            sent.get(Field::Data2).unwrap_or(0),
            sent.get(Field::Data3).unwrap_or(0),
        ];
        let request = LinkRequest {
            controller: flags == CONTROLLER_LINK_FLAGS,
            group,
            address,
            data,
        };
        let record = LinkRecord::new(flags, group, address, data);
        let existing = self.core.aldb.find_matching(&request.query());

        match code {
            ctrl::DELETE => {
                if let Some(key) = existing.first() {
                    let _ = self.core.aldb.delete(*key);
                }
            }
            ctrl::MODIFY if !existing.is_empty() => self.core.aldb.edit(existing[0], record),
            _ => {
                self.core.aldb.append(record);
            }
        }
    }

    /// Appends a record reported by the gateway.
    pub fn add_record(&mut self, record: LinkRecord) -> AldbKey {
        self.core.aldb.append(record)
    }

    /// Removes every cached record of `address` in `group`.
    pub fn remove_links(&mut self, group: u8, address: Address) -> usize {
        let keys = self
            .core
            .aldb
            .find_matching(&RecordQuery::new().group(group).address(address));
        for key in &keys {
            let _ = self.core.aldb.delete(*key);
        }
        keys.len()
    }

    /// Devices the gateway controls in `group`, each once, in address order.
    pub fn controlled_in_group(&self, group: u8) -> Vec<Address> {
        let query = RecordQuery::new().in_use(true).controller(true).group(group);
        let addresses: BTreeSet<Address> = self
            .core
            .aldb
            .find_matching(&query)
            .into_iter()
            .filter_map(|key| self.core.aldb.get(key).ok())
            .map(|record| record.address())
            .collect();
        addresses.into_iter().collect()
    }
}

impl Default for GatewayNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for GatewayNode {
    fn id(&self) -> NodeId {
        NodeId::Gateway
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }
}
