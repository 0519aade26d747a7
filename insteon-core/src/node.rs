//! Node composition shared by the gateway and network devices.
//!
//! Every node owns a link table, a conversation state and an outbound queue.
//! Role-specific behaviour lives on the concrete node types.

use crate::aldb::{Aldb, KeyStyle};
use crate::conversation::{ConversationState, Expired, Label};
use crate::queue::{Outbound, OutboundQueue};
use crate::x10::X10Address;
use insteon_protocol::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Identity of a node within one gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Gateway,
    Device(Address),
    X10(X10Address),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Gateway => f.write_str("gateway"),
            NodeId::Device(address) => write!(f, "device {address}"),
            NodeId::X10(address) => write!(f, "x10 device {address}"),
        }
    }
}

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// Well-known attribute names.
pub mod attr {
    pub const ADDRESS: &str = "address";
    pub const DEV_CAT: &str = "dev_cat";
    pub const SUB_CAT: &str = "sub_cat";
    pub const FIRMWARE: &str = "firmware";
    pub const ENGINE_VERSION: &str = "engine_version";
    pub const ALDB_DELTA: &str = "aldb_delta";
    pub const STATUS: &str = "status";
    pub const ON_LEVEL: &str = "on_level";
    pub const LINK_GROUP: &str = "link_group";
    pub const OPERATING_FLAGS: &str = "operating_flags";
    pub const CONFIG_FLAGS: &str = "config_flags";
}

/// Named scalar attributes of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttrValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.0.get(name)
    }

    /// Integer attribute that fits in a byte.
    pub fn get_u8(&self, name: &str) -> Option<u8> {
        match self.0.get(name)? {
            AttrValue::Int(v) => u8::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn set_u8(&mut self, name: &str, value: u8) {
        self.0.insert(name.to_string(), AttrValue::Int(i64::from(value)));
    }

    pub fn set_text(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_string(), AttrValue::Text(value.into()));
    }

    pub fn set(&mut self, name: impl Into<String>, value: AttrValue) {
        self.0.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<AttrValue> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.0.iter()
    }
}

/// Serializable form of a node and, for the gateway, its devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(rename = "ALDB", default)]
    pub aldb: BTreeMap<String, String>,
    #[serde(rename = "Devices", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub devices: BTreeMap<String, NodeSnapshot>,
}

/// State every node owns.
#[derive(Debug)]
pub struct NodeCore {
    pub aldb: Aldb,
    pub conversation: ConversationState,
    pub queue: OutboundQueue,
    pub attributes: Attributes,
}

impl NodeCore {
    pub fn new(style: KeyStyle) -> Self {
        Self {
            aldb: Aldb::new(style),
            conversation: ConversationState::new(),
            queue: OutboundQueue::new(),
            attributes: Attributes::new(),
        }
    }

    /// Re-evaluates the conversation and returns the creation time of the
    /// message that may be sent next, with any conversation that expired.
    pub fn candidate(
        &mut self,
        now: Instant,
        timeout: Duration,
    ) -> (Option<Expired>, Option<Instant>) {
        let expired = self.conversation.resolve(now, timeout, &self.queue);
        let head = self.queue.head(self.conversation.active()).map(|o| o.created);
        (expired, head)
    }

    /// Removes the next eligible message and keeps its conversation alive.
    pub fn pop_eligible(&mut self, now: Instant) -> Option<Outbound> {
        let label = self.conversation.active().clone();
        let outbound = self.queue.pop(&label)?;
        self.conversation.refresh(&label, now);
        Some(outbound)
    }

    pub fn enqueue(&mut self, outbound: Outbound) {
        self.queue.push_back(outbound);
    }

    /// Puts a retried message back at the head of its lane.
    pub fn requeue(&mut self, outbound: Outbound, now: Instant) {
        let label = outbound.label.clone();
        self.queue.push_front(outbound);
        self.conversation.refresh(&label, now);
    }

    pub fn refresh(&mut self, label: &Label, now: Instant) {
        self.conversation.refresh(label, now);
    }

    pub fn release(&mut self, label: &Label) -> bool {
        self.conversation.release(label)
    }

    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            attributes: self.attributes.clone(),
            aldb: self.aldb.to_snapshot(),
            devices: BTreeMap::new(),
        }
    }
}

/// Behaviour common to gateway and device nodes.
pub trait Node {
    fn id(&self) -> NodeId;

    fn core(&self) -> &NodeCore;

    fn core_mut(&mut self) -> &mut NodeCore;

    fn aldb(&self) -> &Aldb {
        &self.core().aldb
    }

    fn attributes(&self) -> &Attributes {
        &self.core().attributes
    }

    fn active_label(&self) -> &Label {
        self.core().conversation.active()
    }

    /// Attributes and link table of this node alone.
    fn snapshot(&self) -> NodeSnapshot {
        self.core().snapshot()
    }
}
