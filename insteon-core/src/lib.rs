//! # insteon-core
//!
//! Host-side protocol engine for an Insteon Power-Line Modem.
//!
//! This crate provides:
//! - Gateway and device nodes with cached link databases
//! - Per-node conversations and outbound queues
//! - The single-slot send scheduler with two-tier acks and retries
//! - Device command catalog and direct ack dispatch
//! - Duplicate suppression, smart hop tracking and one-shot triggers
//! - Link table scans of the gateway and of devices
//! - X10 modules reached over the PLM's power-line bridge

pub mod aldb;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod dedup;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod gateway;
pub mod hops;
pub mod node;
pub mod plm;
pub mod queue;
pub mod scheduler;
pub mod status;
pub mod transport;
pub mod trigger;
pub mod x10;

pub use aldb::{Aldb, AldbCursor, AldbKey, LinkRecord, RecordQuery};
pub use config::{EngineConfig, HopConfig};
pub use conversation::Label;
pub use device::DeviceNode;
pub use error::CoreError;
pub use event::NetworkEvent;
pub use gateway::{GatewayNode, LinkRequest};
pub use node::{AttrValue, Attributes, Node, NodeId, NodeSnapshot};
pub use plm::Plm;
pub use queue::MessageToken;
pub use scheduler::{AckTier, FailureReason};
pub use status::{DeviceStatus, GatewayStatus, X10Status};
pub use transport::{MemoryTransport, Transport};
pub use x10::{X10Address, X10Command, X10Device};
