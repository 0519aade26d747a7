//! Routing of device direct acks.
//!
//! Routes are tried top to bottom; the first route whose command byte and
//! filters all match decides what the ack means.

use crate::commands::{Applicability, Match};

/// What a direct ack carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    /// cmd_2 holds the device's engine version.
    EngineVersion,
    /// cmd_2 holds the operating flags byte.
    OperatingFlags,
    /// cmd_2 holds the link database delta.
    AldbDelta,
    /// A legacy scan may peek at the new page.
    SetAddressMsb,
    /// cmd_2 holds the peeked link table byte.
    PeekByte,
    /// An extended link table read or write was accepted.
    AldbAccess,
}

/// One dispatch table entry.
#[derive(Debug, Clone, Copy)]
pub struct AckRoute {
    pub cmd1: u8,
    pub applies: Applicability,
    /// cmd_2 of the message that caused the ack.
    pub sent_cmd2: Match,
    pub action: AckAction,
}

const fn route(cmd1: u8, sent_cmd2: Match, action: AckAction) -> AckRoute {
    AckRoute {
        cmd1,
        applies: Applicability::ANY,
        sent_cmd2,
        action,
    }
}

pub static DIRECT_ACK_ROUTES: &[AckRoute] = &[
    route(0x0D, Match::Any, AckAction::EngineVersion),
    route(0x1F, Match::OneOf(&[0x00]), AckAction::OperatingFlags),
    route(0x1F, Match::OneOf(&[0x01]), AckAction::AldbDelta),
    route(0x28, Match::Any, AckAction::SetAddressMsb),
    route(0x2B, Match::Any, AckAction::PeekByte),
    route(0x2F, Match::Any, AckAction::AldbAccess),
];

/// Device identity and the triggering message, as seen by the router.
#[derive(Debug, Clone, Copy, Default)]
pub struct AckContext {
    pub dev_cat: Option<u8>,
    pub sub_cat: Option<u8>,
    pub firmware: Option<u8>,
    pub sent_cmd2: Option<u8>,
}

/// Action of the first route matching an ack with command byte `cmd1`.
pub fn route_direct_ack(cmd1: u8, ctx: &AckContext) -> Option<AckAction> {
    DIRECT_ACK_ROUTES
        .iter()
        .find(|r| {
            r.cmd1 == cmd1
                && r.applies.accepts(ctx.dev_cat, ctx.sub_cat, ctx.firmware)
                && r.sent_cmd2.matches(ctx.sent_cmd2)
        })
        .map(|r| r.action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(cmd2: u8) -> AckContext {
        AckContext {
            sent_cmd2: Some(cmd2),
            ..Default::default()
        }
    }

    #[test]
    fn test_sent_cmd2_selects_route() {
        assert_eq!(route_direct_ack(0x1F, &sent(0x00)), Some(AckAction::OperatingFlags));
        assert_eq!(route_direct_ack(0x1F, &sent(0x01)), Some(AckAction::AldbDelta));
        assert_eq!(route_direct_ack(0x1F, &sent(0x02)), None);
    }

    #[test]
    fn test_wildcard_routes() {
        assert_eq!(route_direct_ack(0x0D, &AckContext::default()), Some(AckAction::EngineVersion));
        assert_eq!(route_direct_ack(0x2B, &sent(0xF8)), Some(AckAction::PeekByte));
        assert_eq!(route_direct_ack(0x11, &sent(0xFF)), None);
    }
}
