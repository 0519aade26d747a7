//! Static frame schema table for the PLM serial protocol.
//!
//! Every frame begins with the sync byte followed by a command byte that
//! selects one entry of this table. An entry gives the received length, the
//! length of the host-originated form (if the host may send it) and the byte
//! offsets of every named field in both directions.
//!
//! ```text
//! +------+------+---------------------------------------+
//! | 0x02 | cmd  | fields (schema-defined offsets) ...   |
//! +------+------+---------------------------------------+
//! ```

/// Sync byte that starts every frame.
pub const SYNC: u8 = 0x02;

/// Sentinel the PLM emits instead of a frame when it cannot accept input.
pub const BUSY: u8 = 0x15;

/// Response byte values carried by host-originated frame echoes.
pub const RESP_ACK: u8 = 0x06;
pub const RESP_NACK: u8 = 0x15;
pub const RESP_BAD_COMMAND: u8 = 0x0F;

/// Offset of the device flags byte inside a 0x62 frame, used to tell the
/// standard form from the extended one.
pub const SEND_FLAGS_OFFSET: usize = 5;

/// Extended-length bit of a device flags byte.
pub const EXTENDED_FLAG: u8 = 0x10;

/// Named byte inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    PlmCmd,
    FromAddrHi,
    FromAddrMid,
    FromAddrLow,
    ToAddrHi,
    ToAddrMid,
    ToAddrLow,
    MsgFlags,
    Cmd1,
    Cmd2,
    /// Extended user data byte, numbered 1 to 14.
    Usr(u8),
    RawX10,
    X10Flags,
    LinkCode,
    Group,
    DevCat,
    SubCat,
    Firmware,
    BtnEvent,
    LinkFail,
    FailAddrHi,
    FailAddrMid,
    FailAddrLow,
    LinkFlags,
    DevAddrHi,
    DevAddrMid,
    DevAddrLow,
    Data1,
    Data2,
    Data3,
    PlmAddrHi,
    PlmAddrMid,
    PlmAddrLow,
    CtrlCode,
    ConfFlags,
    Spare1,
    Spare2,
    PlmResp,
}

/// Frame kinds understood by the PLM, keyed by command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PlmCommand {
    InsteonReceived = 0x50,
    InsteonExtReceived = 0x51,
    X10Received = 0x52,
    AllLinkComplete = 0x53,
    ButtonEvent = 0x54,
    UserReset = 0x55,
    AllLinkCleanFailed = 0x56,
    AllLinkRecord = 0x57,
    AllLinkCleanStatus = 0x58,
    PlmInfo = 0x60,
    AllLinkSend = 0x61,
    InsteonSend = 0x62,
    X10Send = 0x63,
    AllLinkStart = 0x64,
    AllLinkCancel = 0x65,
    SetHostDevCat = 0x66,
    PlmReset = 0x67,
    SetAckCmd2 = 0x68,
    AllLinkFirstRec = 0x69,
    AllLinkNextRec = 0x6A,
    SetConfig = 0x6B,
    GetSenderAllLinkRec = 0x6C,
    LedOn = 0x6D,
    LedOff = 0x6E,
    AllLinkManageRec = 0x6F,
    InsteonNak = 0x70,
    InsteonAck = 0x71,
    RfSleep = 0x72,
    GetConfig = 0x73,
}

impl PlmCommand {
    pub fn from_code(code: u8) -> Option<Self> {
        use PlmCommand::*;
        Some(match code {
            0x50 => InsteonReceived,
            0x51 => InsteonExtReceived,
            0x52 => X10Received,
            0x53 => AllLinkComplete,
            0x54 => ButtonEvent,
            0x55 => UserReset,
            0x56 => AllLinkCleanFailed,
            0x57 => AllLinkRecord,
            0x58 => AllLinkCleanStatus,
            0x60 => PlmInfo,
            0x61 => AllLinkSend,
            0x62 => InsteonSend,
            0x63 => X10Send,
            0x64 => AllLinkStart,
            0x65 => AllLinkCancel,
            0x66 => SetHostDevCat,
            0x67 => PlmReset,
            0x68 => SetAckCmd2,
            0x69 => AllLinkFirstRec,
            0x6A => AllLinkNextRec,
            0x6B => SetConfig,
            0x6C => GetSenderAllLinkRec,
            0x6D => LedOn,
            0x6E => LedOff,
            0x6F => AllLinkManageRec,
            0x70 => InsteonNak,
            0x71 => InsteonAck,
            0x72 => RfSleep,
            0x73 => GetConfig,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        self.schema().name
    }

    pub fn schema(self) -> &'static FrameSchema {
        use PlmCommand::*;
        match self {
            InsteonReceived => &INSTEON_RECEIVED,
            InsteonExtReceived => &INSTEON_EXT_RECEIVED,
            X10Received => &X10_RECEIVED,
            AllLinkComplete => &ALL_LINK_COMPLETE,
            ButtonEvent => &BUTTON_EVENT,
            UserReset => &USER_RESET,
            AllLinkCleanFailed => &ALL_LINK_CLEAN_FAILED,
            AllLinkRecord => &ALL_LINK_RECORD,
            AllLinkCleanStatus => &ALL_LINK_CLEAN_STATUS,
            PlmInfo => &PLM_INFO,
            AllLinkSend => &ALL_LINK_SEND,
            InsteonSend => &INSTEON_SEND,
            X10Send => &X10_SEND,
            AllLinkStart => &ALL_LINK_START,
            AllLinkCancel => &ALL_LINK_CANCEL,
            SetHostDevCat => &SET_HOST_DEV_CAT,
            PlmReset => &PLM_RESET,
            SetAckCmd2 => &SET_ACK_CMD2,
            AllLinkFirstRec => &ALL_LINK_FIRST_REC,
            AllLinkNextRec => &ALL_LINK_NEXT_REC,
            SetConfig => &SET_CONFIG,
            GetSenderAllLinkRec => &GET_SENDER_ALL_LINK_REC,
            LedOn => &LED_ON,
            LedOff => &LED_OFF,
            AllLinkManageRec => &ALL_LINK_MANAGE_REC,
            InsteonNak => &INSTEON_NAK,
            InsteonAck => &INSTEON_ACK,
            RfSleep => &RF_SLEEP,
            GetConfig => &GET_CONFIG,
        }
    }
}

/// Looks up the schema for a raw command byte.
pub fn schema_for(code: u8) -> Option<&'static FrameSchema> {
    PlmCommand::from_code(code).map(PlmCommand::schema)
}

/// Expected total length of a frame, sync byte included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    Fixed(usize),
    /// Standard and extended forms, told apart by the extended flag bit.
    Variable { standard: usize, extended: usize },
}

impl FrameLength {
    pub fn for_extended(&self, extended: bool) -> usize {
        match *self {
            FrameLength::Fixed(len) => len,
            FrameLength::Variable { standard, extended: ext } => {
                if extended {
                    ext
                } else {
                    standard
                }
            }
        }
    }

    pub fn is_valid(&self, len: usize) -> bool {
        match *self {
            FrameLength::Fixed(n) => n == len,
            FrameLength::Variable { standard, extended } => len == standard || len == extended,
        }
    }

    fn max(&self) -> usize {
        self.for_extended(true)
    }
}

/// How the engine treats a NACK echo of a host-originated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackAction {
    /// Hold the transmitter for the backoff period and fail the message.
    Backoff,
    /// The gateway link table has no further records.
    EndOfLinkTable,
    /// A link table write instruction was rejected.
    LinkWriteRejected,
}

/// Layout of one PLM frame kind.
#[derive(Debug)]
pub struct FrameSchema {
    pub command: PlmCommand,
    pub name: &'static str,
    pub recv_len: FrameLength,
    pub send_len: Option<FrameLength>,
    pub recv_fields: &'static [(Field, usize)],
    pub send_fields: &'static [(Field, usize)],
    /// Offset of `usr_1` in received frames; user bytes are contiguous.
    pub recv_usr_base: Option<usize>,
    /// Offset of `usr_1` in host-originated frames.
    pub send_usr_base: Option<usize>,
    pub nack: NackAction,
}

impl FrameSchema {
    /// Byte offset of `field` for a frame of the given direction and length.
    pub fn offset(&self, field: Field, outbound: bool, len: usize) -> Option<usize> {
        let (fields, usr_base) = if outbound {
            (self.send_fields, self.send_usr_base)
        } else {
            (self.recv_fields, self.recv_usr_base)
        };
        let pos = match field {
            Field::Usr(n) if (1..=14).contains(&n) => usr_base.map(|base| base + n as usize - 1),
            Field::Usr(_) => None,
            Field::PlmResp if !outbound => self.response_offset(len),
            _ => fields.iter().find(|(f, _)| *f == field).map(|(_, pos)| *pos),
        }?;
        (pos < len).then_some(pos)
    }

    /// Offset of the response byte of a received echo. For variable-length
    /// frames the extended form carries it at its final byte.
    pub fn response_offset(&self, len: usize) -> Option<usize> {
        if let FrameLength::Variable { extended, .. } = self.recv_len {
            if len >= extended {
                return Some(extended - 1);
            }
        }
        self.recv_fields
            .iter()
            .find(|(f, _)| *f == Field::PlmResp)
            .map(|(_, pos)| *pos)
    }

    pub fn max_recv_len(&self) -> usize {
        self.recv_len.max()
    }
}

macro_rules! schema {
    (
        $ident:ident,
        $cmd:ident,
        $name:literal,
        $recv:expr,
        $send:expr,
        $rf:expr,
        $sf:expr,
        $ru:expr,
        $su:expr,
        $nack:expr
    ) => {
        static $ident: FrameSchema = FrameSchema {
            command: PlmCommand::$cmd,
            name: $name,
            recv_len: $recv,
            send_len: $send,
            recv_fields: $rf,
            send_fields: $sf,
            recv_usr_base: $ru,
            send_usr_base: $su,
            nack: $nack,
        };
    };
    ($ident:ident, $cmd:ident, $name:literal, $recv:expr, $send:expr, $rf:expr, $sf:expr) => {
        schema!($ident, $cmd, $name, $recv, $send, $rf, $sf, None, None, NackAction::Backoff);
    };
}

use Field::*;
use FrameLength::Fixed;

const CMD_ONLY: &[(Field, usize)] = &[(PlmCmd, 1)];
const CMD_RESP: &[(Field, usize)] = &[(PlmCmd, 1), (PlmResp, 2)];

const RECEIVED_FIELDS: &[(Field, usize)] = &[
    (PlmCmd, 1),
    (FromAddrHi, 2),
    (FromAddrMid, 3),
    (FromAddrLow, 4),
    (ToAddrHi, 5),
    (ToAddrMid, 6),
    (ToAddrLow, 7),
    (MsgFlags, 8),
    (Cmd1, 9),
    (Cmd2, 10),
];

schema!(
    INSTEON_RECEIVED,
    InsteonReceived,
    "insteon_received",
    Fixed(11),
    None,
    RECEIVED_FIELDS,
    &[]
);
schema!(
    INSTEON_EXT_RECEIVED,
    InsteonExtReceived,
    "insteon_ext_received",
    Fixed(25),
    None,
    RECEIVED_FIELDS,
    &[],
    Some(11),
    None,
    NackAction::Backoff
);
schema!(
    X10_RECEIVED,
    X10Received,
    "x10_received",
    Fixed(4),
    None,
    &[(PlmCmd, 1), (RawX10, 2), (X10Flags, 3)],
    &[]
);
schema!(
    ALL_LINK_COMPLETE,
    AllLinkComplete,
    "all_link_complete",
    Fixed(10),
    None,
    &[
        (PlmCmd, 1),
        (LinkCode, 2),
        (Group, 3),
        (FromAddrHi, 4),
        (FromAddrMid, 5),
        (FromAddrLow, 6),
        (DevCat, 7),
        (SubCat, 8),
        (Firmware, 9),
    ],
    &[]
);
schema!(
    BUTTON_EVENT,
    ButtonEvent,
    "plm_button_event",
    Fixed(3),
    None,
    &[(PlmCmd, 1), (BtnEvent, 2)],
    &[]
);
schema!(USER_RESET, UserReset, "user_plm_reset", Fixed(2), None, CMD_ONLY, &[]);
schema!(
    ALL_LINK_CLEAN_FAILED,
    AllLinkCleanFailed,
    "all_link_clean_failed",
    Fixed(7),
    None,
    &[
        (PlmCmd, 1),
        (LinkFail, 2),
        (Group, 3),
        (FailAddrHi, 4),
        (FailAddrMid, 5),
        (FailAddrLow, 6),
    ],
    &[]
);
schema!(
    ALL_LINK_RECORD,
    AllLinkRecord,
    "all_link_record",
    Fixed(10),
    None,
    &[
        (PlmCmd, 1),
        (LinkFlags, 2),
        (Group, 3),
        (DevAddrHi, 4),
        (DevAddrMid, 5),
        (DevAddrLow, 6),
        (Data1, 7),
        (Data2, 8),
        (Data3, 9),
    ],
    &[]
);
schema!(
    ALL_LINK_CLEAN_STATUS,
    AllLinkCleanStatus,
    "all_link_clean_status",
    Fixed(3),
    None,
    CMD_RESP,
    &[]
);
schema!(
    PLM_INFO,
    PlmInfo,
    "plm_info",
    Fixed(9),
    Some(Fixed(2)),
    &[
        (PlmCmd, 1),
        (PlmAddrHi, 2),
        (PlmAddrMid, 3),
        (PlmAddrLow, 4),
        (DevCat, 5),
        (SubCat, 6),
        (Firmware, 7),
        (PlmResp, 8),
    ],
    CMD_ONLY
);
schema!(
    ALL_LINK_SEND,
    AllLinkSend,
    "all_link_send",
    Fixed(6),
    Some(Fixed(5)),
    &[(PlmCmd, 1), (Group, 2), (Cmd1, 3), (Cmd2, 4), (PlmResp, 5)],
    &[(PlmCmd, 1), (Group, 2), (Cmd1, 3), (Cmd2, 4)]
);
schema!(
    INSTEON_SEND,
    InsteonSend,
    "insteon_send",
    FrameLength::Variable {
        standard: 9,
        extended: 23
    },
    Some(FrameLength::Variable {
        standard: 8,
        extended: 22
    }),
    &[
        (PlmCmd, 1),
        (ToAddrHi, 2),
        (ToAddrMid, 3),
        (ToAddrLow, 4),
        (MsgFlags, 5),
        (Cmd1, 6),
        (Cmd2, 7),
        (PlmResp, 8),
    ],
    &[
        (PlmCmd, 1),
        (ToAddrHi, 2),
        (ToAddrMid, 3),
        (ToAddrLow, 4),
        (MsgFlags, 5),
        (Cmd1, 6),
        (Cmd2, 7),
    ],
    Some(8),
    Some(8),
    NackAction::Backoff
);
schema!(
    X10_SEND,
    X10Send,
    "x10_send",
    Fixed(5),
    Some(Fixed(4)),
    &[(PlmCmd, 1), (RawX10, 2), (X10Flags, 3), (PlmResp, 4)],
    &[(PlmCmd, 1), (RawX10, 2), (X10Flags, 3)]
);
schema!(
    ALL_LINK_START,
    AllLinkStart,
    "all_link_start",
    Fixed(5),
    Some(Fixed(4)),
    &[(PlmCmd, 1), (LinkCode, 2), (Group, 3), (PlmResp, 4)],
    &[(PlmCmd, 1), (LinkCode, 2), (Group, 3)]
);
schema!(
    ALL_LINK_CANCEL,
    AllLinkCancel,
    "all_link_cancel",
    Fixed(3),
    Some(Fixed(2)),
    CMD_RESP,
    CMD_ONLY
);
schema!(
    SET_HOST_DEV_CAT,
    SetHostDevCat,
    "set_host_dev_cat",
    Fixed(6),
    Some(Fixed(5)),
    &[(PlmCmd, 1), (DevCat, 2), (SubCat, 3), (Firmware, 4), (PlmResp, 5)],
    &[(PlmCmd, 1), (DevCat, 2), (SubCat, 3), (Firmware, 4)]
);
schema!(PLM_RESET, PlmReset, "plm_reset", Fixed(3), Some(Fixed(2)), CMD_RESP, CMD_ONLY);
schema!(
    SET_ACK_CMD2,
    SetAckCmd2,
    "set_insteon_ack_cmd2",
    Fixed(4),
    Some(Fixed(3)),
    &[(PlmCmd, 1), (Cmd2, 2), (PlmResp, 3)],
    &[(PlmCmd, 1), (Cmd2, 2)]
);
schema!(
    ALL_LINK_FIRST_REC,
    AllLinkFirstRec,
    "all_link_first_rec",
    Fixed(3),
    Some(Fixed(2)),
    CMD_RESP,
    CMD_ONLY,
    None,
    None,
    NackAction::EndOfLinkTable
);
schema!(
    ALL_LINK_NEXT_REC,
    AllLinkNextRec,
    "all_link_next_rec",
    Fixed(3),
    Some(Fixed(2)),
    CMD_RESP,
    CMD_ONLY,
    None,
    None,
    NackAction::EndOfLinkTable
);
schema!(
    SET_CONFIG,
    SetConfig,
    "plm_set_config",
    Fixed(4),
    Some(Fixed(3)),
    &[(PlmCmd, 1), (ConfFlags, 2), (PlmResp, 3)],
    &[(PlmCmd, 1), (ConfFlags, 2)]
);
schema!(
    GET_SENDER_ALL_LINK_REC,
    GetSenderAllLinkRec,
    "get_sender_all_link_rec",
    Fixed(3),
    Some(Fixed(2)),
    CMD_RESP,
    CMD_ONLY
);
schema!(LED_ON, LedOn, "plm_led_on", Fixed(3), Some(Fixed(2)), CMD_RESP, CMD_ONLY);
schema!(LED_OFF, LedOff, "plm_led_off", Fixed(3), Some(Fixed(2)), CMD_RESP, CMD_ONLY);
schema!(
    ALL_LINK_MANAGE_REC,
    AllLinkManageRec,
    "all_link_manage_rec",
    Fixed(12),
    Some(Fixed(11)),
    &[
        (PlmCmd, 1),
        (CtrlCode, 2),
        (LinkFlags, 3),
        (Group, 4),
        (DevAddrHi, 5),
        (DevAddrMid, 6),
        (DevAddrLow, 7),
        (Data1, 8),
        (Data2, 9),
        (Data3, 10),
        (PlmResp, 11),
    ],
    &[
        (PlmCmd, 1),
        (CtrlCode, 2),
        (LinkFlags, 3),
        (Group, 4),
        (DevAddrHi, 5),
        (DevAddrMid, 6),
        (DevAddrLow, 7),
        (Data1, 8),
        (Data2, 9),
        (Data3, 10),
    ],
    None,
    None,
    NackAction::LinkWriteRejected
);
schema!(
    INSTEON_NAK,
    InsteonNak,
    "insteon_nak",
    Fixed(5),
    Some(Fixed(4)),
    &[(PlmCmd, 1), (Cmd1, 2), (Cmd2, 3), (PlmResp, 4)],
    &[(PlmCmd, 1), (Cmd1, 2), (Cmd2, 3)]
);
schema!(
    INSTEON_ACK,
    InsteonAck,
    "insteon_ack",
    Fixed(4),
    Some(Fixed(3)),
    &[(PlmCmd, 1), (Cmd2, 2), (PlmResp, 3)],
    &[(PlmCmd, 1), (Cmd2, 2)]
);
schema!(
    RF_SLEEP,
    RfSleep,
    "rf_sleep",
    Fixed(5),
    Some(Fixed(4)),
    &[(PlmCmd, 1), (Cmd1, 2), (Cmd2, 3), (PlmResp, 4)],
    &[(PlmCmd, 1), (Cmd1, 2), (Cmd2, 3)]
);
schema!(
    GET_CONFIG,
    GetConfig,
    "plm_get_config",
    Fixed(6),
    Some(Fixed(2)),
    &[(PlmCmd, 1), (ConfFlags, 2), (Spare1, 3), (Spare2, 4), (PlmResp, 5)],
    CMD_ONLY
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_code_round_trips() {
        for code in 0u8..=0xFF {
            if let Some(cmd) = PlmCommand::from_code(code) {
                assert_eq!(cmd.code(), code);
                assert_eq!(cmd.schema().command, cmd);
            }
        }
        assert!(PlmCommand::from_code(0x5F).is_none());
        assert!(PlmCommand::from_code(0x74).is_none());
    }

    #[test]
    fn test_insteon_send_response_offset() {
        let schema = PlmCommand::InsteonSend.schema();
        assert_eq!(schema.response_offset(9), Some(8));
        assert_eq!(schema.response_offset(23), Some(22));
    }

    #[test]
    fn test_offset_respects_received_length() {
        let schema = PlmCommand::InsteonExtReceived.schema();
        assert_eq!(schema.offset(Field::Usr(14), false, 25), Some(24));
        assert_eq!(schema.offset(Field::Usr(14), false, 20), None);
        assert_eq!(schema.offset(Field::Usr(15), false, 25), None);
        assert_eq!(schema.offset(Field::LinkFlags, false, 25), None);
    }

    #[test]
    fn test_nack_actions() {
        assert_eq!(PlmCommand::AllLinkFirstRec.schema().nack, NackAction::EndOfLinkTable);
        assert_eq!(PlmCommand::AllLinkNextRec.schema().nack, NackAction::EndOfLinkTable);
        assert_eq!(PlmCommand::AllLinkManageRec.schema().nack, NackAction::LinkWriteRejected);
        assert_eq!(PlmCommand::InsteonSend.schema().nack, NackAction::Backoff);
    }

    #[test]
    fn test_sendable_frames_are_one_shorter_than_echo() {
        for code in 0x61u8..=0x72 {
            let schema = match schema_for(code) {
                Some(s) => s,
                None => continue,
            };
            if let Some(send) = schema.send_len {
                assert_eq!(send.for_extended(false) + 1, schema.recv_len.for_extended(false));
                assert_eq!(send.for_extended(true) + 1, schema.recv_len.for_extended(true));
            }
        }
    }
}
