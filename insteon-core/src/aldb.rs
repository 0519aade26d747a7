//! All-Link Database cache.
//!
//! Each node keeps a table of 8 byte link records:
//!
//! ```text
//! +-------+-------+---------------+--------+--------+--------+
//! | flags | group | address (3)   | data 1 | data 2 | data 3 |
//! +-------+-------+---------------+--------+--------+--------+
//!
//! flags: bit 7 in use, bit 6 controller (else responder),
//!        bit 1 set when more records follow
//! ```
//!
//! Gateway records are keyed by insertion position. Device records are keyed
//! by the memory address of the record's highest byte; scans walk memory
//! downwards from 0x0FFF.

use crate::error::CoreError;
use insteon_protocol::Address;
use std::collections::BTreeMap;
use std::fmt;

pub const RECORD_LEN: usize = 8;

pub const FLAG_IN_USE: u8 = 0x80;
pub const FLAG_CONTROLLER: u8 = 0x40;
pub const FLAG_HAS_MORE: u8 = 0x02;

/// Flags of a gateway record where the gateway is controller.
pub const CONTROLLER_LINK_FLAGS: u8 = 0xE2;
/// Flags of a gateway record where the gateway is responder.
pub const RESPONDER_LINK_FLAGS: u8 = 0xA2;

/// Raw link record.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct LinkRecord(pub [u8; RECORD_LEN]);

impl LinkRecord {
    pub fn new(flags: u8, group: u8, address: Address, data: [u8; 3]) -> Self {
        let a = address.as_bytes();
        Self([flags, group, a[0], a[1], a[2], data[0], data[1], data[2]])
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidRecord {
            reason: format!("{s}: {e}"),
        })?;
        let raw: [u8; RECORD_LEN] = bytes.try_into().map_err(|_| CoreError::InvalidRecord {
            reason: format!("{s}: expected {RECORD_LEN} bytes"),
        })?;
        Ok(Self(raw))
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn flags(&self) -> u8 {
        self.0[0]
    }

    pub fn in_use(&self) -> bool {
        self.0[0] & FLAG_IN_USE != 0
    }

    pub fn is_controller(&self) -> bool {
        self.0[0] & FLAG_CONTROLLER != 0
    }

    pub fn is_responder(&self) -> bool {
        !self.is_controller()
    }

    pub fn has_more_records(&self) -> bool {
        self.0[0] & FLAG_HAS_MORE != 0
    }

    pub fn group(&self) -> u8 {
        self.0[1]
    }

    pub fn address(&self) -> Address {
        Address::new(self.0[2], self.0[3], self.0[4])
    }

    pub fn data(&self) -> [u8; 3] {
        [self.0[5], self.0[6], self.0[7]]
    }

    pub fn parse(&self) -> ParsedRecord {
        ParsedRecord {
            flags: self.flags(),
            in_use: self.in_use(),
            controller: self.is_controller(),
            responder: self.is_responder(),
            has_more_records: self.has_more_records(),
            group: self.group(),
            address: self.address(),
            data: self.data(),
        }
    }
}

impl fmt::Debug for LinkRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkRecord({})", self.to_hex())
    }
}

/// Decoded view of a link record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedRecord {
    /// Raw flag byte, including the bits without a named meaning.
    pub flags: u8,
    pub in_use: bool,
    pub controller: bool,
    pub responder: bool,
    pub has_more_records: bool,
    pub group: u8,
    pub address: Address,
    pub data: [u8; 3],
}

impl ParsedRecord {
    /// Rebuilds the raw record. The named flags overwrite their bits of
    /// `flags`; every other bit is kept.
    pub fn to_record(&self) -> LinkRecord {
        let mut flags = self.flags & !(FLAG_IN_USE | FLAG_CONTROLLER | FLAG_HAS_MORE);
        if self.in_use {
            flags |= FLAG_IN_USE;
        }
        if self.controller {
            flags |= FLAG_CONTROLLER;
        }
        if self.has_more_records {
            flags |= FLAG_HAS_MORE;
        }
        LinkRecord::new(flags, self.group, self.address, self.data)
    }
}

/// Attribute predicate over link records. Unset attributes match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub in_use: Option<bool>,
    pub controller: Option<bool>,
    pub responder: Option<bool>,
    pub has_more_records: Option<bool>,
    pub group: Option<u8>,
    pub address: Option<Address>,
    pub data: [Option<u8>; 3],
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_use(mut self, in_use: bool) -> Self {
        self.in_use = Some(in_use);
        self
    }

    pub fn controller(mut self, controller: bool) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn responder(mut self, responder: bool) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn group(mut self, group: u8) -> Self {
        self.group = Some(group);
        self
    }

    pub fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn data1(mut self, value: u8) -> Self {
        self.data[0] = Some(value);
        self
    }

    pub fn matches(&self, record: &LinkRecord) -> bool {
        let parsed = record.parse();
        fn check<T: PartialEq>(want: &Option<T>, have: T) -> bool {
            want.as_ref().map_or(true, |w| *w == have)
        }
        check(&self.in_use, parsed.in_use)
            && check(&self.controller, parsed.controller)
            && check(&self.responder, parsed.responder)
            && check(&self.has_more_records, parsed.has_more_records)
            && check(&self.group, parsed.group)
            && check(&self.address, parsed.address)
            && self
                .data
                .iter()
                .zip(parsed.data)
                .all(|(want, have)| check(want, have))
    }
}

/// How a table's keys are formed and printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStyle {
    /// Sequential insertion positions, printed as four decimal digits.
    Position,
    /// Memory addresses, printed as four hex digits.
    Memory,
}

/// Key of a record in a link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AldbKey(pub u16);

impl AldbKey {
    pub fn memory(msb: u8, lsb: u8) -> Self {
        Self(u16::from_be_bytes([msb, lsb]))
    }

    pub fn msb(&self) -> u8 {
        self.0.to_be_bytes()[0]
    }

    pub fn lsb(&self) -> u8 {
        self.0.to_be_bytes()[1]
    }
}

/// Result of feeding a scan step into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    /// Keep reading on the current memory page.
    Continue,
    /// The cursor moved to a lower page.
    NextPage,
    /// The last record was read.
    Finished,
}

/// Descending memory cursor used by device scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AldbCursor {
    pub msb: u8,
    pub lsb: u8,
}

impl AldbCursor {
    /// First byte of the highest record.
    pub const START: AldbCursor = AldbCursor { msb: 0x0F, lsb: 0xF8 };

    /// Key of the record the cursor is inside.
    pub fn record_key(&self) -> AldbKey {
        AldbKey::memory(self.msb, self.record_top())
    }

    /// Low byte of the highest address of the current record.
    pub fn record_top(&self) -> u8 {
        self.record_start() + 7
    }

    /// Offset of the cursor inside its record.
    pub fn offset(&self) -> usize {
        (self.lsb % RECORD_LEN as u8) as usize
    }

    fn record_start(&self) -> u8 {
        self.lsb - self.lsb % RECORD_LEN as u8
    }

    /// Moves to the first byte of the record below the current one.
    pub fn previous_record(&mut self) -> ScanStep {
        let start = self.record_start();
        if start >= RECORD_LEN as u8 {
            self.lsb = start - RECORD_LEN as u8;
            ScanStep::Continue
        } else if self.msb == 0 {
            ScanStep::Finished
        } else {
            self.msb -= 1;
            self.lsb = 0xF8;
            ScanStep::NextPage
        }
    }
}

impl Default for AldbCursor {
    fn default() -> Self {
        Self::START
    }
}

/// Link table of one node.
#[derive(Debug, Clone)]
pub struct Aldb {
    style: KeyStyle,
    records: BTreeMap<AldbKey, LinkRecord>,
}

impl Aldb {
    pub fn new(style: KeyStyle) -> Self {
        Self {
            style,
            records: BTreeMap::new(),
        }
    }

    pub fn style(&self) -> KeyStyle {
        self.style
    }

    /// Inserts or replaces the record at `key`.
    pub fn edit(&mut self, key: AldbKey, record: LinkRecord) {
        self.records.insert(key, record);
    }

    pub fn delete(&mut self, key: AldbKey) -> Result<LinkRecord, CoreError> {
        self.records.remove(&key).ok_or_else(|| CoreError::RecordNotFound {
            key: self.key_string(key),
        })
    }

    pub fn get(&self, key: AldbKey) -> Result<LinkRecord, CoreError> {
        self.records.get(&key).copied().ok_or_else(|| CoreError::RecordNotFound {
            key: self.key_string(key),
        })
    }

    /// Copy of every record.
    pub fn get_all(&self) -> BTreeMap<AldbKey, LinkRecord> {
        self.records.clone()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends at the next insertion position.
    pub fn append(&mut self, record: LinkRecord) -> AldbKey {
        let next = self.records.keys().next_back().map_or(1, |k| k.0 + 1);
        let key = AldbKey(next);
        self.records.insert(key, record);
        key
    }

    /// Keys of every record matching `query`, in key order.
    pub fn find_matching(&self, query: &RecordQuery) -> Vec<AldbKey> {
        self.records
            .iter()
            .filter(|(_, record)| query.matches(record))
            .map(|(key, _)| *key)
            .collect()
    }

    /// Stores one peeked byte of a legacy scan and advances the cursor.
    pub fn apply_peek(&mut self, cursor: &mut AldbCursor, byte: u8) -> ScanStep {
        let key = cursor.record_key();
        let offset = cursor.offset();
        if offset == 0 {
            self.records.insert(key, LinkRecord::default());
        }
        let record = self.records.entry(key).or_default();
        record.0[offset] = byte;
        let record = *record;

        if !record.has_more_records() {
            ScanStep::Finished
        } else if !record.in_use() || offset == RECORD_LEN - 1 {
            cursor.previous_record()
        } else {
            cursor.lsb += 1;
            ScanStep::Continue
        }
    }

    /// Stores a whole record read by an extended scan and advances the cursor.
    pub fn apply_record(&mut self, cursor: &mut AldbCursor, record: LinkRecord) -> ScanStep {
        self.records.insert(cursor.record_key(), record);
        if record.has_more_records() {
            cursor.previous_record()
        } else {
            ScanStep::Finished
        }
    }

    pub fn key_string(&self, key: AldbKey) -> String {
        match self.style {
            KeyStyle::Position => format!("{:04}", key.0),
            KeyStyle::Memory => format!("{:04X}", key.0),
        }
    }

    pub fn parse_key(&self, s: &str) -> Result<AldbKey, CoreError> {
        let parsed = match self.style {
            KeyStyle::Position => s.parse::<u16>().ok(),
            KeyStyle::Memory => u16::from_str_radix(s, 16).ok(),
        };
        parsed.map(AldbKey).ok_or_else(|| CoreError::InvalidRecord {
            reason: format!("bad link table key '{s}'"),
        })
    }

    /// Hex-string form used in snapshots.
    pub fn to_snapshot(&self) -> BTreeMap<String, String> {
        self.records
            .iter()
            .map(|(key, record)| (self.key_string(*key), record.to_hex()))
            .collect()
    }

    /// Replaces the contents with records from a snapshot.
    pub fn load_snapshot(&mut self, entries: &BTreeMap<String, String>) -> Result<(), CoreError> {
        let mut records = BTreeMap::new();
        for (key, value) in entries {
            records.insert(self.parse_key(key)?, LinkRecord::from_hex(value)?);
        }
        self.records = records;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr() -> Address {
        Address::new(0x11, 0x22, 0x33)
    }

    #[test]
    fn test_flag_bits() {
        let record = LinkRecord::new(0xE2, 1, addr(), [3, 0x1F, 1]);
        assert!(record.in_use());
        assert!(record.is_controller());
        assert!(!record.is_responder());
        assert!(record.has_more_records());

        let record = LinkRecord::new(0x00, 0, addr(), [0; 3]);
        assert!(!record.in_use());
        assert!(record.is_responder());
        assert!(!record.has_more_records());
    }

    #[test]
    fn test_parsed_record_keeps_flag_byte() {
        let record = LinkRecord::new(0xE2, 1, addr(), [3, 0x1F, 1]);
        let mut parsed = record.parse();
        assert_eq!(parsed.flags, 0xE2);
        assert_eq!(parsed.to_record(), record);

        parsed.in_use = false;
        assert_eq!(parsed.to_record().flags(), 0x62);
        parsed.has_more_records = false;
        parsed.controller = false;
        assert_eq!(parsed.to_record().flags(), 0x20);
    }

    #[test]
    fn test_get_missing_key() {
        let aldb = Aldb::new(KeyStyle::Memory);
        let err = aldb.get(AldbKey::memory(0x0F, 0xFF)).unwrap_err();
        assert!(matches!(err, CoreError::RecordNotFound { key } if key == "0FFF"));
    }

    #[test]
    fn test_edit_delete_clear() {
        let mut aldb = Aldb::new(KeyStyle::Position);
        let key = aldb.append(LinkRecord::new(0xA2, 0, addr(), [0; 3]));
        assert_eq!(aldb.key_string(key), "0001");
        aldb.edit(key, LinkRecord::new(0xE2, 1, addr(), [0; 3]));
        assert_eq!(aldb.get(key).unwrap().group(), 1);

        let second = aldb.append(LinkRecord::default());
        assert_eq!(second, AldbKey(2));
        aldb.delete(key).unwrap();
        assert!(aldb.delete(key).is_err());
        assert_eq!(aldb.append(LinkRecord::default()), AldbKey(3));

        let snapshot = aldb.get_all();
        aldb.clear();
        assert!(aldb.is_empty());
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_find_matching_is_conjunctive() {
        let mut aldb = Aldb::new(KeyStyle::Position);
        let other = Address::new(0xAA, 0xBB, 0xCC);
        let a = aldb.append(LinkRecord::new(0xE2, 1, addr(), [0; 3]));
        let b = aldb.append(LinkRecord::new(0xE2, 1, other, [0; 3]));
        let _c = aldb.append(LinkRecord::new(0xA2, 1, addr(), [0; 3]));
        let _d = aldb.append(LinkRecord::new(0x62, 1, addr(), [0; 3]));

        let query = RecordQuery::new().in_use(true).controller(true).group(1);
        assert_eq!(aldb.find_matching(&query), vec![a, b]);
        assert_eq!(aldb.find_matching(&query.address(addr())), vec![a]);
        assert_eq!(aldb.find_matching(&RecordQuery::new()).len(), 4);
    }

    #[test]
    fn test_legacy_scan_completes_record_and_continues() {
        let mut aldb = Aldb::new(KeyStyle::Memory);
        let mut cursor = AldbCursor::START;
        let bytes = [0xE2, 0x01, 0x11, 0x22, 0x33, 0x03, 0x1F, 0x01];

        for (i, byte) in bytes.iter().enumerate() {
            let step = aldb.apply_peek(&mut cursor, *byte);
            assert_eq!(step, ScanStep::Continue, "byte {i}");
        }

        assert_eq!(aldb.len(), 1);
        let record = aldb.get(AldbKey::memory(0x0F, 0xFF)).unwrap();
        assert_eq!(record.0, bytes);
        assert_eq!(cursor, AldbCursor { msb: 0x0F, lsb: 0xF0 });
    }

    #[test]
    fn test_legacy_scan_stops_on_last_record() {
        let mut aldb = Aldb::new(KeyStyle::Memory);
        let mut cursor = AldbCursor::START;
        assert_eq!(aldb.apply_peek(&mut cursor, 0x00), ScanStep::Finished);
        assert_eq!(aldb.len(), 1);
    }

    #[test]
    fn test_legacy_scan_skips_empty_record() {
        let mut aldb = Aldb::new(KeyStyle::Memory);
        let mut cursor = AldbCursor { msb: 0x0F, lsb: 0xF0 };
        assert_eq!(aldb.apply_peek(&mut cursor, 0x02), ScanStep::Continue);
        assert_eq!(cursor, AldbCursor { msb: 0x0F, lsb: 0xE8 });
    }

    #[test]
    fn test_legacy_scan_rolls_page() {
        let mut aldb = Aldb::new(KeyStyle::Memory);
        let mut cursor = AldbCursor { msb: 0x0F, lsb: 0x07 };
        aldb.edit(AldbKey::memory(0x0F, 0x07), LinkRecord([0xA2, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(aldb.apply_peek(&mut cursor, 0x00), ScanStep::NextPage);
        assert_eq!(cursor, AldbCursor { msb: 0x0E, lsb: 0xF8 });
    }

    #[test]
    fn test_extended_scan_steps() {
        let mut aldb = Aldb::new(KeyStyle::Memory);
        let mut cursor = AldbCursor::START;
        let more = LinkRecord::new(0xE2, 0, addr(), [0; 3]);
        assert_eq!(aldb.apply_record(&mut cursor, more), ScanStep::Continue);
        assert_eq!(cursor.record_key(), AldbKey::memory(0x0F, 0xF7));
        let last = LinkRecord::default();
        assert_eq!(aldb.apply_record(&mut cursor, last), ScanStep::Finished);
        assert_eq!(aldb.len(), 2);
    }

    #[test]
    fn test_cursor_bottom_of_memory() {
        let mut cursor = AldbCursor { msb: 0x00, lsb: 0x00 };
        assert_eq!(cursor.previous_record(), ScanStep::Finished);
    }

    #[test]
    fn test_snapshot_keys() {
        let mut aldb = Aldb::new(KeyStyle::Memory);
        aldb.edit(AldbKey::memory(0x0F, 0xFF), LinkRecord::new(0xE2, 1, addr(), [1, 2, 3]));
        let snapshot = aldb.to_snapshot();
        assert_eq!(snapshot.get("0FFF").map(String::as_str), Some("E201112233010203"));

        let mut restored = Aldb::new(KeyStyle::Memory);
        restored.load_snapshot(&snapshot).unwrap();
        assert_eq!(restored.get_all(), aldb.get_all());

        let mut bad = BTreeMap::new();
        bad.insert("0FFF".to_string(), "E2".to_string());
        assert!(restored.load_snapshot(&bad).is_err());
    }

    proptest! {
        #[test]
        fn prop_record_survives_parse(raw in any::<[u8; 8]>()) {
            let record = LinkRecord(raw);
            prop_assert_eq!(record.parse().to_record(), record);
        }

        #[test]
        fn prop_flags_from_bits(raw in any::<[u8; 8]>()) {
            let record = LinkRecord(raw);
            let parsed = record.parse();
            prop_assert_eq!(parsed.in_use, raw[0] & 0x80 != 0);
            prop_assert_eq!(parsed.controller, raw[0] & 0x40 != 0);
            prop_assert_eq!(parsed.responder, raw[0] & 0x40 == 0);
            prop_assert_eq!(parsed.has_more_records, raw[0] & 0x02 != 0);
            prop_assert_eq!(LinkRecord::from_hex(&record.to_hex()).unwrap(), record);
        }
    }
}
