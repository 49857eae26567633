//! Relocation record groups and their application to loaded code.
//!
//! A group is the unit stored alongside a method's code: a pointer-size
//! total length (counting itself) followed by variable-size records. Each
//! record starts with a fixed header:
//!
//! ```text
//! [size: u16][kind: u8][flags: u8][reserved: u32]
//! ```
//!
//! followed by a kind-specific payload (its length comes from the header
//! size table) and then the offset array, which fills the rest of the
//! record's declared size. Offsets are signed 16-bit deltas by default; the
//! wide flag widens them to 32 bits. With the ordered-pair flag the array
//! holds (high, low) offset pairs for split immediates, stored
//! contiguously; each stored offset addresses the instruction start, and
//! the patch lands 2 bytes past it, skipping the opcode word.
//!
//! Application walks the group record by record, advancing by each record's
//! declared size. The `RelocationApplier` seam supplies target values: it
//! can ignore a record, prepare per-record state once, and patch each site.
//! A kind byte outside the closed set aborts the whole group.

use log::{debug, warn};

use crate::error::AotError;

// ── Record flags ─────────────────────────────────────────────────────────────

/// Offsets in this record are i32 instead of i16.
pub const FLAG_WIDE_OFFSETS: u8 = 0x80;
/// Offsets come as (high, low) ordered pairs for split immediates; the
/// patch site sits 2 bytes past each stored offset.
pub const FLAG_ORDERED_PAIRS: u8 = 0x40;

/// Bytes between a stored ordered-pair offset and its patch site.
pub const ORDERED_PAIR_SKIP: i64 = 2;

/// Bytes of the fixed record header: size, kind, flags, reserved pad.
pub const RECORD_HEADER_SIZE: usize = 8;

const GROUP_WORD: usize = std::mem::size_of::<usize>();

// ── Relocation kinds ─────────────────────────────────────────────────────────

/// The closed set of relocation kinds this runtime understands. The wire
/// encoding is the explicit discriminant; any other byte is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RelocationKind {
    /// Call to a runtime helper, resolved by helper index.
    HelperAddress = 0,
    /// PC-relative reference to another compiled method.
    RelativeMethodAddress = 1,
    /// Absolute address of a compiled method.
    AbsoluteMethodAddress = 2,
    /// Absolute address of a data item.
    DataAddress = 3,
    /// Direct call site targeting another compiled method.
    MethodCallAddress = 4,
    /// Reference to a named external item registered with the runtime.
    ExternalSymbol = 5,
}

pub const NUM_RELOCATION_KINDS: usize = 6;

impl RelocationKind {
    pub fn from_u8(byte: u8) -> Result<Self, AotError> {
        match byte {
            0 => Ok(RelocationKind::HelperAddress),
            1 => Ok(RelocationKind::RelativeMethodAddress),
            2 => Ok(RelocationKind::AbsoluteMethodAddress),
            3 => Ok(RelocationKind::DataAddress),
            4 => Ok(RelocationKind::MethodCallAddress),
            5 => Ok(RelocationKind::ExternalSymbol),
            other => Err(AotError::UnsupportedRelocation(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ── Header size table ────────────────────────────────────────────────────────

/// Per-kind size of the record head (fixed header plus kind-specific
/// payload). The offset array starts right after this many bytes. Injected
/// so targets with richer payloads can extend records without touching the
/// walk logic.
#[derive(Debug, Clone)]
pub struct HeaderSizeTable {
    sizes: [u16; NUM_RELOCATION_KINDS],
}

impl Default for HeaderSizeTable {
    fn default() -> Self {
        let mut sizes = [RECORD_HEADER_SIZE as u16; NUM_RELOCATION_KINDS];
        // These kinds carry a u64 payload: helper index, item ordinal, or
        // name offset into the method's string data.
        sizes[RelocationKind::HelperAddress as usize] = 16;
        sizes[RelocationKind::DataAddress as usize] = 16;
        sizes[RelocationKind::ExternalSymbol as usize] = 16;
        Self { sizes }
    }
}

impl HeaderSizeTable {
    pub fn get(&self, kind: RelocationKind) -> usize {
        self.sizes[kind as usize] as usize
    }

    pub fn set(&mut self, kind: RelocationKind, size: u16) {
        debug_assert!(size as usize >= RECORD_HEADER_SIZE);
        self.sizes[kind as usize] = size;
    }
}

// ── Record view ──────────────────────────────────────────────────────────────

/// One parsed record, borrowing from the group buffer.
#[derive(Debug, Clone, Copy)]
pub struct RelocationRecordView<'a> {
    pub kind: RelocationKind,
    pub flags: u8,
    pub size: u16,
    /// Kind-specific bytes between the fixed header and the offset array.
    pub payload: &'a [u8],
    offsets_raw: &'a [u8],
}

impl<'a> RelocationRecordView<'a> {
    pub fn wide_offsets(&self) -> bool {
        self.flags & FLAG_WIDE_OFFSETS != 0
    }

    pub fn ordered_pairs(&self) -> bool {
        self.flags & FLAG_ORDERED_PAIRS != 0
    }

    fn read_offset(&self, pos: usize) -> i64 {
        if self.wide_offsets() {
            crate::elf::read_u32(self.offsets_raw, pos) as i32 as i64
        } else {
            crate::elf::read_u16(self.offsets_raw, pos) as i16 as i64
        }
    }

    fn offset_width(&self) -> usize {
        if self.wide_offsets() { 4 } else { 2 }
    }

    /// Single patch-site offsets, as signed deltas from the relocation
    /// origin. Valid only without the ordered-pair flag.
    pub fn offsets(&self) -> impl Iterator<Item = i64> + '_ {
        let width = self.offset_width();
        (0..self.offsets_raw.len() / width).map(move |i| self.read_offset(i * width))
    }

    /// (high, low) offset pairs, stored back-to-back. The patch sites sit
    /// `ORDERED_PAIR_SKIP` bytes past each stored offset.
    pub fn offset_pairs(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        let width = self.offset_width();
        let stride = width * 2;
        (0..self.offsets_raw.len() / stride)
            .map(move |i| (self.read_offset(i * stride), self.read_offset(i * stride + width)))
    }

    fn validate_offset_array(&self) -> Result<(), AotError> {
        let stride = if self.ordered_pairs() {
            self.offset_width() * 2
        } else {
            self.offset_width()
        };
        if self.offsets_raw.len() % stride != 0 {
            return Err(AotError::MalformedGroup(format!(
                "offset array of {} bytes not a multiple of stride {}",
                self.offsets_raw.len(),
                stride
            )));
        }
        Ok(())
    }
}

// ── Applier seam ─────────────────────────────────────────────────────────────

/// What to do with one record, decided before any site is patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationAction {
    /// Skip the record entirely.
    Ignore,
    /// Patch every site.
    Apply,
    /// Abort application of the whole group.
    Fail,
}

/// Supplies target values and patch logic for each relocation kind.
///
/// `prepare` runs once per record before its sites are patched; expensive
/// lookups (resolving a name, computing a target address) belong there so
/// they are not repeated at every site.
pub trait RelocationApplier {
    fn action(&self, record: &RelocationRecordView) -> RelocationAction {
        let _ = record;
        RelocationAction::Apply
    }

    fn prepare(&mut self, record: &RelocationRecordView) -> Result<(), AotError> {
        let _ = record;
        Ok(())
    }

    /// Patch one site. `offset` is pre-validated to lie inside `code`.
    fn apply(
        &mut self,
        record: &RelocationRecordView,
        code: &mut [u8],
        offset: usize,
    ) -> Result<(), AotError>;

    /// Patch one split-immediate site pair. Only called for records with the
    /// ordered-pair flag.
    fn apply_pair(
        &mut self,
        record: &RelocationRecordView,
        code: &mut [u8],
        high: usize,
        low: usize,
    ) -> Result<(), AotError> {
        let _ = (record, code, high, low);
        Err(AotError::MalformedGroup(
            "ordered-pair record but applier has no pair support".to_string(),
        ))
    }
}

/// A signed delta is a valid patch site only when it lands inside the code.
fn checked_site(offset: i64, code_len: usize) -> Option<usize> {
    usize::try_from(offset).ok().filter(|&site| site < code_len)
}

// ── Record group ─────────────────────────────────────────────────────────────

/// A parsed relocation record group. Borrows the serialized bytes; parsing
/// validates only the group framing, records are checked as the walk
/// reaches them.
pub struct RelocationRecordGroup<'a> {
    records: &'a [u8],
}

impl<'a> RelocationRecordGroup<'a> {
    /// Validate the group length word and wrap the record bytes.
    pub fn parse(buf: &'a [u8]) -> Result<Self, AotError> {
        if buf.is_empty() {
            // A method with no relocations stores an empty group.
            return Ok(Self { records: &[] });
        }
        if buf.len() < GROUP_WORD {
            return Err(AotError::MalformedGroup(format!(
                "group of {} bytes cannot hold its length word",
                buf.len()
            )));
        }
        let mut word = [0u8; GROUP_WORD];
        word.copy_from_slice(&buf[..GROUP_WORD]);
        let total = usize::from_le_bytes(word);
        if total < GROUP_WORD || total > buf.len() {
            return Err(AotError::MalformedGroup(format!(
                "group declares {} bytes, buffer holds {}",
                total,
                buf.len()
            )));
        }
        Ok(Self { records: &buf[GROUP_WORD..total] })
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Parse the record starting at `pos`. Returns the view and the position
    /// of the next record.
    fn record_at(
        &self,
        pos: usize,
        sizes: &HeaderSizeTable,
    ) -> Result<(RelocationRecordView<'a>, usize), AotError> {
        let rest = &self.records[pos..];
        if rest.len() < RECORD_HEADER_SIZE {
            return Err(AotError::MalformedGroup(format!(
                "record header truncated at byte {}",
                pos
            )));
        }
        let size = crate::elf::read_u16(rest, 0) as usize;
        let kind = RelocationKind::from_u8(rest[2])?;
        let flags = rest[3];
        let head = sizes.get(kind);
        if size < head || size > rest.len() {
            return Err(AotError::MalformedGroup(format!(
                "record of kind {:?} declares {} bytes (head {}, remaining {})",
                kind,
                size,
                head,
                rest.len()
            )));
        }
        let view = RelocationRecordView {
            kind,
            flags,
            size: size as u16,
            payload: &rest[RECORD_HEADER_SIZE..head],
            offsets_raw: &rest[head..size],
        };
        view.validate_offset_array()?;
        Ok((view, pos + size))
    }

    /// Collect every record in the group, validating framing as a whole.
    pub fn records(
        &self,
        sizes: &HeaderSizeTable,
    ) -> Result<Vec<RelocationRecordView<'a>>, AotError> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < self.records.len() {
            let (view, next) = self.record_at(pos, sizes)?;
            out.push(view);
            pos = next;
        }
        Ok(out)
    }

    /// Apply every record to `code`, whose first byte is the relocation
    /// origin. Offsets are validated against the code bounds before the
    /// applier sees them.
    pub fn apply_relocations(
        &self,
        code: &mut [u8],
        applier: &mut dyn RelocationApplier,
        sizes: &HeaderSizeTable,
    ) -> Result<(), AotError> {
        let mut pos = 0;
        let mut applied = 0usize;
        while pos < self.records.len() {
            let (record, next) = self.record_at(pos, sizes)?;
            pos = next;
            match applier.action(&record) {
                RelocationAction::Ignore => {
                    warn!("ignoring relocation record of kind {:?}", record.kind);
                    continue;
                }
                RelocationAction::Fail => {
                    return Err(AotError::UnsupportedRelocation(record.kind.as_u8()));
                }
                RelocationAction::Apply => {}
            }
            applier.prepare(&record)?;
            if record.ordered_pairs() {
                for (high, low) in record.offset_pairs() {
                    // Stored offsets address the instruction start; the
                    // immediate halves sit past the opcode word.
                    let h = checked_site(high + ORDERED_PAIR_SKIP, code.len())
                        .ok_or(AotError::OffsetOutOfBounds(high))?;
                    let l = checked_site(low + ORDERED_PAIR_SKIP, code.len())
                        .ok_or(AotError::OffsetOutOfBounds(low))?;
                    applier.apply_pair(&record, code, h, l)?;
                    applied += 1;
                }
            } else {
                for offset in record.offsets() {
                    let site = checked_site(offset, code.len())
                        .ok_or(AotError::OffsetOutOfBounds(offset))?;
                    applier.apply(&record, code, site)?;
                    applied += 1;
                }
            }
        }
        debug!("applied {} relocation site(s)", applied);
        Ok(())
    }
}

// ── Group builder ────────────────────────────────────────────────────────────

/// Builds a serialized relocation record group. The compile side appends
/// records as it discovers patch sites and stores the finished bytes in the
/// method envelope.
#[derive(Debug)]
pub struct RelocationGroupBuilder {
    sizes: HeaderSizeTable,
    records: Vec<u8>,
}

impl RelocationGroupBuilder {
    pub fn new(sizes: HeaderSizeTable) -> Self {
        Self { sizes, records: Vec::new() }
    }

    fn check_payload(&self, kind: RelocationKind, payload: &[u8]) -> Result<(), AotError> {
        let head = self.sizes.get(kind);
        if payload.len() != head - RECORD_HEADER_SIZE {
            return Err(AotError::MalformedGroup(format!(
                "kind {:?} expects {} payload bytes, got {}",
                kind,
                head - RECORD_HEADER_SIZE,
                payload.len()
            )));
        }
        Ok(())
    }

    fn offset_flags(mut flags: u8, offsets: impl Iterator<Item = i64>) -> Result<u8, AotError> {
        for offset in offsets {
            if offset > i32::MAX as i64 || offset < i32::MIN as i64 {
                return Err(AotError::MalformedGroup(format!(
                    "offset {} not encodable as a 32-bit delta",
                    offset
                )));
            }
            if offset > i16::MAX as i64 || offset < i16::MIN as i64 {
                flags |= FLAG_WIDE_OFFSETS;
            }
        }
        Ok(flags)
    }

    fn write_offset(buf: &mut Vec<u8>, offset: i64, width: usize) {
        if width == 4 {
            buf.extend_from_slice(&(offset as i32).to_le_bytes());
        } else {
            buf.extend_from_slice(&(offset as i16).to_le_bytes());
        }
    }

    /// Append a record with single patch-site offsets. Offsets outside i16
    /// range force the wide flag; callers can also request it via `flags`.
    pub fn record(
        &mut self,
        kind: RelocationKind,
        flags: u8,
        payload: &[u8],
        offsets: &[i64],
    ) -> Result<&mut Self, AotError> {
        self.check_payload(kind, payload)?;
        let flags =
            Self::offset_flags(flags & !FLAG_ORDERED_PAIRS, offsets.iter().copied())?;
        let width = if flags & FLAG_WIDE_OFFSETS != 0 { 4 } else { 2 };
        self.push_record(kind, flags, payload, offsets.len() * width, |buf| {
            for &o in offsets {
                Self::write_offset(buf, o, width);
            }
        })
    }

    /// Append a record with (high, low) ordered offset pairs. Stored
    /// offsets address instruction starts; application patches 2 bytes
    /// past each one.
    pub fn record_pairs(
        &mut self,
        kind: RelocationKind,
        flags: u8,
        payload: &[u8],
        pairs: &[(i64, i64)],
    ) -> Result<&mut Self, AotError> {
        self.check_payload(kind, payload)?;
        let flags = Self::offset_flags(
            flags | FLAG_ORDERED_PAIRS,
            pairs.iter().flat_map(|&(h, l)| [h, l]),
        )?;
        let width = if flags & FLAG_WIDE_OFFSETS != 0 { 4 } else { 2 };
        self.push_record(kind, flags, payload, pairs.len() * width * 2, |buf| {
            for &(h, l) in pairs {
                Self::write_offset(buf, h, width);
                Self::write_offset(buf, l, width);
            }
        })
    }

    fn push_record(
        &mut self,
        kind: RelocationKind,
        flags: u8,
        payload: &[u8],
        offsets_len: usize,
        write_offsets: impl FnOnce(&mut Vec<u8>),
    ) -> Result<&mut Self, AotError> {
        let head = self.sizes.get(kind);
        let size = head + offsets_len;
        if size > u16::MAX as usize {
            return Err(AotError::MalformedGroup(format!(
                "record of {} bytes exceeds the u16 size field",
                size
            )));
        }
        self.records.extend_from_slice(&(size as u16).to_le_bytes());
        self.records.push(kind.as_u8());
        self.records.push(flags);
        self.records.extend_from_slice(&[0u8; 4]);
        self.records.extend_from_slice(payload);
        let before = self.records.len();
        write_offsets(&mut self.records);
        debug_assert_eq!(self.records.len() - before, offsets_len);
        Ok(self)
    }

    /// Serialize the group: length word followed by the records.
    pub fn finish(&self) -> Vec<u8> {
        let total = GROUP_WORD + self.records.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&total.to_le_bytes());
        out.extend_from_slice(&self.records);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes a fixed u32 value at every site; pairs get the value split
    /// into 16-bit halves.
    struct ValuePatcher {
        value: u32,
        prepares: usize,
        skip_data: bool,
    }

    impl ValuePatcher {
        fn new(value: u32) -> Self {
            Self { value, prepares: 0, skip_data: false }
        }
    }

    impl RelocationApplier for ValuePatcher {
        fn action(&self, record: &RelocationRecordView) -> RelocationAction {
            if self.skip_data && record.kind == RelocationKind::DataAddress {
                RelocationAction::Ignore
            } else {
                RelocationAction::Apply
            }
        }

        fn prepare(&mut self, _record: &RelocationRecordView) -> Result<(), AotError> {
            self.prepares += 1;
            Ok(())
        }

        fn apply(
            &mut self,
            _record: &RelocationRecordView,
            code: &mut [u8],
            offset: usize,
        ) -> Result<(), AotError> {
            if offset + 4 > code.len() {
                return Err(AotError::OffsetOutOfBounds(offset as i64));
            }
            code[offset..offset + 4].copy_from_slice(&self.value.to_le_bytes());
            Ok(())
        }

        fn apply_pair(
            &mut self,
            _record: &RelocationRecordView,
            code: &mut [u8],
            high: usize,
            low: usize,
        ) -> Result<(), AotError> {
            code[high..high + 2].copy_from_slice(&((self.value >> 16) as u16).to_le_bytes());
            code[low..low + 2].copy_from_slice(&((self.value & 0xffff) as u16).to_le_bytes());
            Ok(())
        }
    }

    fn build_group(f: impl FnOnce(&mut RelocationGroupBuilder)) -> Vec<u8> {
        let mut builder = RelocationGroupBuilder::new(HeaderSizeTable::default());
        f(&mut builder);
        builder.finish()
    }

    #[test]
    fn test_apply_at_all_sites() {
        let bytes = build_group(|b| {
            b.record(RelocationKind::MethodCallAddress, 0, &[], &[0, 8, 20]).unwrap();
        });
        let group = RelocationRecordGroup::parse(&bytes).unwrap();
        let mut code = vec![0u8; 24];
        let mut patcher = ValuePatcher::new(0xcafe_f00d);
        group
            .apply_relocations(&mut code, &mut patcher, &HeaderSizeTable::default())
            .unwrap();
        for &site in &[0usize, 8, 20] {
            assert_eq!(crate::elf::read_u32(&code, site), 0xcafe_f00d);
        }
        // One prepare per record, not per site.
        assert_eq!(patcher.prepares, 1);
    }

    #[test]
    fn test_wide_offsets_forced_by_large_site() {
        let bytes = build_group(|b| {
            b.record(RelocationKind::MethodCallAddress, 0, &[], &[0x1_0000]).unwrap();
        });
        let group = RelocationRecordGroup::parse(&bytes).unwrap();
        let records = group.records(&HeaderSizeTable::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].wide_offsets());
        assert_eq!(records[0].offsets().collect::<Vec<_>>(), vec![0x1_0000]);
    }

    #[test]
    fn test_ordered_pairs_skip_the_opcode_word() {
        let bytes = build_group(|b| {
            b.record_pairs(RelocationKind::RelativeMethodAddress, 0, &[], &[(0, 4)]).unwrap();
        });
        let group = RelocationRecordGroup::parse(&bytes).unwrap();
        let mut code = vec![0u8; 8];
        let mut patcher = ValuePatcher::new(0x1234_5678);
        group
            .apply_relocations(&mut code, &mut patcher, &HeaderSizeTable::default())
            .unwrap();
        // Stored offsets 0 and 4 address instruction starts; the immediate
        // halves land 2 bytes past each.
        assert_eq!(crate::elf::read_u16(&code, 2), 0x1234);
        assert_eq!(crate::elf::read_u16(&code, 6), 0x5678);
        assert_eq!(crate::elf::read_u16(&code, 0), 0);
        assert_eq!(crate::elf::read_u16(&code, 4), 0);
    }

    #[test]
    fn test_ordered_pairs_stored_contiguously() {
        let bytes = build_group(|b| {
            b.record_pairs(RelocationKind::RelativeMethodAddress, 0, &[], &[(0, 4), (8, 12)])
                .unwrap();
        });
        let group = RelocationRecordGroup::parse(&bytes).unwrap();
        let records = group.records(&HeaderSizeTable::default()).unwrap();
        // Four narrow offsets, no padding between the pairs.
        assert_eq!(records[0].size as usize, RECORD_HEADER_SIZE + 4 * 2);
        assert_eq!(
            records[0].offset_pairs().collect::<Vec<_>>(),
            vec![(0, 4), (8, 12)]
        );
    }

    #[test]
    fn test_negative_offset_rejected() {
        // Hand-encode a record whose narrow offset decodes to -1.
        let mut records = Vec::new();
        records.extend_from_slice(&10u16.to_le_bytes());
        records.push(RelocationKind::MethodCallAddress.as_u8());
        records.push(0);
        records.extend_from_slice(&[0u8; 4]);
        records.extend_from_slice(&(-1i16).to_le_bytes());
        let mut bytes = (GROUP_WORD + records.len()).to_le_bytes().to_vec();
        bytes.extend_from_slice(&records);

        let group = RelocationRecordGroup::parse(&bytes).unwrap();
        let mut code = vec![0u8; 8];
        let mut patcher = ValuePatcher::new(0);
        let err = group
            .apply_relocations(&mut code, &mut patcher, &HeaderSizeTable::default())
            .unwrap_err();
        assert!(matches!(err, AotError::OffsetOutOfBounds(-1)));
    }

    #[test]
    fn test_builder_rejects_unencodable_offset() {
        let mut builder = RelocationGroupBuilder::new(HeaderSizeTable::default());
        let err = builder
            .record(RelocationKind::MethodCallAddress, 0, &[], &[i32::MAX as i64 + 1])
            .unwrap_err();
        assert!(matches!(err, AotError::MalformedGroup(_)));
    }

    #[test]
    fn test_unknown_kind_aborts() {
        let mut bytes = build_group(|b| {
            b.record(RelocationKind::MethodCallAddress, 0, &[], &[0]).unwrap();
        });
        // Corrupt the kind byte of the first record.
        bytes[GROUP_WORD + 2] = 99;
        let group = RelocationRecordGroup::parse(&bytes).unwrap();
        let mut code = vec![0u8; 8];
        let mut patcher = ValuePatcher::new(0);
        let err = group
            .apply_relocations(&mut code, &mut patcher, &HeaderSizeTable::default())
            .unwrap_err();
        assert!(matches!(err, AotError::UnsupportedRelocation(99)));
    }

    #[test]
    fn test_offset_out_of_bounds_rejected() {
        let bytes = build_group(|b| {
            b.record(RelocationKind::MethodCallAddress, 0, &[], &[100]).unwrap();
        });
        let group = RelocationRecordGroup::parse(&bytes).unwrap();
        let mut code = vec![0u8; 8];
        let mut patcher = ValuePatcher::new(0);
        let err = group
            .apply_relocations(&mut code, &mut patcher, &HeaderSizeTable::default())
            .unwrap_err();
        assert!(matches!(err, AotError::OffsetOutOfBounds(100)));
    }

    #[test]
    fn test_ignored_record_skips_sites() {
        let bytes = build_group(|b| {
            b.record(RelocationKind::DataAddress, 0, &[0u8; 8], &[0]).unwrap();
            b.record(RelocationKind::MethodCallAddress, 0, &[], &[4]).unwrap();
        });
        let group = RelocationRecordGroup::parse(&bytes).unwrap();
        let mut code = vec![0u8; 8];
        let mut patcher = ValuePatcher::new(0xffff_ffff);
        patcher.skip_data = true;
        group
            .apply_relocations(&mut code, &mut patcher, &HeaderSizeTable::default())
            .unwrap();
        assert_eq!(crate::elf::read_u32(&code, 0), 0);
        assert_eq!(crate::elf::read_u32(&code, 4), 0xffff_ffff);
    }

    #[test]
    fn test_truncated_record_is_malformed() {
        let mut builder = RelocationGroupBuilder::new(HeaderSizeTable::default());
        builder.record(RelocationKind::MethodCallAddress, 0, &[], &[0, 4]).unwrap();
        let mut bytes = builder.finish();
        // Inflate the record's declared size past the group end.
        let size_pos = GROUP_WORD;
        bytes[size_pos] = 0xff;
        let group = RelocationRecordGroup::parse(&bytes).unwrap();
        assert!(group.records(&HeaderSizeTable::default()).is_err());
    }

    #[test]
    fn test_empty_group() {
        let group = RelocationRecordGroup::parse(&[]).unwrap();
        assert!(group.is_empty());
        let mut code = vec![0u8; 4];
        let mut patcher = ValuePatcher::new(0);
        group
            .apply_relocations(&mut code, &mut patcher, &HeaderSizeTable::default())
            .unwrap();
        assert_eq!(code, vec![0u8; 4]);
    }

    #[test]
    fn test_group_length_word_validated() {
        let bad = 3usize.to_le_bytes().to_vec();
        assert!(RelocationRecordGroup::parse(&bad).is_err());
    }
}
