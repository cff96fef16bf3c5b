// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Management of user-defined fields (UDFs).  Packet fields that the field
//! processor cannot qualify on natively are matched by extracting fixed-size
//! chunks of the packet at a layer and offset.  The hardware groups these
//! chunks into a small number of sets, and each ACL table may draw its UDF
//! qualifiers from only one set.  This module decides which chunks each
//! table needs, packs them into sets, and translates field values into
//! per-chunk qualifiers at entry programming time.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use slog::{debug, info, o};

use aal::{AclStage, AsicOps, Field, FieldType, PacketLayer, Unit, Value};
use common::p4::{MappedField, MappedValue, P4FieldType, P4HeaderType};

use crate::acl_table::AclTable;
use crate::hw_specs::UdfSpec;
use crate::mapper::P4TableMapper;
use crate::types::*;

/// Decides whether a match field of a table in the given stage should be
/// implemented as a UDF.
pub type UdfEligibility = fn(&MappedField, AclStage) -> bool;

/// The eligibility predicate used unless the caller supplies its own.
pub fn default_is_udf_eligible(field: &MappedField, stage: AclStage) -> bool {
    if stage == AclStage::Unknown {
        return false;
    }
    matches!(field.field_type, P4FieldType::ArpTpa)
}

/// The packet layer a header lives in.  Tunnels are not considered.
pub fn header_type_to_packet_layer(header: P4HeaderType) -> PacketLayer {
    match header {
        P4HeaderType::Ethernet => PacketLayer::L2,
        P4HeaderType::Arp | P4HeaderType::Ipv4 | P4HeaderType::Ipv6 => {
            PacketLayer::L3
        }
        P4HeaderType::Gre
        | P4HeaderType::Icmp
        | P4HeaderType::Tcp
        | P4HeaderType::Udp => PacketLayer::L4,
        _ => PacketLayer::Unknown,
    }
}

/// A chunk of packet data at a fixed layer and offset.  Chunks are equal if
/// they extract the same bits, regardless of the id they were assigned.
#[derive(Debug, Clone, Copy)]
pub struct UdfChunk {
    layer: PacketLayer,
    /// Offset in bits, always a multiple of the chunk size
    offset: u32,
    /// Size in bits
    size: u32,
    id: u32,
}

impl UdfChunk {
    pub fn new(layer: PacketLayer, offset: u32, size: u32) -> Self {
        UdfChunk {
            layer,
            offset: offset - (offset % size),
            size,
            id: 0,
        }
    }

    pub fn layer(&self) -> PacketLayer {
        self.layer
    }

    pub fn bit_offset(&self) -> u32 {
        self.offset
    }

    pub fn byte_offset(&self) -> u32 {
        self.offset / 8
    }

    pub fn bit_size(&self) -> u32 {
        self.size
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn key(&self) -> (PacketLayer, u32) {
        (self.layer, self.offset)
    }
}

impl PartialEq for UdfChunk {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for UdfChunk {}

impl std::fmt::Display for UdfChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(id: {}, layer: {}, offset: {}, size: {} bits)",
            self.id, self.layer, self.offset, self.size
        )
    }
}

/// Return the smallest run of chunks that covers every bit of `field`, or
/// nothing if the field's header cannot be reached by a UDF.
pub fn mapped_field_to_udf_chunks(
    field: &MappedField,
    chunk_size: u32,
) -> Vec<UdfChunk> {
    let layer = header_type_to_packet_layer(field.header_type);
    if layer == PacketLayer::Unknown || chunk_size == 0 || field.bit_width == 0
    {
        return Vec::new();
    }
    let first_bit = field.bit_offset;
    let last_bit = field.bit_offset + field.bit_width - 1;
    let first_base = (first_bit / chunk_size) * chunk_size;
    (first_base..=last_bit)
        .step_by(chunk_size as usize)
        .map(|offset| UdfChunk::new(layer, offset, chunk_size))
        .collect()
}

/// Who defines the chunks of a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UdfSetUsage {
    /// Chunks are defined by the controller at runtime
    Controller,
    /// Chunks are defined by the switch when a pipeline is pushed
    Static,
}

/// A bounded collection of chunks.  Chunk ids are assigned sequentially
/// from the set's base id as chunks are added.
#[derive(Debug, Clone)]
pub struct UdfSet {
    usage: UdfSetUsage,
    base_chunk_id: u32,
    max_chunks: usize,
    chunks: BTreeMap<(PacketLayer, u32), UdfChunk>,
}

impl UdfSet {
    pub fn new(usage: UdfSetUsage, base_chunk_id: u32, max_chunks: usize) -> Self {
        UdfSet {
            usage,
            base_chunk_id,
            max_chunks,
            chunks: BTreeMap::new(),
        }
    }

    pub fn usage(&self) -> UdfSetUsage {
        self.usage
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &UdfChunk> {
        self.chunks.values()
    }

    /// Return this set's copy of `chunk`, with the id it was assigned here.
    pub fn find(&self, chunk: &UdfChunk) -> Option<&UdfChunk> {
        self.chunks.get(&chunk.key())
    }

    /// Add every chunk not already present.  If that would take the set past
    /// its maximum, nothing is added and false is returned.
    pub fn add_chunks<'a>(
        &mut self,
        chunks: impl IntoIterator<Item = &'a UdfChunk>,
    ) -> bool {
        let mut inserted = Vec::new();
        for chunk in chunks {
            let key = chunk.key();
            if self.chunks.contains_key(&key) {
                continue;
            }
            let id = self.base_chunk_id + self.chunks.len() as u32;
            self.chunks.insert(key, UdfChunk { id, ..*chunk });
            inserted.push(key);
        }
        if self.chunks.len() > self.max_chunks {
            for key in inserted {
                self.chunks.remove(&key);
            }
            return false;
        }
        true
    }

    pub fn merge_from(&mut self, other: &UdfSet) -> bool {
        self.add_chunks(other.chunks.values())
    }
}

pub struct UdfManager {
    log: slog::Logger,
    unit: Unit,
    chunk_size: u32,
    chunks_per_set: usize,
    sets: BTreeMap<u32, UdfSet>,
    is_udf_eligible: UdfEligibility,
}

impl UdfManager {
    /// Build the manager for a unit with the given UDF geometry.  The first
    /// `num_controller_sets` sets are reserved for the controller and the rest
    /// are used for static allocation.  Set ids start at 1, as do chunk ids.
    pub fn new(
        log: &slog::Logger,
        unit: Unit,
        spec: &UdfSpec,
        num_controller_sets: u32,
        is_udf_eligible: Option<UdfEligibility>,
    ) -> BcmdResult<Self> {
        if num_controller_sets > spec.set_count {
            return Err(BcmdError::Invalid(format!(
                "cannot allocate more controller udf sets ({}) than hardware \
                 udf sets ({})",
                num_controller_sets, spec.set_count
            )));
        }
        let log = log.new(o!("unit" => "udf_manager", "bcm_unit" => unit));

        let mut sets = BTreeMap::new();
        let mut base_chunk_id = 1;
        for id in 1..=spec.set_count {
            let usage = if id <= num_controller_sets {
                UdfSetUsage::Controller
            } else {
                UdfSetUsage::Static
            };
            sets.insert(
                id,
                UdfSet::new(usage, base_chunk_id, spec.chunks_per_set as usize),
            );
            base_chunk_id += spec.chunks_per_set;
        }
        debug!(log, "created udf manager";
            "sets" => spec.set_count,
            "controller_sets" => num_controller_sets,
            "chunk_bits" => spec.chunk_bits);

        Ok(UdfManager {
            log,
            unit,
            chunk_size: spec.chunk_bits,
            chunks_per_set: spec.chunks_per_set as usize,
            sets,
            is_udf_eligible: is_udf_eligible.unwrap_or(default_is_udf_eligible),
        })
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn udf_set(&self, id: u32) -> Option<&UdfSet> {
        self.sets.get(&id)
    }

    /// Ids of the sets with the given usage, in ascending order.
    pub fn sets_by_usage(&self, usage: UdfSetUsage) -> Vec<u32> {
        self.sets
            .iter()
            .filter(|(_, s)| s.usage == usage)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ids of the chunks configured in a set.
    pub fn chunk_ids(&self, set_id: u32) -> BTreeSet<u32> {
        self.sets
            .get(&set_id)
            .map(|s| s.chunks().map(|c| c.id).collect())
            .unwrap_or_default()
    }

    /// Compute the chunks a table's eligible match fields need, as a
    /// temporary set, along with the ids of those fields.
    pub fn static_udf_set_from_acl_table(
        &self,
        table: &AclTable,
        mapper: &dyn P4TableMapper,
    ) -> BcmdResult<(UdfSet, Vec<u32>)> {
        let mut set = UdfSet::new(UdfSetUsage::Static, 0, self.chunks_per_set);
        let mut fields = Vec::new();
        for field_id in table.match_fields() {
            let field = mapper.map_match_field(table.id(), *field_id)?;
            if !(self.is_udf_eligible)(&field, table.stage()) {
                continue;
            }
            fields.push(*field_id);

            let chunks = mapped_field_to_udf_chunks(&field, self.chunk_size);
            if chunks.is_empty() {
                return Err(BcmdError::Invalid(format!(
                    "table {} field type {} cannot be converted to udf",
                    table.name(),
                    field.field_type
                )));
            }
            if !set.add_chunks(&chunks) {
                return Err(BcmdError::NoResource(format!(
                    "table {} requires more than the maximum {} udf chunks \
                     per set",
                    table.name(),
                    self.chunks_per_set
                )));
            }
        }
        Ok((set, fields))
    }

    /// Merge `input` into whichever destination set it grows the least,
    /// returning that set's id.
    pub fn allocate_udf_set(
        &mut self,
        input: &UdfSet,
        destinations: &[u32],
    ) -> BcmdResult<u32> {
        let mut best: Option<(u32, usize)> = None;
        for id in destinations {
            let candidate = self.sets.get(id).ok_or_else(|| {
                BcmdError::Internal(format!("unknown destination udf set {id}"))
            })?;
            let mut merged = candidate.clone();
            if !merged.merge_from(input) {
                continue;
            }
            let impact = merged.len() - candidate.len();
            if best.map(|(_, b)| impact < b).unwrap_or(true) {
                best = Some((*id, impact));
            }
        }

        let (id, _) = best.ok_or_else(|| {
            BcmdError::NoResource(
                "not enough free udf chunks for the required set".to_string(),
            )
        })?;
        let set = self.sets.get_mut(&id).ok_or_else(|| {
            BcmdError::Internal(format!("udf set {id} disappeared"))
        })?;
        if !set.merge_from(input) {
            return Err(BcmdError::Internal(format!(
                "merge into udf set {id} failed after a successful trial"
            )));
        }
        Ok(id)
    }

    /// Allocate static UDF chunks for every table that needs them, and mark
    /// the affected match fields on each table.
    pub fn set_up_static_udfs(
        &mut self,
        tables: &mut [AclTable],
        mapper: &dyn P4TableMapper,
    ) -> BcmdResult<()> {
        let mut required = Vec::new();
        for (idx, table) in tables.iter().enumerate() {
            let (set, fields) =
                self.static_udf_set_from_acl_table(table, mapper)?;
            if !set.is_empty() {
                required.push((idx, set, fields));
            }
        }
        if required.is_empty() {
            return Ok(());
        }

        let static_sets = self.sets_by_usage(UdfSetUsage::Static);
        for (idx, set, fields) in required {
            let table = &mut tables[idx];
            let set_id =
                self.allocate_udf_set(&set, &static_sets).with_context(|| {
                    format!("allocating udf set for table {}", table.name())
                })?;
            debug!(self.log, "allocated udf set";
                "table" => table.name(),
                "udf_set" => set_id,
                "chunks" => set.len());
            for field_id in fields {
                table.mark_udf_match_field(field_id, set_id)?;
            }
        }
        Ok(())
    }

    /// Program every allocated chunk into the hardware.
    pub fn install_udfs(&self, asic: &dyn AsicOps) -> BcmdResult<()> {
        let chunks: Vec<aal::UdfChunk> = self
            .sets
            .values()
            .flat_map(|s| s.chunks())
            .map(|c| aal::UdfChunk {
                id: c.id,
                layer: c.layer,
                offset: c.byte_offset(),
            })
            .collect();
        if chunks.is_empty() {
            return Ok(());
        }
        info!(self.log, "installing udf chunks"; "count" => chunks.len());
        let config = aal::UdfChunkConfig {
            chunk_size: self.chunk_size / 8,
            chunks,
        };
        asic.set_acl_udf_chunks(self.unit, &config)?;
        Ok(())
    }

    /// Translate a match field of a table using `set_id` into one vendor
    /// qualifier per chunk it spans.
    pub fn mapped_field_to_vendor_fields(
        &self,
        set_id: u32,
        field: &MappedField,
    ) -> BcmdResult<Vec<Field>> {
        let set = self.sets.get(&set_id).ok_or_else(|| {
            BcmdError::Invalid(format!("unknown udf set {set_id}"))
        })?;
        let reference = mapped_field_to_udf_chunks(field, self.chunk_size);
        if reference.is_empty() {
            return Err(BcmdError::Invalid(format!(
                "udf is not supported for field type {}",
                field.field_type
            )));
        }

        let mut fields = Vec::with_capacity(reference.len());
        for chunk in reference {
            let assigned = set.find(&chunk).ok_or_else(|| {
                BcmdError::Internal(format!(
                    "required udf chunk {chunk} is not in udf set {set_id}"
                ))
            })?;
            let f = create_vendor_field(assigned, field).with_context(|| {
                format!("building qualifier for udf chunk {assigned}")
            })?;
            fields.push(f);
        }
        Ok(fields)
    }

    /// Reassemble the value and mask of `field` from the per-chunk
    /// qualifiers of a flow read back from the hardware.
    pub fn vendor_fields_to_mapped_value(
        &self,
        set_id: u32,
        field: &MappedField,
        vendor_fields: &[Field],
    ) -> BcmdResult<(MappedValue, MappedValue)> {
        let set = self.sets.get(&set_id).ok_or_else(|| {
            BcmdError::Invalid(format!("unknown udf set {set_id}"))
        })?;
        let len = field.bit_width.div_ceil(8) as usize;
        let mut value = vec![0u8; len];
        let mut mask = vec![0u8; len];
        for chunk in mapped_field_to_udf_chunks(field, self.chunk_size) {
            let assigned = set.find(&chunk).ok_or_else(|| {
                BcmdError::Internal(format!(
                    "required udf chunk {chunk} is not in udf set {set_id}"
                ))
            })?;
            let qualifier = vendor_fields
                .iter()
                .find(|f| {
                    f.field_type == FieldType::Udf
                        && f.udf_chunk_id == Some(assigned.id)
                })
                .ok_or_else(|| {
                    BcmdError::Internal(format!(
                        "flow has no qualifier for udf chunk {assigned}"
                    ))
                })?;
            let chunk_value = value_bytes(&qualifier.value);
            let chunk_mask = match &qualifier.mask {
                Some(m) => value_bytes(m),
                None => vec![0xff; assigned.size.div_ceil(8) as usize],
            };
            copy_chunk_bits(assigned, field, &chunk_value, &mut value);
            copy_chunk_bits(assigned, field, &chunk_mask, &mut mask);
        }
        Ok((
            crate::mapper::bytes_to_value(&value, field.bit_width)?,
            crate::mapper::bytes_to_value(&mask, field.bit_width)?,
        ))
    }
}

fn value_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::U32(v) => v.to_be_bytes().to_vec(),
        Value::U64(v) => v.to_be_bytes().to_vec(),
        Value::Bytes(b) => b.clone(),
    }
}

// The inverse of `offset_buffer`: copy the bits of a chunk-aligned buffer
// that fall within the field into its right-justified buffer.
fn copy_chunk_bits(
    chunk: &UdfChunk,
    field: &MappedField,
    chunk_buf: &[u8],
    field_buf: &mut [u8],
) {
    let field_end = field.bit_offset + field.bit_width;
    let first = chunk.offset.max(field.bit_offset);
    let last = (chunk.offset + chunk.size).min(field_end);
    for pos in first..last {
        let from = pos - chunk.offset;
        let Some(byte) = chunk_buf.get((from / 8) as usize) else {
            continue;
        };
        if byte & (0x80 >> (from % 8)) == 0 {
            continue;
        }
        let from_right = field_end - 1 - pos;
        let idx = field_buf.len() - 1 - (from_right / 8) as usize;
        field_buf[idx] |= 1 << (from_right % 8);
    }
}

/// Build the qualifier for the part of `field` that falls inside `chunk`.
fn create_vendor_field(
    chunk: &UdfChunk,
    field: &MappedField,
) -> BcmdResult<Field> {
    let field_end = field.bit_offset + field.bit_width;
    if chunk.offset + chunk.size <= field.bit_offset || chunk.offset >= field_end
    {
        return Err(BcmdError::Invalid(format!(
            "udf chunk {chunk} is outside of field {}",
            field.field_type
        )));
    }
    let value = field.value.as_ref().ok_or_else(|| {
        BcmdError::Invalid(format!("field {} has no value", field.field_type))
    })?;
    let value = data_buffer(value);
    let mask = match &field.mask {
        Some(m) => data_buffer(m),
        None => full_mask(field.bit_width),
    };

    let slice = |buf: &[u8]| {
        offset_buffer(
            buf,
            field.bit_offset,
            field.bit_width,
            chunk.offset,
            chunk.size,
        )
    };
    Ok(Field {
        field_type: FieldType::Udf,
        value: Value::Bytes(slice(&value)),
        mask: Some(Value::Bytes(slice(&mask))),
        udf_chunk_id: Some(chunk.id),
    })
}

/// The bytes of a value in network order.
pub fn data_buffer(value: &MappedValue) -> Vec<u8> {
    match value {
        MappedValue::U32(v) => v.to_be_bytes().to_vec(),
        MappedValue::U64(v) => v.to_be_bytes().to_vec(),
        MappedValue::Bytes(b) => b.clone(),
    }
}

// A right-justified mask covering `width` bits.
fn full_mask(width: u32) -> Vec<u8> {
    let len = width.div_ceil(8) as usize;
    let mut mask = vec![0xffu8; len];
    let spare = (len as u32) * 8 - width;
    if let Some(first) = mask.first_mut() {
        *first >>= spare;
    }
    mask
}

/// Copy the bits of `input` that fall within an output window.
///
/// `input` holds a field `input_size` bits wide starting `input_offset` bits
/// into the header.  Its data is right-justified, with any leading bits
/// beyond the field width clear.  The output covers `output_size` bits
/// (rounded up to whole bytes) starting at `output_offset`.  Output bytes
/// that do not overlap the input are zero.
pub fn offset_buffer(
    input: &[u8],
    input_offset: u32,
    input_size: u32,
    output_offset: u32,
    output_size: u32,
) -> Vec<u8> {
    let right_end = (input_offset + input_size) as i64;
    let in_first = right_end - (input.len() as i64) * 8;
    let in_last = right_end - 1;
    let out_len = output_size.div_ceil(8) as usize;
    let out_first = output_offset as i64;
    let out_last = out_first + (out_len as i64) * 8 - 1;

    let mut output = vec![0u8; out_len];
    if in_first > out_last || in_last < out_first {
        return output;
    }

    for (idx, byte) in output.iter_mut().enumerate() {
        let out_bit = out_first + (idx as i64) * 8;
        if out_bit + 8 <= in_first || out_bit > in_last {
            continue;
        }
        let from_input = out_bit - in_first;
        if from_input < 0 {
            // Only the leading bits of the first input byte land here.
            *byte = input[0] >> (-from_input);
            continue;
        }
        let in_idx = (from_input / 8) as usize;
        let shift = (from_input % 8) as u32;
        *byte = input[in_idx] << shift;
        if shift > 0 {
            if let Some(next) = input.get(in_idx + 1) {
                *byte |= next >> (8 - shift);
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockP4TableMapper;
    use common::logging::LogFormat;
    use common::p4::{P4TableDef, PipelineStage};
    use mockall::predicate::eq;

    fn log() -> slog::Logger {
        common::logging::init("test", &None, LogFormat::Human).unwrap()
    }

    fn spec(chunk_bits: u32, chunks_per_set: u32, set_count: u32) -> UdfSpec {
        UdfSpec {
            chunk_bits,
            chunks_per_set,
            set_count,
        }
    }

    fn all_fields(_: &MappedField, _: AclStage) -> bool {
        true
    }

    fn arp_field(field_id: u32, bit_offset: u32, bit_width: u32) -> MappedField {
        MappedField {
            field_id,
            field_type: P4FieldType::ArpTpa,
            header_type: P4HeaderType::Arp,
            bit_offset,
            bit_width,
            value: None,
            mask: None,
        }
    }

    fn acl_table(id: u32, fields: &[u32]) -> AclTable {
        let def = P4TableDef {
            id,
            name: format!("acl_{id}"),
            match_fields: fields.to_vec(),
            size: 16,
            is_const: false,
            table_type: Default::default(),
            stage: PipelineStage::IngressAcl,
        };
        AclTable::new(&def, AclStage::Ifp, 1, BTreeMap::new())
    }

    fn offsets(chunks: &[UdfChunk]) -> Vec<u32> {
        chunks.iter().map(|c| c.bit_offset()).collect()
    }

    #[test]
    fn test_chunk_coverage() {
        let f = arp_field(1, 20, 10);
        assert_eq!(offsets(&mapped_field_to_udf_chunks(&f, 16)), vec![16]);

        let f = arp_field(1, 28, 32);
        assert_eq!(
            offsets(&mapped_field_to_udf_chunks(&f, 16)),
            vec![16, 32, 48]
        );

        // Ends exactly on a boundary: no extra chunk
        let f = arp_field(1, 32, 32);
        assert_eq!(offsets(&mapped_field_to_udf_chunks(&f, 16)), vec![32, 48]);

        for offset in 0..40 {
            for width in 1..40 {
                let f = arp_field(1, offset, width);
                let chunks = mapped_field_to_udf_chunks(&f, 8);
                let first = chunks.first().unwrap().bit_offset();
                let last = chunks.last().unwrap().bit_offset();
                assert!(first <= offset && offset < first + 8);
                assert!(last <= offset + width - 1);
                assert!(offset + width - 1 < last + 8);
                assert_eq!(chunks.len() as u32, (last - first) / 8 + 1);
            }
        }
    }

    #[test]
    fn test_unsupported_layer() {
        let mut f = arp_field(1, 0, 16);
        f.header_type = P4HeaderType::Vlan;
        assert!(mapped_field_to_udf_chunks(&f, 16).is_empty());
    }

    #[test]
    fn test_default_eligibility() {
        let f = arp_field(1, 0, 32);
        assert!(default_is_udf_eligible(&f, AclStage::Ifp));
        assert!(!default_is_udf_eligible(&f, AclStage::Unknown));
        let mut f = f;
        f.field_type = P4FieldType::EthDst;
        assert!(!default_is_udf_eligible(&f, AclStage::Ifp));
    }

    #[test]
    fn test_too_many_controller_sets() {
        assert!(UdfManager::new(&log(), 0, &spec(16, 8, 2), 3, None).is_err());
        let m = UdfManager::new(&log(), 0, &spec(16, 8, 2), 1, None).unwrap();
        assert_eq!(m.sets_by_usage(UdfSetUsage::Controller), vec![1]);
        assert_eq!(m.sets_by_usage(UdfSetUsage::Static), vec![2]);
    }

    #[test]
    fn test_add_chunks_rolls_back() {
        let mut set = UdfSet::new(UdfSetUsage::Static, 9, 2);
        let a = UdfChunk::new(PacketLayer::L3, 0, 16);
        let b = UdfChunk::new(PacketLayer::L3, 16, 16);
        let c = UdfChunk::new(PacketLayer::L4, 0, 16);
        assert!(set.add_chunks(&[a, a]));
        assert_eq!(set.len(), 1);
        assert!(!set.add_chunks(&[b, c]));
        assert_eq!(set.len(), 1);
        assert!(set.add_chunks(&[b]));
        assert_eq!(set.find(&a).unwrap().id(), 9);
        assert_eq!(set.find(&b).unwrap().id(), 10);
    }

    // One static set of four 16-bit chunks.  A field inside [16, 32) needs a
    // single chunk; a second field spanning five chunks does not fit.
    #[test]
    fn test_static_allocation_exhaustion() -> anyhow::Result<()> {
        let mut m = UdfManager::new(&log(), 0, &spec(16, 4, 1), 0, None)?;

        let mut small = UdfSet::new(UdfSetUsage::Static, 0, 4);
        assert!(small.add_chunks(&mapped_field_to_udf_chunks(
            &arp_field(1, 20, 10),
            16
        )));
        assert_eq!(m.allocate_udf_set(&small, &[1])?, 1);
        assert_eq!(m.udf_set(1).unwrap().len(), 1);

        let mut big = UdfSet::new(UdfSetUsage::Static, 0, 8);
        assert!(big.add_chunks(&mapped_field_to_udf_chunks(
            &arp_field(2, 64, 80),
            16
        )));
        assert_eq!(big.len(), 5);
        let err = m.allocate_udf_set(&big, &[1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(m.udf_set(1).unwrap().len(), 1);
        Ok(())
    }

    #[test]
    fn test_allocation_prefers_least_impact() -> anyhow::Result<()> {
        let mut m = UdfManager::new(&log(), 0, &spec(16, 4, 2), 0, None)?;
        let mut first = UdfSet::new(UdfSetUsage::Static, 0, 4);
        first.add_chunks(&mapped_field_to_udf_chunks(&arp_field(1, 0, 32), 16));
        m.allocate_udf_set(&first, &[1, 2])?;
        assert_eq!(m.udf_set(1).unwrap().len(), 2);

        // Shares a chunk with set 1, so set 1 grows by one while set 2 would
        // grow by two.
        let mut second = UdfSet::new(UdfSetUsage::Static, 0, 4);
        second
            .add_chunks(&mapped_field_to_udf_chunks(&arp_field(2, 16, 32), 16));
        assert_eq!(m.allocate_udf_set(&second, &[1, 2])?, 1);
        assert_eq!(m.udf_set(1).unwrap().len(), 3);
        assert!(m.udf_set(2).unwrap().is_empty());

        assert!(m.allocate_udf_set(&second, &[7]).is_err());
        Ok(())
    }

    #[test]
    fn test_set_up_and_install() -> anyhow::Result<()> {
        let mut mapper = MockP4TableMapper::new();
        mapper
            .expect_map_match_field()
            .with(eq(1), eq(1))
            .returning(|_, _| Ok(arp_field(1, 32, 32)));
        mapper.expect_map_match_field().with(eq(1), eq(2)).returning(|_, _| {
            let mut f = arp_field(2, 0, 16);
            f.field_type = P4FieldType::EthType;
            f.header_type = P4HeaderType::Ethernet;
            Ok(f)
        });
        mapper
            .expect_map_match_field()
            .with(eq(2), eq(1))
            .returning(|_, _| Ok(arp_field(1, 32, 32)));

        let mut tables = vec![acl_table(1, &[1, 2]), acl_table(2, &[1])];
        let mut m = UdfManager::new(&log(), 3, &spec(16, 8, 2), 1, None)?;
        m.set_up_static_udfs(&mut tables, &mapper)?;

        assert_eq!(tables[0].udf_set_id(), Some(2));
        assert!(tables[0].is_udf_field(1));
        assert!(!tables[0].is_udf_field(2));
        assert_eq!(tables[1].udf_set_id(), Some(2));
        // Set 2 follows the eight chunks of controller set 1
        assert_eq!(m.chunk_ids(2), BTreeSet::from([9, 10]));

        let mut asic = crate::test_support::MockAsic::new();
        asic.expect_set_acl_udf_chunks()
            .withf(|unit, config| {
                *unit == 3
                    && config.chunk_size == 2
                    && config.chunks
                        == vec![
                            aal::UdfChunk {
                                id: 9,
                                layer: PacketLayer::L3,
                                offset: 4,
                            },
                            aal::UdfChunk {
                                id: 10,
                                layer: PacketLayer::L3,
                                offset: 6,
                            },
                        ]
            })
            .times(1)
            .returning(|_, _| Ok(()));
        m.install_udfs(&asic)?;
        Ok(())
    }

    #[test]
    fn test_install_nothing() -> anyhow::Result<()> {
        let m = UdfManager::new(&log(), 0, &spec(16, 8, 2), 0, None)?;
        let asic = crate::test_support::MockAsic::new();
        m.install_udfs(&asic)?;
        Ok(())
    }

    #[test]
    fn test_static_set_too_large() -> anyhow::Result<()> {
        let mut mapper = MockP4TableMapper::new();
        mapper
            .expect_map_match_field()
            .returning(|_, id| Ok(arp_field(id, 0, 64)));
        let m = UdfManager::new(&log(), 0, &spec(16, 3, 1), 0, Some(all_fields))?;
        let err = m
            .static_udf_set_from_acl_table(&acl_table(1, &[1]), &mapper)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        Ok(())
    }

    #[test]
    fn test_offset_buffer() {
        let v = 0xf1234567u32.to_be_bytes();
        assert_eq!(offset_buffer(&v, 32, 32, 32, 16), vec![0xf1, 0x23]);
        assert_eq!(offset_buffer(&v, 32, 32, 48, 16), vec![0x45, 0x67]);
        assert_eq!(offset_buffer(&v, 32, 32, 64, 16), vec![0, 0]);

        // The same value shifted four bits toward the start of the header
        assert_eq!(offset_buffer(&v, 28, 32, 16, 16), vec![0x00, 0x0f]);
        assert_eq!(offset_buffer(&v, 28, 32, 32, 16), vec![0x12, 0x34]);
        assert_eq!(offset_buffer(&v, 28, 32, 48, 16), vec![0x56, 0x70]);
    }

    #[test]
    fn test_field_to_vendor_fields() -> anyhow::Result<()> {
        let mut mapper = MockP4TableMapper::new();
        mapper
            .expect_map_match_field()
            .returning(|_, _| Ok(arp_field(1, 28, 32)));
        let mut tables = vec![acl_table(1, &[1])];
        let mut m = UdfManager::new(&log(), 0, &spec(16, 3, 1), 0, None)?;
        m.set_up_static_udfs(&mut tables, &mapper)?;

        let mut f = arp_field(1, 28, 32);
        f.value = Some(MappedValue::U32(0xf1234567));
        f.mask = Some(MappedValue::U32(0xffffffff));
        let fields = m.mapped_field_to_vendor_fields(1, &f)?;
        let values: Vec<_> = fields
            .iter()
            .map(|f| (f.udf_chunk_id.unwrap(), f.value.clone()))
            .collect();
        pretty_assertions::assert_eq!(
            values,
            vec![
                (1, Value::Bytes(vec![0x00, 0x0f])),
                (2, Value::Bytes(vec![0x12, 0x34])),
                (3, Value::Bytes(vec![0x56, 0x70])),
            ]
        );
        assert!(fields.iter().all(|f| f.field_type == FieldType::Udf));
        assert_eq!(fields[2].mask, Some(Value::Bytes(vec![0xff, 0xf0])));

        let (value, mask) = m.vendor_fields_to_mapped_value(1, &f, &fields)?;
        assert_eq!(value, MappedValue::U32(0xf1234567));
        assert_eq!(mask, MappedValue::U32(0xffffffff));
        assert!(m
            .vendor_fields_to_mapped_value(1, &f, &fields[1..])
            .is_err());

        // Without a mask the whole field is matched
        f.mask = None;
        let fields = m.mapped_field_to_vendor_fields(1, &f)?;
        assert_eq!(fields[0].mask, Some(Value::Bytes(vec![0x00, 0x0f])));

        // A field reaching beyond the allocated chunks
        let wide = arp_field(1, 28, 64);
        let err = m.mapped_field_to_vendor_fields(1, &wide).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(m.mapped_field_to_vendor_fields(4, &f).is_err());
        Ok(())
    }
}
