use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::common::{DbError, PageId, RecordId, Result, SlotId, TransactionId};
use crate::tuple::{Schema, Tuple};

/// Heap page layout:
///
/// +------------------+
/// | Header bitmap    |  ceil(slot_count / 8) bytes, bit i = slot i used
/// +------------------+
/// | Slot 0           |  tuple_size bytes each,
/// | Slot 1           |  zero-filled when empty
/// | ...              |
/// +------------------+
/// | Zero padding     |  up to page_size
/// +------------------+
///
/// Byte i of the header covers slots 8i..8i+7; bit k (least significant
/// first) is slot 8i+k. Every slot costs tuple_size bytes plus one header
/// bit, which gives slot_count = floor(page_size * 8 / (tuple_size * 8 + 1)).
#[derive(Debug)]
pub struct HeapPage {
    page_id: PageId,
    schema: Arc<Schema>,
    page_size: usize,
    header: Vec<u8>,
    slots: Vec<Option<Tuple>>,
    /// Transaction that last dirtied this page, None when clean
    dirtied_by: Option<TransactionId>,
    /// On-disk bytes as of the last load or commit
    before_image: Bytes,
}

/// Largest slot count a page may have; slot ids are 16 bits wide.
pub const MAX_SLOTS_PER_PAGE: usize = u16::MAX as usize + 1;

/// Number of tuple slots a page of `page_size` bytes holds.
pub fn slot_count(page_size: usize, tuple_size: usize) -> usize {
    (page_size * 8) / (tuple_size * 8 + 1)
}

/// Number of header bytes needed for `slots` slots.
pub fn header_size(slots: usize) -> usize {
    slots.div_ceil(8)
}

impl HeapPage {
    /// Decodes a page from exactly `page_size` bytes read from disk.
    /// The bytes also become the page's before-image.
    ///
    /// Fails with [`DbError::InvalidConfig`] if the page would have more
    /// slots than a [`SlotId`] can address.
    pub fn new(page_id: PageId, schema: Arc<Schema>, data: &[u8]) -> Result<Self> {
        let page_size = data.len();
        let tuple_size = schema.tuple_size();
        let num_slots = slot_count(page_size, tuple_size);
        if num_slots > MAX_SLOTS_PER_PAGE {
            return Err(DbError::InvalidConfig(format!(
                "{} slots in a {}-byte page exceed the slot id range",
                num_slots, page_size
            )));
        }
        let header_len = header_size(num_slots);

        let header = data[..header_len].to_vec();
        let mut slots = Vec::with_capacity(num_slots);

        for slot in 0..num_slots {
            if !bit_is_set(&header, slot) {
                slots.push(None);
                continue;
            }

            let start = header_len + slot * tuple_size;
            let mut tuple = Tuple::from_bytes(
                Arc::clone(&schema),
                &data[start..start + tuple_size],
            )
            .map_err(|_| DbError::CorruptOrMissingPage(page_id))?;
            tuple.set_record_id(Some(RecordId::new(page_id, SlotId::new(slot as u16))));
            slots.push(Some(tuple));
        }

        Ok(Self {
            page_id,
            schema,
            page_size,
            header,
            slots,
            dirtied_by: None,
            before_image: Bytes::copy_from_slice(data),
        })
    }

    /// Returns the bytes of a page with no used slots.
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the number of tuple slots on this page.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of empty slots on this page.
    pub fn empty_slot_count(&self) -> usize {
        (0..self.slots.len())
            .filter(|&slot| !self.is_slot_used(slot))
            .count()
    }

    /// Returns true if the given slot holds a tuple.
    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.slots.len() && bit_is_set(&self.header, slot)
    }

    /// Returns the tuple stored in the given slot.
    pub fn tuple(&self, slot: SlotId) -> Option<&Tuple> {
        self.slots.get(slot.as_usize()).and_then(Option::as_ref)
    }

    /// Returns the stored tuples in slot order, skipping empty slots.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.slots.iter().flatten()
    }

    /// Places the tuple in the lowest-numbered empty slot and returns its record ID.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> Result<RecordId> {
        if !Arc::ptr_eq(tuple.schema(), &self.schema) && **tuple.schema() != *self.schema {
            return Err(DbError::SchemaMismatch(self.page_id));
        }

        let slot = (0..self.slots.len())
            .find(|&slot| !self.is_slot_used(slot))
            .ok_or(DbError::PageFull(self.page_id))?;

        let record_id = RecordId::new(self.page_id, SlotId::new(slot as u16));
        tuple.set_record_id(Some(record_id));
        self.slots[slot] = Some(tuple);
        self.mark_slot_used(slot, true);

        Ok(record_id)
    }

    /// Removes the tuple from the slot named by its record ID.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let record_id = tuple.record_id();
        let rid = record_id.ok_or_else(|| DbError::invalid_delete(None, "tuple has no record id"))?;

        if rid.page_id != self.page_id {
            return Err(DbError::invalid_delete(record_id, "tuple is on another page"));
        }
        let slot = rid.slot_id.as_usize();
        if slot >= self.slots.len() {
            return Err(DbError::invalid_delete(record_id, "slot out of range"));
        }
        if !self.is_slot_used(slot) {
            return Err(DbError::invalid_delete(record_id, "slot is empty"));
        }
        if self.slots[slot].as_ref() != Some(tuple) {
            return Err(DbError::invalid_delete(record_id, "stored tuple differs"));
        }

        self.slots[slot] = None;
        self.mark_slot_used(slot, false);
        Ok(())
    }

    /// Marks the page dirty on behalf of `tid`, or clean when `tid` is None.
    pub fn set_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtied_by = tid;
    }

    /// Returns the transaction that last dirtied this page, or None if clean.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    /// Returns the page as it was at its last load from disk or commit.
    pub fn before_image(&self) -> Result<HeapPage> {
        HeapPage::new(self.page_id, Arc::clone(&self.schema), &self.before_image)
    }

    /// Captures the current contents as the new before-image.
    pub fn set_before_image(&mut self) -> Result<()> {
        self.before_image = self.serialize()?;
        Ok(())
    }

    /// Encodes the page into exactly `page_size` bytes.
    pub fn serialize(&self) -> Result<Bytes> {
        let tuple_size = self.schema.tuple_size();
        let mut buf = BytesMut::with_capacity(self.page_size);

        buf.put_slice(&self.header);
        for slot in &self.slots {
            match slot {
                Some(tuple) => tuple.serialize_into(&mut buf)?,
                None => buf.put_bytes(0, tuple_size),
            }
        }
        let padding = self.page_size - buf.len();
        buf.put_bytes(0, padding);

        Ok(buf.freeze())
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        let mask = 1u8 << (slot % 8);
        if used {
            self.header[slot / 8] |= mask;
        } else {
            self.header[slot / 8] &= !mask;
        }
    }
}

fn bit_is_set(header: &[u8], slot: usize) -> bool {
    (header[slot / 8] >> (slot % 8)) & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TableId;
    use crate::tuple::{DataType, TupleBuilder};

    fn five_int_schema() -> Arc<Schema> {
        let mut builder = Schema::builder();
        for i in 0..5 {
            builder = builder.column(format!("f{}", i), DataType::Integer);
        }
        builder.build_arc()
    }

    fn tuple(schema: &Arc<Schema>, v: i32) -> Tuple {
        let mut builder = TupleBuilder::new(Arc::clone(schema));
        for i in 0..schema.column_count() {
            builder = builder.value(v + i as i32);
        }
        builder.build().unwrap()
    }

    fn empty_page(schema: &Arc<Schema>) -> HeapPage {
        let pid = PageId::new(TableId::new(1), 0);
        HeapPage::new(pid, Arc::clone(schema), &HeapPage::empty_page_data(4096)).unwrap()
    }

    #[test]
    fn test_slot_math() {
        assert_eq!(slot_count(4096, 20), 25);
        assert_eq!(header_size(25), 4);
        assert_eq!(header_size(8), 1);
        assert_eq!(header_size(0), 0);
    }

    #[test]
    fn test_empty_page() {
        let schema = five_int_schema();
        let page = empty_page(&schema);

        assert_eq!(page.slot_count(), 25);
        assert_eq!(page.empty_slot_count(), 25);
        assert_eq!(page.tuples().count(), 0);
        assert_eq!(page.is_dirty(), None);
    }

    #[test]
    fn test_insert_fills_lowest_slot() {
        let schema = five_int_schema();
        let mut page = empty_page(&schema);

        let r0 = page.insert_tuple(tuple(&schema, 0)).unwrap();
        let r1 = page.insert_tuple(tuple(&schema, 10)).unwrap();
        assert_eq!(r0.slot_id, SlotId::new(0));
        assert_eq!(r1.slot_id, SlotId::new(1));

        let stored = page.tuple(SlotId::new(0)).unwrap().clone();
        page.delete_tuple(&stored).unwrap();
        assert!(!page.is_slot_used(0));

        let r2 = page.insert_tuple(tuple(&schema, 20)).unwrap();
        assert_eq!(r2.slot_id, SlotId::new(0));
        assert_eq!(page.empty_slot_count(), 23);
    }

    #[test]
    fn test_header_bit_layout() {
        let schema = five_int_schema();
        let mut page = empty_page(&schema);
        for i in 0..10 {
            page.insert_tuple(tuple(&schema, i)).unwrap();
        }

        let bytes = page.serialize().unwrap();
        assert_eq!(bytes.len(), 4096);
        assert_eq!(bytes[0], 0xFF);
        assert_eq!(bytes[1], 0b0000_0011);
        assert_eq!(bytes[2], 0);
        // first field of slot 0 starts right after the 4 header bytes
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_schema_mismatch() {
        let schema = five_int_schema();
        let mut page = empty_page(&schema);
        let other = Schema::builder().column("x", DataType::BigInt).build_arc();
        let t = TupleBuilder::new(other).value(1i64).build().unwrap();

        assert!(matches!(page.insert_tuple(t), Err(DbError::SchemaMismatch(_))));
    }

    #[test]
    fn test_invalid_deletes() {
        let schema = five_int_schema();
        let mut page = empty_page(&schema);

        // never placed
        assert!(matches!(
            page.delete_tuple(&tuple(&schema, 1)),
            Err(DbError::InvalidDelete { .. })
        ));

        page.insert_tuple(tuple(&schema, 1)).unwrap();
        let stored = page.tuple(SlotId::new(0)).unwrap().clone();

        // same slot, different contents
        let mut imposter = tuple(&schema, 99);
        imposter.set_record_id(stored.record_id());
        assert!(page.delete_tuple(&imposter).is_err());

        // slot out of range
        let mut far = stored.clone();
        far.set_record_id(Some(RecordId::new(page.page_id(), SlotId::new(500))));
        assert!(page.delete_tuple(&far).is_err());

        page.delete_tuple(&stored).unwrap();
        // already empty
        assert!(page.delete_tuple(&stored).is_err());
    }

    #[test]
    fn test_before_image_is_unchanged_by_mutation() {
        let schema = five_int_schema();
        let mut page = empty_page(&schema);
        page.insert_tuple(tuple(&schema, 5)).unwrap();

        let before = page.before_image().unwrap();
        assert_eq!(before.empty_slot_count(), 25);

        page.set_before_image().unwrap();
        let before = page.before_image().unwrap();
        assert_eq!(before.empty_slot_count(), 24);
        assert_eq!(before.tuple(SlotId::new(0)), page.tuple(SlotId::new(0)));
    }

    #[test]
    fn test_too_many_slots_rejected() {
        let schema = Schema::builder().column("b", DataType::Boolean).build_arc();
        let pid = PageId::new(TableId::new(1), 0);

        // 80000 * 8 / 9 = 71111 one-byte slots
        assert!(matches!(
            HeapPage::new(pid, Arc::clone(&schema), &HeapPage::empty_page_data(80_000)),
            Err(DbError::InvalidConfig(_))
        ));

        // 73727 * 8 / 9 = 65535 slots still fit
        let page = HeapPage::new(pid, schema, &HeapPage::empty_page_data(73_727)).unwrap();
        assert_eq!(page.slot_count(), 65_535);
    }

    #[test]
    fn test_dirty_marker() {
        let schema = five_int_schema();
        let mut page = empty_page(&schema);
        page.set_dirty(Some(TransactionId::new(3)));
        assert_eq!(page.is_dirty(), Some(TransactionId::new(3)));
        page.set_dirty(None);
        assert_eq!(page.is_dirty(), None);
    }
}
