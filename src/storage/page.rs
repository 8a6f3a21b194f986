//! # Slotted Page Format
//!
//! Every 4096-byte page stores variable-length records behind a slot
//! directory. The directory grows forward from just after the header;
//! record bytes grow backward from the end of the page. A record is
//! addressed by its [`SlotId`](crate::storage::SlotId), which stays
//! stable across in-place updates, relocating updates, and tombstoning.
//!
//! ## Serialized Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------------------------
//! 0       4     page_id
//! 4       4     next_page (chain link, INVALID_PAGE_ID at end)
//! 8       2     num_slots
//! 10      2     free_space_offset (directory front, fixed at 20)
//! 12      2     free_space_end    (record heap front)
//! 14      2     reserved
//! 16      4     checksum
//! 20      5*n   slot entries: offset u16, length u16, deleted u8
//! ...           free space
//! fse     ...   record heap, last-inserted record lowest
//! 4096
//! ```
//!
//! The checksum is the shift-xor fold of `storage::checksum32` applied
//! over the whole serialized page minus the 4-byte checksum field itself
//! (bytes `[0,16)` then `[20,4096)`).
//!
//! ## Space Accounting
//!
//! ```text
//! free_space = free_space_end - free_space_offset - 5 * num_slots
//! ```
//!
//! Deleting a record only tombstones its slot; the bytes are reclaimed
//! when the slot is reused (insert picks the lowest tombstoned slot) but
//! the heap space itself is not compacted. An update that grows past the
//! record's current length tombstones and re-inserts, then swaps the two
//! directory entries so the caller's SlotId still names the new bytes.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{PAGE_HEADER_SIZE, PAGE_SIZE, SLOT_ENTRY_SIZE};
use crate::error::{Error, Result};
use crate::storage::{fold_checksum, PageId, SlotId, INVALID_PAGE_ID};

const CHECKSUM_OFFSET: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct PageHeader {
    page_id: u32,
    next_page: u32,
    num_slots: u16,
    free_space_offset: u16,
    free_space_end: u16,
    reserved: u16,
    checksum: u32,
}

impl PageHeader {
    fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            next_page: INVALID_PAGE_ID,
            num_slots: 0,
            free_space_offset: PAGE_HEADER_SIZE as u16,
            free_space_end: PAGE_SIZE as u16,
            reserved: 0,
            checksum: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotEntry {
    offset: u16,
    length: u16,
    deleted: bool,
}

/// In-memory page: parsed header, slot directory, and the raw data
/// region. Owned by exactly one buffer-pool frame at a time.
pub struct Page {
    header: PageHeader,
    slots: Vec<SlotEntry>,
    data: [u8; PAGE_SIZE],
    dirty: bool,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            header: PageHeader::new(page_id),
            slots: Vec::new(),
            data: [0; PAGE_SIZE],
            dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.header.page_id
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.header.page_id = page_id;
    }

    pub fn next_page(&self) -> PageId {
        self.header.next_page
    }

    pub fn set_next_page(&mut self, next: PageId) {
        self.header.next_page = next;
        self.dirty = true;
    }

    pub fn num_slots(&self) -> u16 {
        self.slots.len() as u16
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Bytes available for one more record plus its directory entry.
    pub fn free_space(&self) -> usize {
        let directory = self.slots.len() * SLOT_ENTRY_SIZE;
        (self.header.free_space_end as usize)
            .saturating_sub(self.header.free_space_offset as usize)
            .saturating_sub(directory)
    }

    /// Place a record, reusing the lowest tombstoned slot if one exists.
    pub fn insert_record(&mut self, record: &[u8]) -> Result<SlotId> {
        let needed = record.len() + SLOT_ENTRY_SIZE;
        if self.free_space() < needed {
            return Err(Error::PageFull {
                page_id: self.header.page_id,
                needed,
                free: self.free_space(),
            });
        }

        let reuse = self.slots.iter().position(|slot| slot.deleted);

        self.header.free_space_end -= record.len() as u16;
        let offset = self.header.free_space_end;
        self.data[offset as usize..offset as usize + record.len()].copy_from_slice(record);

        let entry = SlotEntry {
            offset,
            length: record.len() as u16,
            deleted: false,
        };

        let slot_id = match reuse {
            Some(idx) => {
                self.slots[idx] = entry;
                idx as SlotId
            }
            None => {
                self.slots.push(entry);
                (self.slots.len() - 1) as SlotId
            }
        };

        self.header.num_slots = self.slots.len() as u16;
        self.dirty = true;
        Ok(slot_id)
    }

    /// Tombstone a slot. The record bytes are not reclaimed until the
    /// slot is reused.
    pub fn delete_record(&mut self, slot_id: SlotId) -> Result<()> {
        self.live_slot(slot_id)?;
        self.slots[slot_id as usize].deleted = true;
        self.dirty = true;
        Ok(())
    }

    pub fn get_record(&self, slot_id: SlotId) -> Result<&[u8]> {
        let slot = self.live_slot(slot_id)?;
        let start = slot.offset as usize;
        Ok(&self.data[start..start + slot.length as usize])
    }

    /// Overwrite a record in place when the new bytes fit; otherwise
    /// tombstone, re-insert, and swap directory entries so `slot_id`
    /// still names the record.
    pub fn update_record(&mut self, slot_id: SlotId, record: &[u8]) -> Result<()> {
        let slot = *self.live_slot(slot_id)?;

        if record.len() <= slot.length as usize {
            let start = slot.offset as usize;
            self.data[start..start + record.len()].copy_from_slice(record);
            self.slots[slot_id as usize].length = record.len() as u16;
            self.dirty = true;
            return Ok(());
        }

        self.slots[slot_id as usize].deleted = true;
        let new_slot = match self.insert_record(record) {
            Ok(new_slot) => new_slot,
            Err(err) => {
                self.slots[slot_id as usize].deleted = false;
                return Err(err);
            }
        };

        self.slots.swap(slot_id as usize, new_slot as usize);
        self.dirty = true;
        Ok(())
    }

    /// Recovery hook: force a record image into a specific slot,
    /// extending the directory with tombstones if the slot does not
    /// exist yet. Any previous bytes at that slot are abandoned.
    pub fn put_record_at(&mut self, slot_id: SlotId, record: &[u8]) -> Result<()> {
        while self.slots.len() <= slot_id as usize {
            self.slots.push(SlotEntry {
                offset: 0,
                length: 0,
                deleted: true,
            });
        }

        if self.free_space() < record.len() {
            return Err(Error::PageFull {
                page_id: self.header.page_id,
                needed: record.len(),
                free: self.free_space(),
            });
        }

        self.header.free_space_end -= record.len() as u16;
        let offset = self.header.free_space_end;
        self.data[offset as usize..offset as usize + record.len()].copy_from_slice(record);

        self.slots[slot_id as usize] = SlotEntry {
            offset,
            length: record.len() as u16,
            deleted: false,
        };
        self.header.num_slots = self.slots.len() as u16;
        self.dirty = true;
        Ok(())
    }

    /// Recovery hook: tombstone a slot without the liveness check.
    pub fn remove_record_at(&mut self, slot_id: SlotId) {
        if let Some(slot) = self.slots.get_mut(slot_id as usize) {
            slot.deleted = true;
            self.dirty = true;
        }
    }

    fn live_slot(&self, slot_id: SlotId) -> Result<&SlotEntry> {
        match self.slots.get(slot_id as usize) {
            Some(slot) if !slot.deleted => Ok(slot),
            _ => Err(Error::SlotAbsent(self.header.page_id, slot_id)),
        }
    }

    /// Write the page image: header and slot entries to the front, the
    /// record heap at its own tail offset, checksum last.
    pub fn serialize(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        buf.fill(0);

        let mut header = self.header;
        header.num_slots = self.slots.len() as u16;
        header.checksum = 0;
        buf[..PAGE_HEADER_SIZE].copy_from_slice(header.as_bytes());

        let mut offset = PAGE_HEADER_SIZE;
        for slot in &self.slots {
            buf[offset..offset + 2].copy_from_slice(&slot.offset.to_le_bytes());
            buf[offset + 2..offset + 4].copy_from_slice(&slot.length.to_le_bytes());
            buf[offset + 4] = u8::from(slot.deleted);
            offset += SLOT_ENTRY_SIZE;
        }

        let heap = self.header.free_space_end as usize;
        if heap < PAGE_SIZE {
            buf[heap..].copy_from_slice(&self.data[heap..]);
        }

        let checksum = fold_checksum(
            fold_checksum(0, &buf[..CHECKSUM_OFFSET]),
            &buf[CHECKSUM_OFFSET + 4..],
        );
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Parse a page image. The checksum is not re-verified here; callers
    /// that read from disk use [`Page::verify_checksum`] first.
    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);

        let header = PageHeader::read_from_bytes(&buf[..PAGE_HEADER_SIZE])
            .map_err(|_| Error::CorruptPage(0, "header unreadable".into()))?;

        let num_slots = header.num_slots as usize;
        let directory_end = PAGE_HEADER_SIZE + num_slots * SLOT_ENTRY_SIZE;
        if directory_end > header.free_space_end as usize
            || header.free_space_end as usize > PAGE_SIZE
        {
            return Err(Error::CorruptPage(
                header.page_id,
                format!(
                    "slot directory ({} entries) overlaps record heap at {}",
                    num_slots, header.free_space_end
                ),
            ));
        }

        let mut slots = Vec::with_capacity(num_slots);
        let mut offset = PAGE_HEADER_SIZE;
        for _ in 0..num_slots {
            let slot_offset = u16::from_le_bytes([buf[offset], buf[offset + 1]]);
            let length = u16::from_le_bytes([buf[offset + 2], buf[offset + 3]]);
            let deleted = buf[offset + 4] != 0;
            if !deleted && (slot_offset as usize + length as usize > PAGE_SIZE) {
                return Err(Error::CorruptPage(
                    header.page_id,
                    format!("slot at {} length {} exceeds page", slot_offset, length),
                ));
            }
            slots.push(SlotEntry {
                offset: slot_offset,
                length,
                deleted,
            });
            offset += SLOT_ENTRY_SIZE;
        }

        let mut data = [0u8; PAGE_SIZE];
        let heap = header.free_space_end as usize;
        if heap < PAGE_SIZE {
            data[heap..].copy_from_slice(&buf[heap..]);
        }

        Ok(Self {
            header,
            slots,
            data,
            dirty: false,
        })
    }

    /// Validate the stored checksum of a serialized page image.
    pub fn verify_checksum(page_id: PageId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let stored = u32::from_le_bytes([
            buf[CHECKSUM_OFFSET],
            buf[CHECKSUM_OFFSET + 1],
            buf[CHECKSUM_OFFSET + 2],
            buf[CHECKSUM_OFFSET + 3],
        ]);
        let computed = fold_checksum(
            fold_checksum(0, &buf[..CHECKSUM_OFFSET]),
            &buf[CHECKSUM_OFFSET + 4..],
        );
        if stored != computed {
            return Err(Error::ChecksumMismatch {
                page_id,
                stored,
                computed,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.header.page_id)
            .field("next_page", &self.header.next_page)
            .field("num_slots", &self.slots.len())
            .field("free_space", &self.free_space())
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_20_bytes() {
        assert_eq!(size_of::<PageHeader>(), PAGE_HEADER_SIZE);
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut page = Page::new(1);
        let slot = page.insert_record(b"hello").unwrap();
        assert_eq!(page.get_record(slot).unwrap(), b"hello");
        assert!(page.is_dirty());
    }

    #[test]
    fn distinct_records_keep_their_bytes() {
        let mut page = Page::new(1);
        let a = page.insert_record(b"alpha").unwrap();
        let b = page.insert_record(b"bravo-longer").unwrap();
        let c = page.insert_record(b"c").unwrap();
        assert_eq!(page.get_record(a).unwrap(), b"alpha");
        assert_eq!(page.get_record(b).unwrap(), b"bravo-longer");
        assert_eq!(page.get_record(c).unwrap(), b"c");
    }

    #[test]
    fn delete_tombstones_and_get_fails() {
        let mut page = Page::new(3);
        let slot = page.insert_record(b"gone").unwrap();
        page.delete_record(slot).unwrap();
        assert!(matches!(
            page.get_record(slot),
            Err(Error::SlotAbsent(3, s)) if s == slot
        ));
        assert!(matches!(
            page.delete_record(slot),
            Err(Error::SlotAbsent(3, _))
        ));
    }

    #[test]
    fn insert_reuses_lowest_tombstoned_slot() {
        let mut page = Page::new(1);
        let a = page.insert_record(b"a").unwrap();
        let _b = page.insert_record(b"b").unwrap();
        let c = page.insert_record(b"c").unwrap();
        page.delete_record(a).unwrap();
        page.delete_record(c).unwrap();

        let reused = page.insert_record(b"r").unwrap();
        assert_eq!(reused, a);
        assert_eq!(page.get_record(reused).unwrap(), b"r");
    }

    #[test]
    fn update_in_place_when_smaller() {
        let mut page = Page::new(1);
        let slot = page.insert_record(b"longest").unwrap();
        let free_before = page.free_space();
        page.update_record(slot, b"tiny").unwrap();
        assert_eq!(page.get_record(slot).unwrap(), b"tiny");
        assert_eq!(page.free_space(), free_before);
    }

    #[test]
    fn update_grows_and_slot_id_survives() {
        let mut page = Page::new(1);
        let slot = page.insert_record(b"ab").unwrap();
        let other = page.insert_record(b"other").unwrap();
        page.update_record(slot, b"a much longer record").unwrap();
        assert_eq!(page.get_record(slot).unwrap(), b"a much longer record");
        assert_eq!(page.get_record(other).unwrap(), b"other");
    }

    #[test]
    fn insert_fails_when_full() {
        let mut page = Page::new(1);
        let big = vec![0x42u8; page.free_space() - SLOT_ENTRY_SIZE];
        page.insert_record(&big).unwrap();
        assert!(matches!(
            page.insert_record(b"x"),
            Err(Error::PageFull { page_id: 1, .. })
        ));
    }

    #[test]
    fn serialize_deserialize_round_trips() {
        let mut page = Page::new(42);
        page.set_next_page(43);
        let a = page.insert_record(b"first").unwrap();
        let b = page.insert_record(b"second record").unwrap();
        page.delete_record(a).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        page.serialize(&mut buf);
        Page::verify_checksum(42, &buf).unwrap();

        let restored = Page::deserialize(&buf).unwrap();
        assert_eq!(restored.page_id(), 42);
        assert_eq!(restored.next_page(), 43);
        assert_eq!(restored.num_slots(), 2);
        assert_eq!(restored.get_record(b).unwrap(), b"second record");
        assert!(restored.get_record(a).is_err());
    }

    #[test]
    fn checksum_mismatch_detected_after_corruption() {
        let mut page = Page::new(7);
        page.insert_record(b"payload").unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        page.serialize(&mut buf);

        buf[PAGE_SIZE - 1] ^= 0xFF;
        assert!(matches!(
            Page::verify_checksum(7, &buf),
            Err(Error::ChecksumMismatch { page_id: 7, .. })
        ));
    }

    #[test]
    fn put_record_at_extends_directory_for_recovery() {
        let mut page = Page::new(9);
        page.put_record_at(3, b"redo image").unwrap();
        assert_eq!(page.num_slots(), 4);
        assert_eq!(page.get_record(3).unwrap(), b"redo image");
        assert!(page.get_record(0).is_err());

        page.remove_record_at(3);
        assert!(page.get_record(3).is_err());
    }
}
