use log::trace;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::io::BLOCK_SIZE;

/// Number of slots a single bitmap block can track.
pub const BITMAP_BITS: usize = BLOCK_SIZE * 8;

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bitmap {
    /// Stores 4096 bytes of bits mapping each bit to one allocatable slot, enough for
    /// 32,768 slots per bitmap block.
    bitmap: [u64; BLOCK_SIZE / 8],
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            bitmap: [0; BLOCK_SIZE / 8],
        }
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        Self::read_from(buf)
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn get(&self, slot: usize) -> State {
        assert!(slot < BITMAP_BITS);
        let word = self.bitmap[slot / 64];
        let mask = 0b01_u64 << (slot % 64);
        if word & mask == 0 {
            State::Free
        } else {
            State::Used
        }
    }

    pub fn set_reserved(&mut self, slot: usize) {
        assert!(slot < BITMAP_BITS);
        self.bitmap[slot / 64] |= 0b01_u64 << (slot % 64);
    }

    pub fn set_free(&mut self, slot: usize) {
        assert!(slot < BITMAP_BITS);
        self.bitmap[slot / 64] &= !(0b01_u64 << (slot % 64));
    }

    /// Number of slots currently marked used.
    pub fn count_used(&self) -> usize {
        self.bitmap.iter().map(|word| word.count_ones() as usize).sum()
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed pool of numbered slots handed out last-freed-first.
///
/// Free slots live on an explicit index stack and a bitmap records which slots are
/// in use, so nothing is ever threaded through the slots' own storage. A freshly
/// created list hands out 0, 1, 2, ... in order.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeList {
    stack: Vec<u32>,
    state: Bitmap,
    capacity: usize,
}

impl FreeList {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity <= BITMAP_BITS);
        Self {
            stack: (0..capacity as u32).rev().collect(),
            state: Bitmap::new(),
            capacity,
        }
    }

    /// Pops the head of the free list, or `None` once every slot is handed out.
    pub fn allocate(&mut self) -> Option<u32> {
        let slot = self.stack.pop()?;
        self.state.set_reserved(slot as usize);
        trace!("allocated slot {}, {} free", slot, self.stack.len());
        Some(slot)
    }

    /// Pushes `slot` back as the new head. Freeing a slot twice is not detected; the
    /// caller must only release what it owns.
    pub fn free(&mut self, slot: u32) {
        self.state.set_free(slot as usize);
        self.stack.push(slot);
        trace!("released slot {}, {} free", slot, self.stack.len());
    }

    pub fn is_used(&self, slot: u32) -> bool {
        (slot as usize) < self.capacity && self.state.get(slot as usize) == State::Used
    }

    pub fn free_count(&self) -> usize {
        self.stack.len()
    }

    pub fn used_count(&self) -> usize {
        self.state.count_used()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes `encode` produces for a list of `capacity` slots.
    pub const fn encoded_len(capacity: usize) -> usize {
        4 + 4 * capacity + BLOCK_SIZE
    }

    /// Appends `[stack length][stack, zero padded to capacity][usage bitmap]`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.stack.len() as u32).to_ne_bytes());
        for slot in &self.stack {
            out.extend_from_slice(&slot.to_ne_bytes());
        }
        out.resize(out.len() + 4 * (self.capacity - self.stack.len()), 0);
        out.extend_from_slice(self.state.serialize());
    }

    /// Reads back what `encode` wrote. Returns `None` when the buffer is short or the
    /// recorded stack does not fit the capacity.
    pub fn decode(buf: &[u8], capacity: usize) -> Option<Self> {
        if buf.len() != Self::encoded_len(capacity) {
            return None;
        }
        let len = u32::from_ne_bytes(buf[0..4].try_into().ok()?) as usize;
        if len > capacity {
            return None;
        }
        let stack = buf[4..4 + 4 * len]
            .chunks_exact(4)
            .map(|raw| u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect::<Vec<_>>();
        if stack.iter().any(|&slot| slot as usize >= capacity) {
            return None;
        }
        let state = Bitmap::parse(&buf[4 + 4 * capacity..])?;
        Some(Self {
            stack,
            state,
            capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(2);

        assert_eq!(bmp.get(0), State::Free);
        assert_eq!(bmp.get(2), State::Used);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(0);
        bmp.set_reserved(BITMAP_BITS - 1);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(BITMAP_BITS - 1), State::Used);
        assert_eq!(bmp.count_used(), 2);
    }

    #[test]
    fn freeing_one_slot_leaves_its_neighbours_alone() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(10);
        bmp.set_reserved(11);
        bmp.set_free(10);

        assert_eq!(bmp.get(10), State::Free);
        assert_eq!(bmp.get(11), State::Used);
    }

    #[test]
    fn can_serialize_and_deserialize_state() {
        let mut bmp = Bitmap::new();
        bmp.set_reserved(10);
        bmp.set_reserved(11);
        bmp.set_reserved(12);

        let read_bmp = Bitmap::parse(bmp.serialize()).unwrap();
        assert_eq!(read_bmp, bmp);
    }

    #[test]
    fn free_list_hands_out_slots_in_order_then_lifo() {
        let mut list = FreeList::new(4);
        assert_eq!(list.allocate(), Some(0));
        assert_eq!(list.allocate(), Some(1));
        assert_eq!(list.allocate(), Some(2));

        list.free(1);
        list.free(0);
        assert_eq!(list.allocate(), Some(0));
        assert_eq!(list.allocate(), Some(1));
        assert_eq!(list.allocate(), Some(3));
        assert_eq!(list.allocate(), None);
    }

    #[test]
    fn free_and_used_slots_always_add_up_to_capacity() {
        let mut list = FreeList::new(64);
        let mut held = Vec::new();

        // A deterministic mix of allocations and releases.
        for step in 0..500_u32 {
            if step % 3 == 2 && !held.is_empty() {
                let slot = held.remove((step as usize * 7) % held.len());
                list.free(slot);
            } else if let Some(slot) = list.allocate() {
                held.push(slot);
            }
            assert_eq!(list.free_count() + list.used_count(), list.capacity());
            assert_eq!(list.used_count(), held.len());
        }
    }

    #[test]
    fn exhausted_list_stays_exhausted() {
        let mut list = FreeList::new(2);
        list.allocate();
        list.allocate();
        assert_eq!(list.allocate(), None);
        assert_eq!(list.free_count(), 0);
        assert!(list.is_used(0) && list.is_used(1));
    }

    #[test]
    fn encoded_list_reads_back_identically() {
        let mut list = FreeList::new(16);
        for _ in 0..5 {
            list.allocate();
        }
        list.free(3);

        let mut buf = Vec::new();
        list.encode(&mut buf);
        assert_eq!(buf.len(), FreeList::encoded_len(16));

        let decoded = FreeList::decode(&buf, 16).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn decoding_a_stack_longer_than_capacity_fails() {
        let mut buf = Vec::new();
        FreeList::new(4).encode(&mut buf);
        buf[0..4].copy_from_slice(&9_u32.to_ne_bytes());
        assert!(FreeList::decode(&buf, 4).is_none());
    }
}
