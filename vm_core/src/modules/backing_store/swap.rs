/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::sync::{Arc, Mutex};

use log::{debug, trace};

use super::{BackingNode, BackingStore, StoreError};
use crate::{
    util::{bit_array::BitArray, lock},
    VMError, PAGE_SIZE,
};

/// Swap area on top of a backing store, divided into page sized slots
pub struct SwapSpace {
    store: BackingNode,

    /// One bit per slot, set if the slot is in use
    slots: Mutex<BitArray>,
}

impl SwapSpace {
    pub fn new(store: BackingNode, slot_count: usize) -> Arc<Self> {
        debug!("Created swap space with {} slots", slot_count);

        Arc::new(Self {
            store,
            slots: Mutex::new(BitArray::new(slot_count)),
        })
    }

    pub fn slot_count(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn used_slots(&self) -> usize {
        lock(&self.slots).count_set()
    }

    /// Hands out a free slot, which is released again once the returned handle is dropped
    pub fn allocate_slot(self: &Arc<Self>) -> Result<Arc<SwapSlot>, VMError> {
        let mut slots = lock(&self.slots);
        let index = slots.first_unset().ok_or(VMError::SwapExhausted)?;
        slots.set(true, index);

        trace!("Allocated swap slot {}", index);
        Ok(Arc::new(SwapSlot {
            space: self.clone(),
            index,
        }))
    }

    fn release_slot(&self, index: usize) {
        let mut slots = lock(&self.slots);
        debug_assert!(slots.is_set(index), "swap slot {} is not in use", index);
        slots.set(false, index);

        trace!("Released swap slot {}", index);
    }
}

/// One page sized slot of a [`SwapSpace`], usable as backing node of a page
pub struct SwapSlot {
    space: Arc<SwapSpace>,
    index: usize,
}

impl SwapSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    fn store_offset(&self, offset: u64, len: usize) -> Result<u64, StoreError> {
        if offset as usize + len > PAGE_SIZE {
            return Err(StoreError::OutOfBounds { offset, len });
        }

        Ok((self.index * PAGE_SIZE) as u64 + offset)
    }
}

impl BackingStore for SwapSlot {
    fn read_range(&self, offset: u64, dest: &mut [u8]) -> Result<usize, StoreError> {
        let store_offset = self.store_offset(offset, dest.len())?;
        self.space.store.read_range(store_offset, dest)
    }

    fn write_range(&self, offset: u64, src: &[u8]) -> Result<(), StoreError> {
        let store_offset = self.store_offset(offset, src.len())?;
        self.space.store.write_range(store_offset, src)
    }
}

impl Drop for SwapSlot {
    fn drop(&mut self) {
        self.space.release_slot(self.index);
    }
}
