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

use std::sync::Mutex;

use super::{BackingStore, StoreError};
use crate::util::lock;

/// Backing store that keeps its content in RAM, e.g. a ram disk
#[derive(Default)]
pub struct MemoryBackingStore {
    data: Mutex<Vec<u8>>,
}

impl MemoryBackingStore {
    pub fn new(size: usize) -> Self {
        Self::from_bytes(vec![0u8; size])
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shrinks the node to `len` bytes
    pub fn truncate(&self, len: usize) {
        lock(&self.data).truncate(len);
    }

    /// Copy of the whole content
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.data).clone()
    }
}

impl BackingStore for MemoryBackingStore {
    fn read_range(&self, offset: u64, dest: &mut [u8]) -> Result<usize, StoreError> {
        let data = lock(&self.data);
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }

        let read = dest.len().min(data.len() - offset);
        dest[..read].copy_from_slice(&data[offset..offset + read]);
        Ok(read)
    }

    fn write_range(&self, offset: u64, src: &[u8]) -> Result<(), StoreError> {
        let mut data = lock(&self.data);
        let offset = offset as usize;
        if data.len() < offset + src.len() {
            data.resize(offset + src.len(), 0);
        }

        data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::MemoryBackingStore;
    use crate::modules::backing_store::{
        test::{
            test_backing_store_normal, test_backing_store_short_read,
            BACKING_STORE_NORMAL_TEST_SIZE,
        },
        BackingStore,
    };

    #[test]
    fn test_memory_store_normal() {
        test_backing_store_normal(MemoryBackingStore::new(BACKING_STORE_NORMAL_TEST_SIZE));
    }

    #[test]
    fn test_memory_store_short_read() {
        test_backing_store_short_read(MemoryBackingStore::new(1000), 1000);
    }

    #[test]
    fn test_memory_store_grows_on_write() {
        let store = MemoryBackingStore::default();
        assert!(store.is_empty());

        store.write_range(10, &[1, 2, 3]).unwrap();
        assert_eq!(store.len(), 13);
        assert_eq!(&store.contents()[10..], &[1, 2, 3]);

        store.truncate(11);
        let mut buffer = [0u8; 3];
        assert_eq!(store.read_range(10, &mut buffer).unwrap(), 1);
        assert_eq!(buffer, [1, 0, 0]);
    }
}
