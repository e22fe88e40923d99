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

mod concurrency;
mod scenarios;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use crate::{
    modules::{
        backing_store::{BackingNode, BackingStore, MemoryBackingStore, StoreError, SwapSpace},
        frame_allocator::PhysicalMemoryMap,
    },
    VMConfig, VMCore,
};

pub(crate) fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Config for small test setups, water marks scaled down to `frames`
pub(crate) fn get_test_config(frames: usize) -> VMConfig {
    VMConfig {
        low_water_frames: (frames / 8).max(1),
        high_water_frames: (frames / 4).max(1),
        ..Default::default()
    }
}

pub(crate) fn get_test_vm(frames: usize, swap: Option<Arc<SwapSpace>>) -> VMCore {
    init_test_logger();
    VMCore::new(
        get_test_config(frames),
        &PhysicalMemoryMap::with_usable_frames(frames as u64),
        swap,
    )
    .unwrap()
}

pub(crate) fn get_test_vm_with_config(frames: usize, swap: Option<Arc<SwapSpace>>, config: VMConfig) -> VMCore {
    init_test_logger();
    VMCore::new(
        config,
        &PhysicalMemoryMap::with_usable_frames(frames as u64),
        swap,
    )
    .unwrap()
}

/// Backing store that records every call and can be switched to fail
#[derive(Default)]
pub(crate) struct RecordingStore {
    inner: MemoryBackingStore,
    reads: AtomicUsize,
    writes: Mutex<Vec<(u64, usize)>>,
    fail: AtomicBool,
}

impl RecordingStore {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            inner: MemoryBackingStore::new(size),
            ..Default::default()
        }
    }

    pub(crate) fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            inner: MemoryBackingStore::from_bytes(data),
            ..Default::default()
        }
    }

    pub(crate) fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// `(offset, len)` of every write so far
    pub(crate) fn writes(&self) -> Vec<(u64, usize)> {
        self.writes.lock().unwrap().clone()
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn contents(&self) -> Vec<u8> {
        self.inner.contents()
    }

    pub(crate) fn truncate(&self, len: usize) {
        self.inner.truncate(len);
    }
}

impl BackingStore for RecordingStore {
    fn read_range(&self, offset: u64, dest: &mut [u8]) -> Result<usize, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Failed("injected read failure"));
        }

        self.inner.read_range(offset, dest)
    }

    fn write_range(&self, offset: u64, src: &[u8]) -> Result<(), StoreError> {
        self.writes.lock().unwrap().push((offset, src.len()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Failed("injected write failure"));
        }

        self.inner.write_range(offset, src)
    }
}

/// Backing argument of `VMCore::create_page` for `store` at `offset`
pub(crate) fn backed_by<T: BackingStore + 'static>(store: &Arc<T>, offset: u64) -> Option<(BackingNode, u64)> {
    let node: BackingNode = store.clone();
    Some((node, offset))
}

/// Deterministic content of byte `i` of page `page`
pub(crate) fn gen_byte(page: usize, i: usize) -> u8 {
    (page * 31 + i * 7 + (i % 13) * 3) as u8
}
