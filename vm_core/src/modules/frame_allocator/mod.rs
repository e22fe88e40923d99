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

use core::{
    array,
    ops::{Deref, DerefMut},
};
use std::sync::{Mutex, Weak};

use log::{debug, trace};
use try_lock::{Locked, TryLock};

mod frame;
mod frame_queue;
mod memory_map;
mod reservation;


pub use frame::{FrameInfo, FrameNumber, FrameState};
pub use memory_map::{MemoryRegion, PhysicalMemoryMap, RegionKind};
pub use reservation::FrameReservation;

use frame::{Frame, STATE_COUNT};
use frame_queue::FrameQueue;

use crate::{page::Page, util::lock, VMError, PAGE_SIZE};

/// Amount of frames per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameStats {
    pub total: usize,
    pub free: usize,
    pub clear: usize,
    pub active: usize,
    pub inactive: usize,
    pub modified: usize,
    pub wired: usize,
    pub reserved: usize,

    /// Capacity that is promised to outstanding reservations
    pub reserved_capacity: usize,
}

impl FrameStats {
    /// Frames that can be handed out right now
    #[inline]
    pub fn available(&self) -> usize {
        self.free + self.clear
    }
}

/// Exclusive access to the bytes of one frame
pub struct FrameBytes<'a> {
    inner: Locked<'a, Box<[u8]>>,
}

impl Deref for FrameBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &**self.inner
    }
}

impl DerefMut for FrameBytes<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.inner
    }
}

struct FrameTable {
    frames: Vec<Frame>,

    /// One queue per frame state, see `FrameState::queue_index`
    queues: [FrameQueue; STATE_COUNT],

    reserved_capacity: usize,

    /// Free frames that are currently being zeroed outside the lock
    scrubbing: usize,
}

impl FrameTable {
    #[inline]
    fn queue(&self, state: FrameState) -> &FrameQueue {
        &self.queues[state.queue_index()]
    }

    #[inline]
    fn available(&self) -> usize {
        self.queue(FrameState::Free).len() + self.queue(FrameState::Clear).len()
    }

    /// Frames that can be allocated without touching reserved capacity
    #[inline]
    fn unreserved(&self) -> usize {
        self.available().saturating_sub(self.reserved_capacity)
    }

    fn move_to(&mut self, index: usize, new_state: FrameState) {
        let old_state = self.frames[index].state;
        self.queues[old_state.queue_index()].remove(&mut self.frames, index);
        self.frames[index].state = new_state;
        self.queues[new_state.queue_index()].push_back(&mut self.frames, index);
    }

    fn requeue(&mut self, index: usize) {
        let state = self.frames[index].state;
        self.queues[state.queue_index()].remove(&mut self.frames, index);
        self.queues[state.queue_index()].push_back(&mut self.frames, index);
    }

    /// Takes one unused frame and moves it to `state`.
    ///
    /// Returns its index and whether it was taken from the clear queue.
    fn take_unused(&mut self, prefer_clear: bool, state: FrameState) -> Option<(usize, bool)> {
        let order = if prefer_clear {
            [FrameState::Clear, FrameState::Free]
        } else {
            [FrameState::Free, FrameState::Clear]
        };

        for source in order {
            if let Some(index) = self.take_from(source, state) {
                return Some((index, source == FrameState::Clear));
            }
        }

        None
    }

    /// Takes the head of the queue of `source` and moves it to `state`
    fn take_from(&mut self, source: FrameState, state: FrameState) -> Option<usize> {
        let index = self.queues[source.queue_index()].pop_front(&mut self.frames)?;
        self.frames[index].state = state;
        self.queues[state.queue_index()].push_back(&mut self.frames, index);
        Some(index)
    }
}

/// Owns every physical frame of the system.
///
/// All queue operations are serialized by one lock that is never held during I/O.
/// The bytes of a frame are only touched by the page that owns the frame.
pub struct FrameAllocator {
    /// Number of the frame at index 0 of the frame table
    first_frame: u64,

    table: Mutex<FrameTable>,

    /// Bytes of every frame, empty for frames that are not backed by usable RAM
    memory: Box<[TryLock<Box<[u8]>>]>,

    usable_frames: usize,
}

impl FrameAllocator {
    /// Partitions the physical memory described by `map` into frames.
    ///
    /// Frames of reserved regions and gaps between regions are wired and never handed out.
    pub fn new(map: &PhysicalMemoryMap) -> Result<Self, VMError> {
        let regions = map
            .sorted_regions()
            .map_err(|_| VMError::InvalidMemoryMap)?;

        let first_frame = regions[0].first_frame;
        let end_frame = regions[regions.len() - 1].end_frame();
        let frame_count = (end_frame - first_frame) as usize;

        let mut frames: Vec<Frame> = (first_frame..end_frame)
            .map(|number| Frame::new(FrameNumber(number), FrameState::Wired))
            .collect();
        let mut memory: Vec<TryLock<Box<[u8]>>> = (0..frame_count)
            .map(|_| TryLock::new(Box::<[u8]>::default()))
            .collect();

        let mut usable_frames = 0;
        for region in regions.iter().filter(|x| x.kind == RegionKind::Usable) {
            for number in region.first_frame..region.end_frame() {
                let index = (number - first_frame) as usize;
                frames[index].state = FrameState::Free;
                memory[index] = TryLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice());
                usable_frames += 1;
            }
        }

        let mut table = FrameTable {
            frames,
            queues: array::from_fn(|_| FrameQueue::new()),
            reserved_capacity: 0,
            scrubbing: 0,
        };

        for index in 0..frame_count {
            let state = table.frames[index].state;
            table.queues[state.queue_index()].push_back(&mut table.frames, index);
        }

        debug!(
            "Initialized frame allocator with {} frames ({} usable, first frame {})",
            frame_count, usable_frames, first_frame
        );

        Ok(Self {
            first_frame,
            table: Mutex::new(table),
            memory: memory.into_boxed_slice(),
            usable_frames,
        })
    }

    #[inline]
    fn index(&self, frame: FrameNumber) -> usize {
        let index = frame
            .0
            .checked_sub(self.first_frame)
            .filter(|x| (*x as usize) < self.memory.len());

        match index {
            Some(index) => index as usize,
            None => panic!("frame {} is out of range", frame),
        }
    }

    /// Total amount of frames including wired boot regions
    pub fn total_frames(&self) -> usize {
        self.memory.len()
    }

    /// Amount of frames that are backed by usable RAM
    pub fn usable_frames(&self) -> usize {
        self.usable_frames
    }

    /// Free and clear frames
    pub fn available(&self) -> usize {
        lock(&self.table).available()
    }

    /// Free and clear frames that are not held back by reservations
    pub fn allocatable(&self) -> usize {
        lock(&self.table).unreserved()
    }

    /// Removes one frame from the free (or clear) queue and moves it to `state`
    pub fn allocate_page(&self, state: FrameState) -> Result<FrameNumber, VMError> {
        self.allocate_internal(state, false).map(|(frame, _)| frame)
    }

    /// Like [`Self::allocate_page`] but prefers already zeroed frames.
    ///
    /// Returns the frame and whether its content is known to be zero.
    pub fn allocate_zeroed_page(&self, state: FrameState) -> Result<(FrameNumber, bool), VMError> {
        self.allocate_internal(state, true)
    }

    fn allocate_internal(
        &self,
        state: FrameState,
        prefer_clear: bool,
    ) -> Result<(FrameNumber, bool), VMError> {
        assert!(!state.is_unused(), "cannot allocate a frame into {:?}", state);

        let mut table = lock(&self.table);
        if table.unreserved() == 0 {
            return Err(VMError::OutOfMemory);
        }

        let (index, clear) = table
            .take_unused(prefer_clear, state)
            .ok_or(VMError::OutOfMemory)?;

        let frame = table.frames[index].number;
        trace!("Allocated frame {} as {:?}", frame, state);
        Ok((frame, clear))
    }

    /// Allocates `length` physically contiguous frames and returns the first one.
    ///
    /// Either all frames are allocated or none.
    pub fn allocate_page_run(
        &self,
        state: FrameState,
        length: usize,
    ) -> Result<FrameNumber, VMError> {
        assert!(length > 0, "run length has to be at least one frame");
        assert!(!state.is_unused(), "cannot allocate a frame into {:?}", state);

        let mut table = lock(&self.table);
        if table.unreserved() < length {
            return Err(VMError::OutOfMemory);
        }

        let mut run_start = 0;
        let mut run_length = 0;
        for (index, frame) in table.frames.iter().enumerate() {
            if frame.state.is_unused() {
                if run_length == 0 {
                    run_start = index;
                }

                run_length += 1;
                if run_length == length {
                    break;
                }
            } else {
                run_length = 0;
            }
        }

        if run_length < length {
            debug!("Could not find a run of {} contiguous frames", length);
            return Err(VMError::OutOfMemory);
        }

        for index in run_start..run_start + length {
            table.move_to(index, state);
        }

        let first = table.frames[run_start].number;
        trace!("Allocated run of {} frames starting at {}", length, first);
        Ok(first)
    }

    /// Claims exactly the frame `frame`, which has to be unused
    pub fn allocate_specific_page(&self, frame: FrameNumber, state: FrameState) -> Result<(), VMError> {
        assert!(!state.is_unused(), "cannot allocate a frame into {:?}", state);

        let index = self.index(frame);
        let mut table = lock(&self.table);

        if !table.frames[index].state.is_unused() {
            return Err(VMError::FrameUnavailable(frame));
        }

        if table.unreserved() == 0 {
            return Err(VMError::OutOfMemory);
        }

        table.move_to(index, state);
        Ok(())
    }

    /// Moves `frame` into `new_state`.
    ///
    /// Before a frame is moved into the free or clear state its owner has to be cleared.
    /// Freeing a frame that is already unused is a double free and panics.
    pub fn set_state(&self, frame: FrameNumber, new_state: FrameState) {
        let index = self.index(frame);
        let mut table = lock(&self.table);

        let old_state = table.frames[index].state;
        if new_state.is_unused() {
            assert!(!old_state.is_unused(), "double free of frame {}", frame);
            debug_assert!(
                table.frames[index].owner.is_none(),
                "frame {} is freed while it still has an owner",
                frame
            );
        }

        if old_state != new_state {
            table.move_to(index, new_state);
        }
    }

    /// Clears the owner of `frame` and puts it back into the free queue
    pub fn free_page(&self, frame: FrameNumber) {
        let index = self.index(frame);
        let mut table = lock(&self.table);

        assert!(
            !table.frames[index].state.is_unused(),
            "double free of frame {}",
            frame
        );

        table.frames[index].owner = None;
        table.move_to(index, FrameState::Free);
        trace!("Freed frame {}", frame);
    }

    /// Returns a snapshot of `frame`.
    ///
    /// Panics if `frame` is not part of the physical memory map.
    pub fn lookup(&self, frame: FrameNumber) -> FrameInfo {
        let index = self.index(frame);
        let table = lock(&self.table);
        let item = &table.frames[index];

        FrameInfo {
            number: item.number,
            state: item.state,
            has_owner: item.owner.is_some(),
        }
    }

    #[inline]
    pub fn state_of(&self, frame: FrameNumber) -> FrameState {
        self.lookup(frame).state
    }

    pub(crate) fn set_owner(&self, frame: FrameNumber, owner: Option<Weak<Page>>) {
        let index = self.index(frame);
        lock(&self.table).frames[index].owner = owner;
    }

    pub(crate) fn owner(&self, frame: FrameNumber) -> Option<Weak<Page>> {
        let index = self.index(frame);
        lock(&self.table).frames[index].owner.clone()
    }

    /// Frees `frame` if it is still owned by the dropped page `owner`
    pub(crate) fn release_orphan(&self, frame: FrameNumber, owner: &Weak<Page>) -> bool {
        let index = self.index(frame);
        let mut table = lock(&self.table);

        let item = &mut table.frames[index];
        let orphaned = matches!(
            &item.owner,
            Some(current) if current.ptr_eq(owner) && current.strong_count() == 0
        );
        if !orphaned {
            return false;
        }

        item.owner = None;
        table.move_to(index, FrameState::Free);
        trace!("Released orphaned frame {}", frame);
        true
    }

    /// Moves `frame` to the end of the queue of its state
    pub(crate) fn requeue(&self, frame: FrameNumber) {
        let index = self.index(frame);
        lock(&self.table).requeue(index);
    }

    /// Moves `frame` from `from` to `to`, if it is still in state `from`
    pub(crate) fn transition(&self, frame: FrameNumber, from: FrameState, to: FrameState) -> bool {
        let index = self.index(frame);
        let mut table = lock(&self.table);

        if table.frames[index].state != from {
            return false;
        }

        table.move_to(index, to);
        true
    }

    /// Collects all owned frames of the queues `states` (in that order, head to tail)
    pub(crate) fn owned_frames(&self, states: &[FrameState]) -> Vec<(FrameNumber, Weak<Page>)> {
        let table = lock(&self.table);
        let mut res = Vec::new();

        for state in states {
            for index in table.queue(*state).iter(&table.frames) {
                let frame = &table.frames[index];
                if let Some(owner) = &frame.owner {
                    res.push((frame.number, owner.clone()));
                }
            }
        }

        res
    }

    /// Grants exclusive access to the bytes of `frame`.
    ///
    /// Only the page that owns `frame` may call this, so contention is a broken invariant.
    pub fn frame_bytes(&self, frame: FrameNumber) -> FrameBytes<'_> {
        let index = self.index(frame);
        self.frame_bytes_by_index(index, frame)
    }

    fn frame_bytes_by_index(&self, index: usize, frame: FrameNumber) -> FrameBytes<'_> {
        let inner = match self.memory[index].try_lock() {
            Some(inner) => inner,
            None => panic!("frame {} is accessed concurrently", frame),
        };

        assert!(!inner.is_empty(), "frame {} is not backed by RAM", frame);
        FrameBytes { inner }
    }

    /// Zeroes up to `max` free frames and moves them into the clear queue.
    ///
    /// Frames that are needed to back outstanding reservations are left alone.
    /// Returns the amount of scrubbed frames.
    pub fn scrub(&self, max: usize) -> usize {
        let mut scrubbed = 0;

        while scrubbed < max {
            let (index, frame) = match self.begin_scrub() {
                Some(res) => res,
                None => break,
            };

            self.frame_bytes_by_index(index, frame).fill(0);
            self.finish_scrub(index);
            scrubbed += 1;
        }

        if scrubbed != 0 {
            trace!("Scrubbed {} frames", scrubbed);
        }

        scrubbed
    }

    /// Takes one free frame out of the queues so it can be zeroed without the lock
    pub(crate) fn begin_scrub(&self) -> Option<(usize, FrameNumber)> {
        let mut table = lock(&self.table);
        if table.unreserved() == 0 {
            return None;
        }

        let index = table.take_from(FrameState::Free, FrameState::Reserved)?;
        table.scrubbing += 1;
        Some((index, table.frames[index].number))
    }

    /// Hands a frame taken by `begin_scrub` to the clear queue
    pub(crate) fn finish_scrub(&self, index: usize) {
        let mut table = lock(&self.table);
        debug_assert_eq!(table.frames[index].state, FrameState::Reserved);
        table.scrubbing -= 1;
        table.move_to(index, FrameState::Clear);
    }

    /// Amount of frames that are being zeroed right now and will be allocatable again shortly
    pub(crate) fn scrubbing(&self) -> usize {
        lock(&self.table).scrubbing
    }

    /// Reserves capacity for `count` frames without allocating any of them
    pub fn reserve(&self, count: usize) -> Result<FrameReservation<'_>, VMError> {
        let mut table = lock(&self.table);
        if table.unreserved() < count {
            return Err(VMError::OutOfMemory);
        }

        table.reserved_capacity += count;
        Ok(FrameReservation::new(self, count))
    }

    pub(crate) fn allocate_reserved(&self, state: FrameState) -> Result<FrameNumber, VMError> {
        assert!(!state.is_unused(), "cannot allocate a frame into {:?}", state);

        let mut table = lock(&self.table);
        debug_assert!(table.reserved_capacity > 0);

        let (index, _) = table
            .take_unused(false, state)
            .ok_or(VMError::OutOfMemory)?;
        table.reserved_capacity -= 1;

        Ok(table.frames[index].number)
    }

    pub(crate) fn unreserve(&self, count: usize) {
        let mut table = lock(&self.table);
        debug_assert!(table.reserved_capacity >= count);
        table.reserved_capacity -= count;
    }

    pub fn stats(&self) -> FrameStats {
        let table = lock(&self.table);
        let count = |state: FrameState| table.queue(state).len();

        FrameStats {
            total: table.frames.len(),
            free: count(FrameState::Free),
            clear: count(FrameState::Clear),
            active: count(FrameState::Active),
            inactive: count(FrameState::Inactive),
            modified: count(FrameState::Modified),
            wired: count(FrameState::Wired),
            reserved: count(FrameState::Reserved),
            reserved_capacity: table.reserved_capacity,
        }
    }

    /// Human readable description of `frame`
    pub fn dump_frame(&self, frame: FrameNumber) -> String {
        let index = self.index(frame);
        let owner = self.owner(frame).and_then(|x| x.upgrade());
        let state = lock(&self.table).frames[index].state;

        match owner {
            Some(page) => format!(
                "frame {} (phys {:#x}): {:?}, owned by page {} at {:#x}",
                frame,
                frame.physical_address(),
                state,
                page.id(),
                page.start()
            ),
            None => format!(
                "frame {} (phys {:#x}): {:?}, no owner",
                frame,
                frame.physical_address(),
                state
            ),
        }
    }
}

static_assertions::assert_impl_all!(FrameAllocator: Send, Sync);
