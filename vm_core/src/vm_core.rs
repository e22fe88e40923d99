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

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
};

use log::{debug, error, warn};

use crate::{
    modules::{
        backing_store::{BackingNode, SwapSpace},
        frame_allocator::{FrameAllocator, FrameNumber, FrameState, PhysicalMemoryMap},
        reclaimer::{ReclaimOutcome, Reclaimer, Wakeup},
    },
    page::{FaultOutcome, Page, PageId, Protection},
    util::is_page_aligned,
    VMConfig, VMError, PAGE_SIZE,
};

/// The virtual memory core.
///
/// Constructed once and shared by reference with every caller. Owns the frame
/// allocator, the optional swap space and the pager. Pages are owned by the
/// caller (the area manager) and passed in by reference.
pub struct VMCore {
    config: VMConfig,
    frames: FrameAllocator,
    swap: Option<Arc<SwapSpace>>,
    reclaimer: Reclaimer,
    wakeup: Wakeup,
    next_page_id: AtomicU64,
}

impl VMCore {
    pub fn new(
        config: VMConfig,
        map: &PhysicalMemoryMap,
        swap: Option<Arc<SwapSpace>>,
    ) -> Result<Self, VMError> {
        config.validate().map_err(|_| VMError::InvalidConfig)?;
        let frames = FrameAllocator::new(map)?;

        log::info!(
            "Initialized VM core with {} usable frames ({} swap slots)",
            frames.usable_frames(),
            swap.as_ref().map(|x| x.slot_count()).unwrap_or(0)
        );

        Ok(Self {
            config,
            frames,
            swap,
            reclaimer: Reclaimer::new(),
            wakeup: Wakeup::default(),
            next_page_id: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn config(&self) -> &VMConfig {
        &self.config
    }

    #[inline]
    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    #[inline]
    pub fn swap(&self) -> Option<&Arc<SwapSpace>> {
        self.swap.as_ref()
    }

    #[inline]
    pub(crate) fn wakeup(&self) -> &Wakeup {
        &self.wakeup
    }

    /// Creates a lazily mapped page over `[start, end)`.
    ///
    /// The range has to be page aligned and exactly one page long. `backing` is the
    /// node and byte offset the content of the page is read from and written back to.
    pub fn create_page(
        &self,
        start: u64,
        end: u64,
        backing: Option<(BackingNode, u64)>,
        protection: Protection,
        swappable: bool,
    ) -> Result<Arc<Page>, VMError> {
        if !is_page_aligned(start) || end.checked_sub(start) != Some(PAGE_SIZE as u64) {
            return Err(VMError::InvalidRange { start, end });
        }

        let id = PageId(self.next_page_id.fetch_add(1, Ordering::Relaxed));
        debug!("Created page {} at [{:#x}, {:#x})", id, start, end);

        Ok(Page::new(id, start, backing, protection, swappable))
    }

    /// Flushes and releases everything the page holds.
    ///
    /// The frame is released even if writing back dirty content failed,
    /// the error is returned afterwards.
    pub fn destroy_page(&self, page: &Page) -> Result<(), VMError> {
        let res = page.destroy(self);
        match &res {
            Ok(()) => debug!("Destroyed page {}", page.id()),
            Err(err) => error!("Lost content of page {} while destroying it: {}", page.id(), err),
        }

        res
    }

    #[inline]
    pub fn fault(&self, page: &Page, address: u64, write: bool) -> Result<FaultOutcome, VMError> {
        page.fault(self, address, write)
    }

    #[inline]
    pub fn set_protection(&self, page: &Page, protection: Protection) -> Result<(), VMError> {
        page.set_protection(protection)
    }

    #[inline]
    pub fn flush(&self, page: &Page) -> Result<(), VMError> {
        page.flush(self)
    }

    #[inline]
    pub fn refresh(&self, page: &Page) -> Result<(), VMError> {
        page.refresh(self)
    }

    /// Faults `page` in and excludes its frame from reclamation
    pub fn wire_page(&self, page: &Page) -> Result<FrameNumber, VMError> {
        page.wire(self)
    }

    pub fn unwire_page(&self, page: &Page) -> Result<(), VMError> {
        page.unwire(self)
    }

    /// Writes back up to `max` dirty pages without evicting them.
    ///
    /// Returns how many pages were flushed.
    pub fn write_back(&self, max: usize) -> usize {
        let mut flushed = 0;

        for (frame, owner) in self
            .frames
            .owned_frames(&[FrameState::Inactive, FrameState::Modified])
        {
            if flushed >= max {
                break;
            }

            let page = match owner.upgrade() {
                Some(page) => page,
                None => continue,
            };

            match page.try_write_back(self) {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    "Could not write back page {} (frame {}): {}",
                    page.id(),
                    frame,
                    err
                ),
            }
        }

        if flushed != 0 {
            debug!("Page writer flushed {} pages", flushed);
        }

        flushed
    }

    /// Runs one reclamation pass at `desperation`.
    ///
    /// Returns `None` if another pass is running right now.
    pub fn reclaim(&self, desperation: u8) -> Option<ReclaimOutcome> {
        self.reclaimer
            .reclaim(self, desperation.min(self.config.max_desperation))
    }

    /// Runs one reclamation pass, escalating the desperation level if the
    /// previous pass missed the high water mark.
    pub fn reclaim_escalating(&self) -> Option<ReclaimOutcome> {
        self.reclaimer.reclaim_escalating(self)
    }

    /// Desperation level of the next escalating pass, `None` if a pass is running
    pub fn desperation(&self) -> Option<u8> {
        self.reclaimer.desperation()
    }

    /// Allocates a frame for a fault, reclaiming synchronously if memory is exhausted.
    ///
    /// Returns the frame and whether it is already zeroed.
    pub(crate) fn allocate_frame(&self, state: FrameState) -> Result<(FrameNumber, bool), VMError> {
        // consecutive passes after which the allocation still failed
        let mut fruitless: u8 = 0;
        let mut exhausted = false;

        loop {
            match self.frames.allocate_zeroed_page(state) {
                Ok(res) => {
                    if self.frames.available() < self.config.low_water_frames {
                        self.wakeup.notify();
                    }
                    return Ok(res);
                }
                Err(VMError::OutOfMemory) if self.frames.scrubbing() != 0 => {
                    // frames that are being zeroed come back shortly
                    thread::yield_now();
                    continue;
                }
                Err(VMError::OutOfMemory) if !exhausted => {}
                Err(err) => {
                    if matches!(err, VMError::OutOfMemory) {
                        error!("Out of memory, reclamation at maximum desperation failed");
                    }
                    return Err(err);
                }
            }

            let max = self.config.max_desperation;
            match self.reclaimer.reclaim_escalating(self) {
                Some(outcome) if outcome.reclaimed != 0 => fruitless = 0,
                Some(outcome) => {
                    // a pass that claims to have reached its target but did not
                    // make room for this allocation still counts as failed
                    fruitless = fruitless.saturating_add(1);
                    exhausted = (outcome.desperation >= max && outcome.deactivated == 0)
                        || fruitless > max;
                }
                None => thread::yield_now(),
            }
        }
    }
}

static_assertions::assert_impl_all!(VMCore: Send, Sync);
