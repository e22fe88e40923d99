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

use core::fmt::{self, Display};
use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc, Mutex, MutexGuard, TryLockError, Weak,
};

use log::{trace, warn};

mod protection;


pub use protection::Protection;

use crate::{
    modules::{
        backing_store::BackingNode,
        frame_allocator::{FrameNumber, FrameState},
    },
    util::lock,
    vm_core::VMCore,
    VMError, PAGE_SIZE,
};

/// Identifies a page, e.g. in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageState {
    /// No frame attached, accesses trap
    Unmapped = 0,
    /// A fault is being resolved right now
    Resolving = 1,
    /// A frame is attached
    Mapped = 2,
}

impl PageState {
    #[inline]
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => PageState::Resolving,
            2 => PageState::Mapped,
            _ => PageState::Unmapped,
        }
    }
}

/// Result of a successful fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultOutcome {
    /// Frame the caller should install the translation for
    pub frame: FrameNumber,

    /// `false` if the page was already mapped, e.g. by a concurrent fault
    pub resolved: bool,
}

/// Location of the content of a page inside of a backing node
pub(crate) struct BackingRef {
    node: BackingNode,
    offset: u64,

    /// The node is a swap slot that was assigned lazily
    swap: bool,
}

/// Why the reclaimer could not evict a page
#[derive(Debug)]
pub(crate) enum EvictSkip {
    /// Page lock is held, e.g. a fault is resolving
    Busy,
    /// Page does not map the candidate frame anymore or was destroyed
    Stale,
    /// Page is wired
    Wired,
    /// Page was accessed since the last pass and got a second chance
    Referenced,
    /// Writing back the dirty content failed
    Failed(VMError),
}

pub(crate) enum EvictResult {
    Evicted { flushed: bool },
    Skipped(EvictSkip),
}

struct PageInner {
    frame: Option<FrameNumber>,
    backing: Option<BackingRef>,
    protection: Protection,
    dirty: bool,
    swappable: bool,
    wired: usize,
    destroyed: bool,
}

/// One page sized virtual mapping unit.
///
/// Owns at most one frame at a time. Its lock serializes faults, flushes and refreshes
/// and is held during backing store I/O. The frame allocator lock may be taken while
/// holding it, never the other way around.
pub struct Page {
    id: PageId,
    start: u64,

    inner: Mutex<PageInner>,

    /// Mirror of the state for lock free diagnostics
    state: AtomicU8,

    /// Set on every access, cleared by the reclaimer when aging frames
    accessed: AtomicBool,

    /// Handed to the frame allocator as back reference
    self_ref: Weak<Page>,
}

impl Page {
    pub(crate) fn new(
        id: PageId,
        start: u64,
        backing: Option<(BackingNode, u64)>,
        protection: Protection,
        swappable: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id,
            start,
            inner: Mutex::new(PageInner {
                frame: None,
                backing: backing.map(|(node, offset)| BackingRef {
                    node,
                    offset,
                    swap: false,
                }),
                protection,
                dirty: false,
                swappable,
                wired: 0,
                destroyed: false,
            }),
            state: AtomicU8::new(PageState::Unmapped as u8),
            accessed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// End of the page (exclusive)
    #[inline]
    pub fn end(&self) -> u64 {
        self.start + PAGE_SIZE as u64
    }

    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        self.start <= address && address < self.end()
    }

    pub fn state(&self) -> PageState {
        PageState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    fn set_state(&self, state: PageState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        lock(&self.inner).dirty
    }

    pub fn is_swappable(&self) -> bool {
        lock(&self.inner).swappable
    }

    pub fn is_wired(&self) -> bool {
        lock(&self.inner).wired != 0
    }

    pub fn protection(&self) -> Protection {
        lock(&self.inner).protection
    }

    /// Frame that is currently attached
    pub fn frame(&self) -> Option<FrameNumber> {
        lock(&self.inner).frame
    }

    /// Does the page have a backing node, either its own or a swap slot?
    pub fn has_backing(&self) -> bool {
        lock(&self.inner).backing.is_some()
    }

    pub(crate) fn take_accessed(&self) -> bool {
        self.accessed.swap(false, Ordering::SeqCst)
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, PageInner>, VMError> {
        let inner = lock(&self.inner);
        if inner.destroyed {
            return Err(VMError::PageDestroyed);
        }

        Ok(inner)
    }

    /// Resolves a fault at `address`.
    ///
    /// Faults of the same page are serialized. A thread that faults while another
    /// one resolves the page waits and then finds the page already mapped.
    pub fn fault(&self, vm: &VMCore, address: u64, write: bool) -> Result<FaultOutcome, VMError> {
        if !self.contains(address) {
            return Err(VMError::OutOfRange { address });
        }

        let mut inner = self.lock_inner()?;
        self.fault_locked(vm, &mut inner, address, write)
    }

    fn fault_locked(
        &self,
        vm: &VMCore,
        inner: &mut PageInner,
        address: u64,
        write: bool,
    ) -> Result<FaultOutcome, VMError> {
        if (write && !inner.protection.allows_write()) || !inner.protection.allows_read() {
            return Err(VMError::ProtectionViolation { address, write });
        }

        self.accessed.store(true, Ordering::SeqCst);

        if let Some(frame) = inner.frame {
            if write && !inner.dirty {
                inner.dirty = true;
                Self::mark_modified(vm, frame);
            }

            return Ok(FaultOutcome {
                frame,
                resolved: false,
            });
        }

        trace!(
            "Resolve fault of page {} at {:#x} (write: {})",
            self.id,
            address,
            write
        );

        self.set_state(PageState::Resolving);
        match self.resolve(vm, inner, write) {
            Ok(frame) => {
                self.set_state(PageState::Mapped);
                Ok(FaultOutcome {
                    frame,
                    resolved: true,
                })
            }
            Err(err) => {
                self.set_state(PageState::Unmapped);
                warn!("Could not resolve fault of page {}: {}", self.id, err);
                Err(err)
            }
        }
    }

    fn resolve(&self, vm: &VMCore, inner: &mut PageInner, write: bool) -> Result<FrameNumber, VMError> {
        // the frame stays reserved while its content is populated,
        // so the reclaimer never considers it
        let (frame, is_clear) = vm.allocate_frame(FrameState::Reserved)?;

        let populated = match &inner.backing {
            Some(backing) => Self::read_in(vm, frame, backing),
            None => {
                if !is_clear {
                    vm.frames().frame_bytes(frame).fill(0);
                }
                Ok(())
            }
        };

        if let Err(err) = populated {
            vm.frames().free_page(frame);
            return Err(err);
        }

        vm.frames().set_owner(frame, Some(self.self_ref.clone()));
        inner.frame = Some(frame);
        inner.dirty = write;

        let state = if inner.wired != 0 {
            FrameState::Wired
        } else if write {
            FrameState::Modified
        } else {
            FrameState::Active
        };
        vm.frames().set_state(frame, state);

        Ok(frame)
    }

    /// Populates `frame` from `backing`, zero filling everything behind the end of the node
    fn read_in(vm: &VMCore, frame: FrameNumber, backing: &BackingRef) -> Result<(), VMError> {
        let mut bytes = vm.frames().frame_bytes(frame);
        let read = backing.node.read_range(backing.offset, &mut bytes)?;
        bytes[read.min(PAGE_SIZE)..].fill(0);

        Ok(())
    }

    #[inline]
    fn mark_modified(vm: &VMCore, frame: FrameNumber) {
        if !vm
            .frames()
            .transition(frame, FrameState::Active, FrameState::Modified)
        {
            vm.frames()
                .transition(frame, FrameState::Inactive, FrameState::Modified);
        }
    }

    /// Writes dirty content back to the backing node.
    ///
    /// Anonymous swappable pages get a swap slot on their first flush.
    pub fn flush(&self, vm: &VMCore) -> Result<(), VMError> {
        let mut inner = self.lock_inner()?;
        self.flush_locked(vm, &mut inner)
    }

    fn flush_locked(&self, vm: &VMCore, inner: &mut PageInner) -> Result<(), VMError> {
        let frame = match inner.frame {
            Some(frame) => frame,
            None => return Ok(()),
        };

        if !inner.dirty {
            return Ok(());
        }

        if inner.backing.is_none() {
            if !inner.swappable {
                return Err(VMError::NotSwappable);
            }

            let slot = vm.swap().ok_or(VMError::SwapExhausted)?.allocate_slot()?;
            trace!("Page {} swaps to slot {}", self.id, slot.index());

            inner.backing = Some(BackingRef {
                node: slot,
                offset: 0,
                swap: true,
            });
        }

        if let Some(backing) = &inner.backing {
            let bytes = vm.frames().frame_bytes(frame);
            backing.node.write_range(backing.offset, &bytes)?;
        }

        inner.dirty = false;
        vm.frames()
            .transition(frame, FrameState::Modified, FrameState::Active);

        trace!("Flushed page {} (frame {})", self.id, frame);
        Ok(())
    }

    /// Populates the attached frame again from the backing node.
    ///
    /// Local modifications are discarded. Unmapped pages and pages without
    /// backing node are left alone.
    pub fn refresh(&self, vm: &VMCore) -> Result<(), VMError> {
        let mut inner = self.lock_inner()?;

        let frame = match inner.frame {
            Some(frame) => frame,
            None => return Ok(()),
        };

        if let Some(backing) = &inner.backing {
            Self::read_in(vm, frame, backing)?;

            inner.dirty = false;
            vm.frames()
                .transition(frame, FrameState::Modified, FrameState::Active);
        }

        Ok(())
    }

    pub fn set_protection(&self, protection: Protection) -> Result<(), VMError> {
        self.lock_inner()?.protection = protection;
        Ok(())
    }

    /// Copies the bytes at `address` into `dest`, faulting the page in if needed
    pub fn read(&self, vm: &VMCore, address: u64, dest: &mut [u8]) -> Result<(), VMError> {
        let offset = self.access_offset(address, dest.len())?;
        let mut inner = self.lock_inner()?;
        let outcome = self.fault_locked(vm, &mut inner, address, false)?;

        let bytes = vm.frames().frame_bytes(outcome.frame);
        dest.copy_from_slice(&bytes[offset..offset + dest.len()]);
        Ok(())
    }

    /// Copies `src` to `address`, faulting the page in for writing if needed
    pub fn write(&self, vm: &VMCore, address: u64, src: &[u8]) -> Result<(), VMError> {
        let offset = self.access_offset(address, src.len())?;
        let mut inner = self.lock_inner()?;
        let outcome = self.fault_locked(vm, &mut inner, address, true)?;

        let mut bytes = vm.frames().frame_bytes(outcome.frame);
        bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    #[inline]
    fn access_offset(&self, address: u64, len: usize) -> Result<usize, VMError> {
        if !self.contains(address) || address + len as u64 > self.end() {
            return Err(VMError::OutOfRange { address });
        }

        Ok((address - self.start) as usize)
    }

    /// Faults the page in and excludes its frame from reclamation until it is unwired
    pub(crate) fn wire(&self, vm: &VMCore) -> Result<FrameNumber, VMError> {
        let mut inner = self.lock_inner()?;
        let outcome = self.fault_locked(vm, &mut inner, self.start, false)?;

        inner.wired += 1;
        if inner.wired == 1 {
            vm.frames().set_state(outcome.frame, FrameState::Wired);
        }

        Ok(outcome.frame)
    }

    pub(crate) fn unwire(&self, vm: &VMCore) -> Result<(), VMError> {
        let mut inner = self.lock_inner()?;
        assert!(inner.wired != 0, "page {} is not wired", self.id);

        inner.wired -= 1;
        if inner.wired == 0 {
            if let Some(frame) = inner.frame {
                let state = if inner.dirty {
                    FrameState::Modified
                } else {
                    FrameState::Active
                };
                vm.frames().set_state(frame, state);
            }
        }

        Ok(())
    }

    /// Tries to take the frame `frame` away from this page.
    ///
    /// Never blocks on the page lock. Dirty content is flushed exactly once before
    /// the frame is freed.
    pub(crate) fn try_evict(
        &self,
        vm: &VMCore,
        frame: FrameNumber,
        candidate_states: &[FrameState],
        honor_access: bool,
    ) -> EvictResult {
        let mut inner = match self.inner.try_lock() {
            Ok(inner) => inner,
            Err(TryLockError::WouldBlock) => return EvictResult::Skipped(EvictSkip::Busy),
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
        };

        if inner.destroyed || inner.frame != Some(frame) {
            return EvictResult::Skipped(EvictSkip::Stale);
        }

        if inner.wired != 0 {
            return EvictResult::Skipped(EvictSkip::Wired);
        }

        let state = vm.frames().state_of(frame);
        if !candidate_states.contains(&state) {
            return EvictResult::Skipped(EvictSkip::Stale);
        }

        if honor_access && self.take_accessed() {
            vm.frames()
                .transition(frame, FrameState::Inactive, FrameState::Active);
            return EvictResult::Skipped(EvictSkip::Referenced);
        }

        let flushed = inner.dirty;
        if flushed {
            if let Err(err) = self.flush_locked(vm, &mut inner) {
                return EvictResult::Skipped(EvictSkip::Failed(err));
            }
        }

        self.detach_locked(vm, &mut inner);
        EvictResult::Evicted { flushed }
    }

    /// Flushes a dirty page that is not in use without evicting it
    pub(crate) fn try_write_back(&self, vm: &VMCore) -> Result<bool, VMError> {
        let mut inner = match self.inner.try_lock() {
            Ok(inner) => inner,
            Err(TryLockError::WouldBlock) => return Ok(false),
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
        };

        if inner.destroyed || !inner.dirty || inner.frame.is_none() {
            return Ok(false);
        }

        self.flush_locked(vm, &mut inner)?;
        Ok(true)
    }

    fn detach_locked(&self, vm: &VMCore, inner: &mut PageInner) {
        if let Some(frame) = inner.frame.take() {
            vm.frames().free_page(frame);
            trace!("Detached frame {} from page {}", frame, self.id);
        }

        self.set_state(PageState::Unmapped);
    }

    /// Releases the frame and the backing node of this page.
    ///
    /// Dirty content is written back if the page has a backing node of its own.
    /// Destroying a page while a fault on it is being resolved is a broken invariant.
    pub(crate) fn destroy(&self, vm: &VMCore) -> Result<(), VMError> {
        let mut inner = match self.inner.try_lock() {
            Ok(inner) => inner,
            Err(TryLockError::WouldBlock) => {
                if self.state() == PageState::Resolving {
                    panic!("page {} destroyed while a fault is resolving", self.id);
                }

                lock(&self.inner)
            }
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
        };

        if inner.destroyed {
            return Err(VMError::PageDestroyed);
        }

        if inner.wired != 0 {
            warn!("Destroying page {} that is still wired", self.id);
            inner.wired = 0;
        }

        let persistent = inner.backing.as_ref().map(|x| !x.swap).unwrap_or(false);
        let flushed = if persistent {
            self.flush_locked(vm, &mut inner)
        } else {
            Ok(())
        };

        self.detach_locked(vm, &mut inner);
        inner.dirty = false;
        inner.backing = None;
        inner.destroyed = true;

        flushed
    }

    /// Human readable description of this page
    pub fn dump(&self) -> String {
        let state = self.state();
        let inner = match self.inner.try_lock() {
            Ok(inner) => inner,
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return format!(
                    "page {} [{:#x}, {:#x}): {:?} (locked)",
                    self.id,
                    self.start,
                    self.end(),
                    state
                )
            }
        };

        let frame = match inner.frame {
            Some(frame) => frame.to_string(),
            None => "-".into(),
        };
        let backing = match &inner.backing {
            Some(backing) if backing.swap => "swap".to_string(),
            Some(backing) => format!("node@{:#x}", backing.offset),
            None => "anonymous".into(),
        };

        format!(
            "page {} [{:#x}, {:#x}): {:?}, frame {}, {:?}, {}, dirty: {}, swappable: {}, wired: {}",
            self.id,
            self.start,
            self.end(),
            state,
            frame,
            inner.protection,
            backing,
            inner.dirty,
            inner.swappable,
            inner.wired
        )
    }
}
