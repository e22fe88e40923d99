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

mod background;


use log::{debug, trace, warn};
use try_lock::TryLock;

pub use background::BackgroundReclaimer;
pub(crate) use background::Wakeup;

use crate::{
    modules::frame_allocator::FrameState,
    page::{EvictResult, EvictSkip},
    vm_core::VMCore,
};

/// Result of one reclamation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReclaimOutcome {
    /// Desperation level the pass ran at
    pub desperation: u8,

    /// Frames that were returned to the free queue
    pub reclaimed: usize,

    /// How many of the reclaimed frames had to be written back first
    pub flushed: usize,

    /// Candidates that were skipped (busy, wired, referenced or failed to flush)
    pub skipped: usize,

    /// Frames moved to the inactive queue by the aging step at the end of the pass
    pub deactivated: usize,

    /// Whether the high water mark was reached
    pub reached_target: bool,
}

struct ReclaimState {
    /// Level of the next escalating pass
    desperation: u8,
}

/// System wide pager.
///
/// Only one pass runs at a time. Callers that find the reclaimer busy
/// should yield and retry instead of blocking.
pub(crate) struct Reclaimer {
    state: TryLock<ReclaimState>,
}

/// Frame states that are eviction candidates at `desperation`, in the order they are visited
pub(crate) fn candidate_states(desperation: u8) -> &'static [FrameState] {
    match desperation {
        0 => &[FrameState::Inactive],
        1 => &[FrameState::Inactive, FrameState::Active],
        _ => &[
            FrameState::Inactive,
            FrameState::Active,
            FrameState::Modified,
        ],
    }
}

impl Reclaimer {
    pub(crate) fn new() -> Self {
        Self {
            state: TryLock::new(ReclaimState { desperation: 0 }),
        }
    }

    /// Desperation level the next escalating pass runs at, `None` if a pass is running
    pub(crate) fn desperation(&self) -> Option<u8> {
        self.state.try_lock().map(|state| state.desperation)
    }

    /// Runs one pass at a fixed level, `None` if another pass is running
    pub(crate) fn reclaim(&self, vm: &VMCore, desperation: u8) -> Option<ReclaimOutcome> {
        let _state = self.state.try_lock()?;
        Some(run_pass(vm, desperation))
    }

    /// Runs one pass at the current level.
    ///
    /// A pass that misses the high water mark raises the level for the next one,
    /// a successful pass resets it.
    pub(crate) fn reclaim_escalating(&self, vm: &VMCore) -> Option<ReclaimOutcome> {
        let mut state = self.state.try_lock()?;
        let max = vm.config().max_desperation;

        let outcome = run_pass(vm, state.desperation.min(max));
        state.desperation = if outcome.reached_target {
            0
        } else {
            (outcome.desperation + 1).min(max)
        };

        Some(outcome)
    }
}

/// Amount of allocatable frames a pass aims for
#[inline]
fn target_frames(vm: &VMCore) -> usize {
    vm.config()
        .high_water_frames
        .min(vm.frames().usable_frames())
        .max(1)
}

fn run_pass(vm: &VMCore, desperation: u8) -> ReclaimOutcome {
    let states = candidate_states(desperation);
    let honor_access = desperation < vm.config().max_desperation;
    let target = target_frames(vm);

    let mut outcome = ReclaimOutcome {
        desperation,
        ..Default::default()
    };

    // snapshot, the allocator lock is not held while pages are visited
    let candidates = vm.frames().owned_frames(states);

    for (frame, owner) in candidates {
        if vm.frames().allocatable() >= target {
            break;
        }

        let page = match owner.upgrade() {
            Some(page) => page,
            None => {
                // the page was dropped without being destroyed
                if vm.frames().release_orphan(frame, &owner) {
                    outcome.reclaimed += 1;
                } else {
                    outcome.skipped += 1;
                }
                continue;
            }
        };

        match page.try_evict(vm, frame, states, honor_access) {
            EvictResult::Evicted { flushed } => {
                outcome.reclaimed += 1;
                if flushed {
                    outcome.flushed += 1;
                }
            }
            EvictResult::Skipped(EvictSkip::Failed(err)) => {
                warn!(
                    "Skipping page {} (frame {}): could not write back: {}",
                    page.id(),
                    frame,
                    err
                );
                outcome.skipped += 1;
            }
            EvictResult::Skipped(reason) => {
                trace!("Skipping page {} (frame {}): {:?}", page.id(), frame, reason);
                outcome.skipped += 1;
            }
        }
    }

    outcome.reached_target = vm.frames().allocatable() >= target;
    outcome.deactivated = age_frames(vm);

    debug!("Reclamation pass finished: {:?}", outcome);
    outcome
}

/// Moves frames whose pages were not accessed since the last pass to the inactive queue
fn age_frames(vm: &VMCore) -> usize {
    let mut deactivated = 0;

    for (frame, owner) in vm
        .frames()
        .owned_frames(&[FrameState::Active, FrameState::Modified])
    {
        let page = match owner.upgrade() {
            Some(page) => page,
            None => continue,
        };

        if page.take_accessed() {
            vm.frames().requeue(frame);
        } else if vm
            .frames()
            .transition(frame, FrameState::Active, FrameState::Inactive)
            || vm
                .frames()
                .transition(frame, FrameState::Modified, FrameState::Inactive)
        {
            deactivated += 1;
        }
    }

    if deactivated != 0 {
        trace!("Deactivated {} frames", deactivated);
    }

    deactivated
}
