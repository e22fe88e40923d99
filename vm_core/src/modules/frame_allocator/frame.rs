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
use std::sync::Weak;

use super::frame_queue::QueueLink;
use crate::page::Page;

/// Number of a physical frame, i.e. its physical address divided by `PAGE_SIZE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameNumber(pub u64);

impl FrameNumber {
    #[inline]
    pub const fn physical_address(&self) -> u64 {
        self.0 * crate::PAGE_SIZE as u64
    }
}

impl Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of a physical frame.
///
/// Every frame is in exactly one state and therefore in exactly one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameState {
    /// Unused, content undefined
    Free,
    /// Unused and already zeroed
    Clear,
    /// Mapped by a page and recently used
    Active,
    /// Mapped by a page that was not used lately, first reclamation candidate
    Inactive,
    /// Mapped by a page whose content differs from its backing node
    Modified,
    /// Never reclaimed automatically
    Wired,
    /// Taken out of the free queues but not (yet) attached to a page
    Reserved,
}

pub(crate) const STATE_COUNT: usize = 7;

impl FrameState {
    pub(crate) const ALL: [FrameState; STATE_COUNT] = [
        FrameState::Free,
        FrameState::Clear,
        FrameState::Active,
        FrameState::Inactive,
        FrameState::Modified,
        FrameState::Wired,
        FrameState::Reserved,
    ];

    #[inline]
    pub(crate) const fn queue_index(&self) -> usize {
        match self {
            FrameState::Free => 0,
            FrameState::Clear => 1,
            FrameState::Active => 2,
            FrameState::Inactive => 3,
            FrameState::Modified => 4,
            FrameState::Wired => 5,
            FrameState::Reserved => 6,
        }
    }

    /// Can a frame in this state be handed out by the allocator?
    #[inline]
    pub const fn is_unused(&self) -> bool {
        matches!(self, FrameState::Free | FrameState::Clear)
    }
}

pub(crate) struct Frame {
    pub(crate) number: FrameNumber,
    pub(crate) state: FrameState,

    /// Page that currently maps this frame.
    ///
    /// Never keeps the page alive, frames are owned by the allocator only.
    pub(crate) owner: Option<Weak<Page>>,

    pub(crate) link: QueueLink,
}

impl Frame {
    pub(crate) fn new(number: FrameNumber, state: FrameState) -> Self {
        Self {
            number,
            state,
            owner: None,
            link: QueueLink::default(),
        }
    }
}

/// Snapshot of a frame as returned by [`FrameAllocator::lookup`](super::FrameAllocator::lookup)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub number: FrameNumber,
    pub state: FrameState,
    pub has_owner: bool,
}
