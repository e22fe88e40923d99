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

use super::{FrameAllocator, FrameNumber, FrameState};
use crate::VMError;

/// Capacity promised by the frame allocator.
///
/// A reservation only accounts for capacity, it never attaches a frame on its own.
/// Frames allocated through it are charged to the reservation, never twice.
/// Unused capacity is returned on drop.
pub struct FrameReservation<'a> {
    allocator: &'a FrameAllocator,
    remaining: usize,
}

impl<'a> FrameReservation<'a> {
    pub(super) fn new(allocator: &'a FrameAllocator, count: usize) -> Self {
        Self {
            allocator,
            remaining: count,
        }
    }

    /// Capacity that was not used up yet
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Allocates one frame out of this reservation
    pub fn allocate(&mut self, state: FrameState) -> Result<FrameNumber, VMError> {
        if self.remaining == 0 {
            return Err(VMError::OutOfMemory);
        }

        let frame = self.allocator.allocate_reserved(state)?;
        self.remaining -= 1;
        Ok(frame)
    }
}

impl Drop for FrameReservation<'_> {
    fn drop(&mut self) {
        if self.remaining != 0 {
            self.allocator.unreserve(self.remaining);
        }
    }
}
