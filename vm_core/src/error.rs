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

use thiserror::Error;

use crate::modules::{backing_store::StoreError, frame_allocator::FrameNumber};

/// Errors surfaced by the virtual memory core.
///
/// Exhaustion and I/O failures are fatal to the operation that requested them,
/// but never to the core itself. Broken invariants panic instead.
#[derive(Debug, Error)]
pub enum VMError {
    #[error("out of physical memory")]
    OutOfMemory,

    #[error("swap space exhausted")]
    SwapExhausted,

    #[error("page has no backing node and is not swappable")]
    NotSwappable,

    #[error("backing store failure: {0}")]
    Io(#[from] StoreError),

    #[error("protection violation at {address:#x} (write: {write})")]
    ProtectionViolation { address: u64, write: bool },

    #[error("address {address:#x} is outside of the page")]
    OutOfRange { address: u64 },

    #[error("invalid page range [{start:#x}, {end:#x})")]
    InvalidRange { start: u64, end: u64 },

    #[error("frame {0} is not free")]
    FrameUnavailable(FrameNumber),

    #[error("physical memory map contains no usable frames or overlapping regions")]
    InvalidMemoryMap,

    #[error("page was already destroyed")]
    PageDestroyed,

    #[error("invalid configuration: water marks are unordered or reclamation cannot make progress")]
    InvalidConfig,
}
