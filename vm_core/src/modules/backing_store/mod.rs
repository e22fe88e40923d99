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

mod file_store;
mod memory_store;
mod swap;

use std::sync::Arc;

use thiserror::Error;

pub use file_store::FileBackingStore;
pub use memory_store::MemoryBackingStore;
pub use swap::{SwapSlot, SwapSpace};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("access [{offset}, {offset} + {len}) is out of bounds")]
    OutOfBounds { offset: u64, len: usize },

    #[error("{0}")]
    Failed(&'static str),
}

/// Persistent storage or swap area that backs the content of pages.
///
/// Implementations may block the calling thread for the duration of the I/O.
pub trait BackingStore: Send + Sync {
    /// Reads the region `[offset, offset + dest.len())` into `dest`.
    ///
    /// Returns how many bytes were read. This is less than `dest.len()` if the
    /// node ends before, in that case the rest of `dest` is left untouched.
    fn read_range(&self, offset: u64, dest: &mut [u8]) -> Result<usize, StoreError>;

    /// Writes `src` back to the region `[offset, offset + src.len())`
    fn write_range(&self, offset: u64, src: &[u8]) -> Result<(), StoreError>;
}

/// Shared handle to a backing node, it outlives every page that maps it
pub type BackingNode = Arc<dyn BackingStore>;
