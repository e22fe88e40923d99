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

mod area;
mod error;
mod page;
mod util;
mod vm_config;
mod vm_core;

#[cfg(test)]
mod test;

pub mod modules;

pub use crate::area::Area;
pub use crate::error::VMError;
pub use crate::page::{FaultOutcome, Page, PageId, PageState, Protection};
pub use crate::vm_core::VMCore;
pub use vm_config::VMConfig;

/// Size of one frame and of one virtual page in bytes
pub const PAGE_SIZE: usize = 4096;

static_assertions::const_assert!(PAGE_SIZE.is_power_of_two());
