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

use std::sync::Arc;

use crate::{
    modules::backing_store::BackingNode,
    page::{FaultOutcome, Page, Protection},
    util::is_page_aligned,
    VMCore, VMError, PAGE_SIZE,
};

/// A page aligned address range split into one page object per page.
///
/// Minimal stand-in for an address space region: owns its pages and
/// destroys them when it is torn down.
pub struct Area {
    start: u64,
    end: u64,
    pages: Vec<Arc<Page>>,
}

impl Area {
    /// Creates an area over `[start, end)`.
    ///
    /// If `backing` is set, page `i` maps the node at offset `i * PAGE_SIZE`.
    pub fn new(
        vm: &VMCore,
        start: u64,
        end: u64,
        backing: Option<BackingNode>,
        protection: Protection,
        swappable: bool,
    ) -> Result<Self, VMError> {
        if !is_page_aligned(start) || !is_page_aligned(end) || end <= start {
            return Err(VMError::InvalidRange { start, end });
        }

        let pages = (start..end)
            .step_by(PAGE_SIZE)
            .map(|page_start| {
                let backing = backing
                    .as_ref()
                    .map(|node| (node.clone(), page_start - start));
                vm.create_page(
                    page_start,
                    page_start + PAGE_SIZE as u64,
                    backing,
                    protection,
                    swappable,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { start, end, pages })
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.end
    }

    #[inline]
    pub fn pages(&self) -> &[Arc<Page>] {
        &self.pages
    }

    /// Page that contains `address`
    pub fn page_at(&self, address: u64) -> Result<&Arc<Page>, VMError> {
        if address < self.start || address >= self.end {
            return Err(VMError::OutOfRange { address });
        }

        Ok(&self.pages[((address - self.start) / PAGE_SIZE as u64) as usize])
    }

    pub fn fault(&self, vm: &VMCore, address: u64, write: bool) -> Result<FaultOutcome, VMError> {
        vm.fault(self.page_at(address)?, address, write)
    }

    /// Reads `dest.len()` bytes starting at `address`, the access may span multiple pages
    pub fn read(&self, vm: &VMCore, address: u64, dest: &mut [u8]) -> Result<(), VMError> {
        let mut done = 0;
        while done < dest.len() {
            let current = address + done as u64;
            let page = self.page_at(current)?;
            let len = ((page.end() - current) as usize).min(dest.len() - done);

            page.read(vm, current, &mut dest[done..done + len])?;
            done += len;
        }

        Ok(())
    }

    /// Writes `src` starting at `address`, the access may span multiple pages
    pub fn write(&self, vm: &VMCore, address: u64, src: &[u8]) -> Result<(), VMError> {
        let mut done = 0;
        while done < src.len() {
            let current = address + done as u64;
            let page = self.page_at(current)?;
            let len = ((page.end() - current) as usize).min(src.len() - done);

            page.write(vm, current, &src[done..done + len])?;
            done += len;
        }

        Ok(())
    }

    pub fn set_protection(&self, vm: &VMCore, protection: Protection) -> Result<(), VMError> {
        for page in self.pages.iter() {
            vm.set_protection(page, protection)?;
        }

        Ok(())
    }

    /// Flushes every dirty page, even if one of them fails to write back.
    ///
    /// Returns the first error.
    pub fn flush(&self, vm: &VMCore) -> Result<(), VMError> {
        let mut res = Ok(());
        for page in self.pages.iter() {
            if let Err(err) = vm.flush(page) {
                if res.is_ok() {
                    res = Err(err);
                }
            }
        }

        res
    }

    /// Destroys every page, even if one of them fails to write back its content.
    ///
    /// Returns the first error.
    pub fn destroy(self, vm: &VMCore) -> Result<(), VMError> {
        let mut res = Ok(());
        for page in self.pages.iter() {
            if let Err(err) = vm.destroy_page(page) {
                if res.is_ok() {
                    res = Err(err);
                }
            }
        }

        res
    }
}
