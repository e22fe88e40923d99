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

/// Kind of a physical memory region as reported at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// RAM that may be handed out by the frame allocator
    Usable,
    /// Firmware, kernel image, MMIO holes etc.
    Reserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub first_frame: u64,
    pub frame_count: u64,
    pub kind: RegionKind,
}

impl MemoryRegion {
    #[inline]
    pub const fn end_frame(&self) -> u64 {
        self.first_frame + self.frame_count
    }
}

/// Physical memory map as supplied by the boot loader
#[derive(Debug, Clone, Default)]
pub struct PhysicalMemoryMap {
    regions: Vec<MemoryRegion>,
}

impl PhysicalMemoryMap {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// A map with a single usable region `[0, frame_count)`
    pub fn with_usable_frames(frame_count: u64) -> Self {
        let mut map = Self::new();
        map.push(MemoryRegion {
            first_frame: 0,
            frame_count,
            kind: RegionKind::Usable,
        });
        map
    }

    pub fn push(&mut self, region: MemoryRegion) -> &mut Self {
        self.regions.push(region);
        self
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Returns the regions sorted by their first frame.
    ///
    /// Fails if regions overlap or if there are no usable frames at all.
    pub(crate) fn sorted_regions(&self) -> Result<Vec<MemoryRegion>, ()> {
        let mut regions: Vec<MemoryRegion> = self
            .regions
            .iter()
            .filter(|x| x.frame_count != 0)
            .copied()
            .collect();
        regions.sort_by_key(|x| x.first_frame);

        for pair in regions.windows(2) {
            if pair[0].end_frame() > pair[1].first_frame {
                return Err(());
            }
        }

        let usable: u64 = regions
            .iter()
            .filter(|x| x.kind == RegionKind::Usable)
            .map(|x| x.frame_count)
            .sum();

        if usable == 0 {
            return Err(());
        }

        Ok(regions)
    }
}
