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

bitflags::bitflags! {
    /// Access rights of a page
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;

        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Protection {
    /// Every non empty protection allows reading
    #[inline]
    pub fn allows_read(&self) -> bool {
        !self.is_empty()
    }

    #[inline]
    pub fn allows_write(&self) -> bool {
        self.contains(Protection::WRITE)
    }
}

#[cfg(test)]
mod test {
    use super::Protection;

    #[test]
    fn test_protection_rights() {
        assert!(Protection::READ.allows_read());
        assert!(!Protection::READ.allows_write());
        assert!(Protection::READ_WRITE.allows_write());
        assert!(Protection::EXECUTE.allows_read());
        assert!(!Protection::empty().allows_read());
    }
}
