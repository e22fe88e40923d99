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

use super::div_ceil;

/// Fixed size list of bits
pub(crate) struct BitArray {
    arr: Box<[u8]>,
    len: usize,
}

impl BitArray {
    pub(crate) fn new(len: usize) -> Self {
        BitArray {
            arr: vec![0u8; div_ceil(len, 8)].into_boxed_slice(),
            len,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn set(&mut self, value: bool, index: usize) {
        debug_assert!(index < self.len);
        let arr_index = index / 8;
        let internal_index = index % 8;

        let item = &mut self.arr[arr_index];
        if value {
            // set bit
            *item |= 1u8 << internal_index;
        } else {
            // unset bit
            *item &= !(1u8 << internal_index);
        }
    }

    pub(crate) fn is_set(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        let arr_index = index / 8;
        let internal_index = index % 8;

        let item = self.arr[arr_index];
        (item & (1u8 << internal_index)) != 0
    }

    /// Returns the index of the first bit that is not set
    pub(crate) fn first_unset(&self) -> Option<usize> {
        for (arr_index, item) in self.arr.iter().enumerate() {
            if *item == u8::MAX {
                continue;
            }

            let index = arr_index * 8 + item.trailing_ones() as usize;
            if index < self.len {
                return Some(index);
            }
        }

        None
    }

    pub(crate) fn count_set(&self) -> usize {
        self.arr.iter().map(|x| x.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod test {
    use super::BitArray;

    #[test]
    fn test_bit_array() {
        let mut arr = BitArray::new(11);
        assert_eq!(arr.len(), 11);
        assert_eq!(arr.first_unset(), Some(0));

        for i in 0..10 {
            arr.set(true, i);
        }
        assert_eq!(arr.first_unset(), Some(10));
        assert_eq!(arr.count_set(), 10);

        arr.set(true, 10);
        assert_eq!(arr.first_unset(), None);

        arr.set(false, 3);
        assert!(!arr.is_set(3));
        assert!(arr.is_set(4));
        assert_eq!(arr.first_unset(), Some(3));
        assert_eq!(arr.count_set(), 10);
    }
}
