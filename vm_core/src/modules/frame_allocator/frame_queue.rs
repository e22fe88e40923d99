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

use super::frame::Frame;

/// Links of a frame inside of the queue of its current state
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct QueueLink {
    prev: Option<usize>,
    next: Option<usize>,
    queued: bool,
}

/// Doubly linked list of frames.
///
/// The links are stored inside of the frames themselves (addressed by their index
/// in the frame table), so moving a frame between queues never allocates.
#[derive(Debug, Default)]
pub(crate) struct FrameQueue {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl FrameQueue {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends the frame at `index` to the end of this queue.
    ///
    /// The frame must not be part of any queue.
    pub(crate) fn push_back(&mut self, frames: &mut [Frame], index: usize) {
        debug_assert!(!frames[index].link.queued, "frame is already queued");

        frames[index].link = QueueLink {
            prev: self.tail,
            next: None,
            queued: true,
        };

        match self.tail {
            Some(tail) => frames[tail].link.next = Some(index),
            None => self.head = Some(index),
        }

        self.tail = Some(index);
        self.len += 1;
    }

    /// Removes the frame at `index` from this queue.
    ///
    /// The frame has to be part of this queue.
    pub(crate) fn remove(&mut self, frames: &mut [Frame], index: usize) {
        let link = frames[index].link;
        debug_assert!(link.queued, "frame is not queued");

        match link.prev {
            Some(prev) => frames[prev].link.next = link.next,
            None => self.head = link.next,
        }

        match link.next {
            Some(next) => frames[next].link.prev = link.prev,
            None => self.tail = link.prev,
        }

        frames[index].link = QueueLink::default();
        self.len -= 1;
    }

    pub(crate) fn pop_front(&mut self, frames: &mut [Frame]) -> Option<usize> {
        let head = self.head?;
        self.remove(frames, head);
        Some(head)
    }

    /// Returns the indices of this queue from head to tail
    pub(crate) fn iter<'a>(&self, frames: &'a [Frame]) -> Iter<'a> {
        Iter {
            frames,
            curr: self.head,
        }
    }
}

pub(crate) struct Iter<'a> {
    frames: &'a [Frame],
    curr: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let curr = self.curr?;
        self.curr = self.frames[curr].link.next;
        Some(curr)
    }
}

#[cfg(test)]
mod test {
    use super::FrameQueue;
    use crate::modules::frame_allocator::frame::{Frame, FrameNumber, FrameState};

    fn frames(count: u64) -> Vec<Frame> {
        (0..count)
            .map(|i| Frame::new(FrameNumber(i), FrameState::Free))
            .collect()
    }

    #[test]
    fn test_queue_push_remove() {
        let mut frames = frames(5);
        let mut queue = FrameQueue::new();

        for i in 0..5 {
            queue.push_back(&mut frames, i);
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.iter(&frames).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);

        // head, middle and tail
        queue.remove(&mut frames, 0);
        queue.remove(&mut frames, 2);
        queue.remove(&mut frames, 4);
        assert_eq!(queue.iter(&frames).collect::<Vec<_>>(), vec![1, 3]);

        queue.push_back(&mut frames, 2);
        assert_eq!(queue.iter(&frames).collect::<Vec<_>>(), vec![1, 3, 2]);

        assert_eq!(queue.pop_front(&mut frames), Some(1));
        assert_eq!(queue.pop_front(&mut frames), Some(3));
        assert_eq!(queue.pop_front(&mut frames), Some(2));
        assert_eq!(queue.pop_front(&mut frames), None);
        assert!(queue.is_empty());
    }
}
