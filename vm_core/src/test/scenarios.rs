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

use std::{sync::Arc, thread, time::Duration};

use super::{gen_byte, get_test_vm, init_test_logger, RecordingStore};
use crate::{
    modules::{
        backing_store::{
            test::get_test_file_path, BackingStore, FileBackingStore, MemoryBackingStore,
            SwapSpace,
        },
        frame_allocator::{FrameState, PhysicalMemoryMap},
    },
    Area, PageState, Protection, VMConfig, VMCore, VMError, PAGE_SIZE,
};

#[test]
fn test_area_cross_page_access() {
    let vm = get_test_vm(16, None);
    let area = Area::new(&vm, 0x10000, 0x14000, None, Protection::READ_WRITE, true).unwrap();
    assert_eq!(area.pages().len(), 4);

    let data: Vec<u8> = (0..100).map(|i| gen_byte(0, i)).collect();
    area.write(&vm, 0x10FF0, &data).unwrap();

    let mut buffer = vec![0u8; 100];
    area.read(&vm, 0x10FF0, &mut buffer).unwrap();
    assert_eq!(buffer, data);

    let pages = area.pages();
    assert!(pages[0].is_dirty() && pages[1].is_dirty());
    assert_eq!(pages[2].state(), PageState::Unmapped);
    assert_eq!(vm.frames().available(), 14);

    assert!(matches!(
        area.page_at(0x14000),
        Err(VMError::OutOfRange { address: 0x14000 })
    ));
    assert!(matches!(
        area.write(&vm, 0x13FFF, &[1, 2]),
        Err(VMError::OutOfRange { address: 0x14000 })
    ));
}

#[test]
fn test_area_invalid_range() {
    let vm = get_test_vm(16, None);
    for (start, end) in [(0x10001, 0x12000), (0x10000, 0x10800), (0x12000, 0x10000)] {
        assert!(matches!(
            Area::new(&vm, start, end, None, Protection::READ_WRITE, true),
            Err(VMError::InvalidRange { .. })
        ));
    }
}

#[test]
fn test_area_protection() {
    let vm = get_test_vm(16, None);
    let area = Area::new(&vm, 0x10000, 0x12000, None, Protection::READ, true).unwrap();

    assert!(matches!(
        area.fault(&vm, 0x11000, true),
        Err(VMError::ProtectionViolation { .. })
    ));
    assert!(area.fault(&vm, 0x11000, false).unwrap().resolved);

    area.set_protection(&vm, Protection::READ_WRITE).unwrap();
    area.write(&vm, 0x11000, &[1]).unwrap();
    assert_eq!(area.pages()[1].protection(), Protection::READ_WRITE);
}

#[test]
fn test_area_destroy_writes_back_every_page() {
    let store = Arc::new(RecordingStore::new(4 * PAGE_SIZE));
    let vm = get_test_vm(16, None);
    let area = Area::new(
        &vm,
        0x10000,
        0x14000,
        Some(store.clone()),
        Protection::READ_WRITE,
        false,
    )
    .unwrap();

    for page in 0..4 {
        let data: Vec<u8> = (0..PAGE_SIZE).map(|i| gen_byte(page, i)).collect();
        area.write(&vm, 0x10000 + (page * PAGE_SIZE) as u64, &data).unwrap();
    }
    assert_eq!(vm.frames().available(), 12);

    area.destroy(&vm).unwrap();
    assert_eq!(vm.frames().available(), 16);
    assert_eq!(store.writes().len(), 4);

    let contents = store.contents();
    for page in 0..4 {
        for i in 0..PAGE_SIZE {
            assert_eq!(contents[page * PAGE_SIZE + i], gen_byte(page, i));
        }
    }
}

#[test]
fn test_area_flush_continues_after_failure() {
    let swap = SwapSpace::new(Arc::new(MemoryBackingStore::new(PAGE_SIZE)), 1);
    let vm = get_test_vm(4, Some(swap.clone()));
    let area = Area::new(&vm, 0x10000, 0x12000, None, Protection::READ_WRITE, true).unwrap();

    // the second page takes the only slot
    area.write(&vm, 0x11000, &[1]).unwrap();
    vm.flush(&area.pages()[1]).unwrap();
    assert_eq!(swap.used_slots(), 1);

    area.write(&vm, 0x10000, &[2]).unwrap();
    area.write(&vm, 0x11000, &[3]).unwrap();
    assert!(area.pages()[1].is_dirty());

    assert!(matches!(area.flush(&vm), Err(VMError::SwapExhausted)));
    assert!(area.pages()[0].is_dirty());
    assert!(!area.pages()[1].is_dirty());

    area.destroy(&vm).unwrap();
    assert_eq!(swap.used_slots(), 0);
}

#[test]
fn test_file_backed_mapping() {
    let store = Arc::new(
        FileBackingStore::create(get_test_file_path("file_backed_mapping"), 3 * PAGE_SIZE as u64)
            .unwrap(),
    );
    let vm = get_test_vm(16, None);

    let area = Area::new(
        &vm,
        0x20000,
        0x23000,
        Some(store.clone()),
        Protection::READ_WRITE,
        false,
    )
    .unwrap();
    area.write(&vm, 0x21000, b"hello world").unwrap();
    area.flush(&vm).unwrap();

    let mut buffer = [0u8; 11];
    assert_eq!(store.read_range(PAGE_SIZE as u64, &mut buffer).unwrap(), 11);
    assert_eq!(&buffer, b"hello world");
    area.destroy(&vm).unwrap();

    // a new mapping of the same node sees the data
    let area = Area::new(
        &vm,
        0x40000,
        0x43000,
        Some(store.clone()),
        Protection::READ,
        false,
    )
    .unwrap();

    let mut buffer = [0xFFu8; 16];
    area.read(&vm, 0x41000, &mut buffer).unwrap();
    assert_eq!(&buffer[..11], b"hello world");
    assert_eq!(&buffer[11..], &[0; 5]);
    area.destroy(&vm).unwrap();
}

#[test]
fn test_reservations_hold_back_frames() {
    let vm = get_test_vm(4, None);
    let page = vm
        .create_page(0x1000, 0x2000, None, Protection::READ_WRITE, true)
        .unwrap();

    let reservation = vm.frames().reserve(4).unwrap();
    assert_eq!(vm.frames().allocatable(), 0);
    assert!(matches!(
        vm.fault(&page, 0x1000, false),
        Err(VMError::OutOfMemory)
    ));
    drop(reservation);

    // allocating through the reservation does not charge the capacity twice
    let mut reservation = vm.frames().reserve(2).unwrap();
    let frame = reservation.allocate(FrameState::Wired).unwrap();
    assert_eq!(reservation.remaining(), 1);
    assert_eq!(vm.frames().stats().reserved_capacity, 1);
    assert_eq!(vm.frames().allocatable(), 2);

    assert!(vm.fault(&page, 0x1000, false).unwrap().resolved);
    assert_eq!(vm.frames().allocatable(), 1);

    drop(reservation);
    assert_eq!(vm.frames().allocatable(), 2);
    vm.frames().free_page(frame);
}

#[test]
fn test_core_rejects_invalid_setup() {
    init_test_logger();

    let config = VMConfig {
        low_water_frames: 10,
        high_water_frames: 4,
        ..Default::default()
    };
    assert!(matches!(
        VMCore::new(config, &PhysicalMemoryMap::with_usable_frames(16), None),
        Err(VMError::InvalidConfig)
    ));

    assert!(matches!(
        VMCore::new(VMConfig::default(), &PhysicalMemoryMap::new(), None),
        Err(VMError::InvalidMemoryMap)
    ));
}

#[test]
fn test_anonymous_memory_starts_zeroed() {
    let vm = get_test_vm(4, None);

    // leave garbage in a frame and give it back
    let page = vm
        .create_page(0x1000, 0x2000, None, Protection::READ_WRITE, false)
        .unwrap();
    page.write(&vm, 0x1000, &[0xEE; PAGE_SIZE]).unwrap();
    vm.destroy_page(&page).unwrap();

    for i in 0..4u64 {
        let start = 0x10000 + i * PAGE_SIZE as u64;
        let page = vm
            .create_page(start, start + PAGE_SIZE as u64, None, Protection::READ, false)
            .unwrap();

        let mut buffer = vec![0xFFu8; PAGE_SIZE];
        page.read(&vm, start, &mut buffer).unwrap();
        assert!(buffer.iter().all(|x| *x == 0));
        vm.destroy_page(&page).unwrap();
    }
}

#[test]
fn test_scrubbed_frames_skip_zero_fill() {
    let vm = get_test_vm(4, None);
    assert_eq!(vm.frames().scrub(4), 4);
    assert_eq!(vm.frames().stats().clear, 4);

    let page = vm
        .create_page(0x1000, 0x2000, None, Protection::READ_WRITE, true)
        .unwrap();
    let frame = vm.fault(&page, 0x1000, false).unwrap().frame;
    assert_eq!(vm.frames().stats().clear, 3);
    assert_eq!(vm.frames().state_of(frame), FrameState::Active);
    assert!(vm.frames().frame_bytes(frame).iter().all(|x| *x == 0));
}

#[test]
fn test_fault_waits_for_running_scrub() {
    let vm = Arc::new(get_test_vm(1, None));
    let (index, frame) = vm.frames().begin_scrub().unwrap();
    assert_eq!(vm.frames().scrubbing(), 1);
    assert_eq!(vm.frames().allocatable(), 0);

    let page = vm
        .create_page(0x1000, 0x2000, None, Protection::READ_WRITE, true)
        .unwrap();

    let scrubber = {
        let vm = vm.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            vm.frames().frame_bytes(frame).fill(0);
            vm.frames().finish_scrub(index);
        })
    };

    // no other frame could be reclaimed, the fault has to wait for the scrubbed one
    let outcome = vm.fault(&page, 0x1000, false).unwrap();
    scrubber.join().unwrap();

    assert_eq!(outcome.frame, frame);
    assert_eq!(vm.frames().scrubbing(), 0);
    assert_eq!(vm.frames().stats().clear, 0);
    vm.destroy_page(&page).unwrap();
}

#[cfg(feature = "serde")]
#[test]
fn test_outcome_serialization() {
    use crate::modules::reclaimer::ReclaimOutcome;

    let vm = get_test_vm(4, None);
    let outcome = vm.reclaim(1).unwrap();

    let json = serde_json::to_string(&outcome).unwrap();
    let restored: ReclaimOutcome = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, outcome);
    assert!(json.contains("\"desperation\":1"));
}
