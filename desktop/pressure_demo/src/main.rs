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


use std::{sync::Arc, time::Instant};

use env_logger::{Builder, Env};
use rand::{rngs::SmallRng, Rng, RngCore, SeedableRng};
use vm_core::{
    modules::{
        backing_store::{FileBackingStore, SwapSpace},
        frame_allocator::PhysicalMemoryMap,
        reclaimer::BackgroundReclaimer,
    },
    Area, Protection, VMConfig, VMCore, PAGE_SIZE,
};

const SEED: u64 = 5446535461589659585;
const FRAME_COUNT: u64 = 32;
const PAGE_COUNT: usize = 96;
const ACCESS_COUNT: usize = 20_000;
const AREA_START: u64 = 0x4000_0000;

fn main() {
    Builder::from_env(Env::default())
        .filter_level(log::LevelFilter::Warn)
        .format_module_path(false)
        .init();

    let swap_store = Arc::new(
        FileBackingStore::create(
            "/tmp/vm_core_pressure_demo.swap",
            (PAGE_COUNT * PAGE_SIZE) as u64,
        )
        .unwrap(),
    );
    let swap = SwapSpace::new(swap_store, PAGE_COUNT);

    let config = VMConfig {
        low_water_frames: 4,
        high_water_frames: 8,
        ..Default::default()
    };
    let vm = Arc::new(
        VMCore::new(
            config,
            &PhysicalMemoryMap::with_usable_frames(FRAME_COUNT),
            Some(swap.clone()),
        )
        .unwrap(),
    );
    let reclaimer = BackgroundReclaimer::spawn(vm.clone()).unwrap();

    let area = Area::new(
        &vm,
        AREA_START,
        AREA_START + (PAGE_COUNT * PAGE_SIZE) as u64,
        None,
        Protection::READ_WRITE,
        true,
    )
    .unwrap();

    println!(
        "{} pages on top of {} frames ({} KiB of RAM)",
        PAGE_COUNT,
        FRAME_COUNT,
        FRAME_COUNT as usize * PAGE_SIZE / 1024
    );

    let mut rand = SmallRng::seed_from_u64(SEED);
    let mut shadow = vec![0u8; PAGE_COUNT * PAGE_SIZE];
    let start_time = Instant::now();

    for _ in 0..ACCESS_COUNT {
        let page = rand.gen_range(0..PAGE_COUNT);
        let offset = page * PAGE_SIZE + rand.gen_range(0..PAGE_SIZE - 8);
        let address = AREA_START + offset as u64;

        if rand.gen_bool(0.3) {
            let data = rand.next_u64().to_le_bytes();
            area.write(&vm, address, &data).unwrap();
            shadow[offset..offset + data.len()].copy_from_slice(&data);
        } else {
            let mut data = [0u8; 8];
            area.read(&vm, address, &mut data).unwrap();
            assert_eq!(&data[..], &shadow[offset..offset + 8], "content mismatch at {:#x}", address);
        }
    }

    let mut content = vec![0u8; shadow.len()];
    area.read(&vm, AREA_START, &mut content).unwrap();
    assert_eq!(content, shadow, "content mismatch after random accesses");

    println!(
        "{} accesses verified in {} ms",
        ACCESS_COUNT,
        start_time.elapsed().as_millis()
    );

    reclaimer.stop();

    let stats = vm.frames().stats();
    println!("frames: {:?}", stats);
    println!("swap slots in use: {}/{}", swap.used_slots(), swap.slot_count());

    area.destroy(&vm).unwrap();
    println!("swap slots in use after teardown: {}", swap.used_slots());
}
