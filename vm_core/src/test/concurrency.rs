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

use std::{
    sync::{Arc, Barrier},
    thread,
};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::{backed_by, gen_byte, get_test_vm, RecordingStore};
use crate::{
    modules::backing_store::{MemoryBackingStore, SwapSpace},
    Area, Protection, PAGE_SIZE,
};

#[test]
fn test_concurrent_faults_read_once() {
    const ROUNDS: usize = 32;

    let content: Vec<u8> = (0..ROUNDS * PAGE_SIZE).map(|i| gen_byte(i / PAGE_SIZE, i)).collect();
    let store = Arc::new(RecordingStore::from_bytes(content));
    let vm = get_test_vm(64, None);

    for round in 0..ROUNDS {
        let start = ((round + 1) * PAGE_SIZE) as u64;
        let page = vm
            .create_page(
                start,
                start + PAGE_SIZE as u64,
                backed_by(&store, (round * PAGE_SIZE) as u64),
                Protection::READ_WRITE,
                false,
            )
            .unwrap();
        let barrier = Barrier::new(2);

        let outcomes: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        let outcome = vm.fault(&page, start + 8, false).unwrap();

                        let mut buffer = vec![0u8; PAGE_SIZE];
                        page.read(&vm, start, &mut buffer).unwrap();
                        (outcome, buffer)
                    })
                })
                .collect();

            handles.into_iter().map(|x| x.join().unwrap()).collect()
        });

        let resolved = outcomes.iter().filter(|(x, _)| x.resolved).count();
        assert_eq!(resolved, 1);
        assert_eq!(outcomes[0].0.frame, outcomes[1].0.frame);
        assert_eq!(outcomes[0].1, outcomes[1].1);
        assert_eq!(outcomes[0].1[100], gen_byte(round, round * PAGE_SIZE + 100));

        assert_eq!(store.read_count(), round + 1);
    }
}

#[test]
fn test_concurrent_areas_under_pressure() {
    const THREADS: usize = 4;
    const PAGES: usize = 8;

    let swap = SwapSpace::new(
        Arc::new(MemoryBackingStore::new(THREADS * PAGES * PAGE_SIZE)),
        THREADS * PAGES,
    );
    let vm = get_test_vm(16, Some(swap.clone()));
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for thread_id in 0..THREADS {
            let vm = &vm;
            let barrier = &barrier;

            s.spawn(move || {
                let start = ((thread_id + 1) * 0x100000) as u64;
                let area = Area::new(
                    vm,
                    start,
                    start + (PAGES * PAGE_SIZE) as u64,
                    None,
                    Protection::READ_WRITE,
                    true,
                )
                .unwrap();
                let seed = |page: usize| thread_id * PAGES + page;

                barrier.wait();
                for page in 0..PAGES {
                    let data: Vec<u8> = (0..PAGE_SIZE).map(|i| gen_byte(seed(page), i)).collect();
                    area.write(vm, start + (page * PAGE_SIZE) as u64, &data).unwrap();
                }

                let mut rng = SmallRng::seed_from_u64(5446535461589659585 + thread_id as u64);
                let mut buffer = vec![0u8; PAGE_SIZE];
                for _ in 0..100 {
                    let page = rng.gen_range(0..PAGES);
                    area.read(vm, start + (page * PAGE_SIZE) as u64, &mut buffer).unwrap();

                    for (i, byte) in buffer.iter().enumerate() {
                        assert_eq!(*byte, gen_byte(seed(page), i));
                    }
                }

                area.destroy(vm).unwrap();
            });
        }
    });

    assert_eq!(vm.frames().available(), 16);
    assert_eq!(swap.used_slots(), 0);
}
