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
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, trace};

use crate::{util::lock, vm_core::VMCore};

#[derive(Default)]
struct WakeState {
    requested: bool,
    stopped: bool,
}

/// Wakes the background reclaimer before its interval elapsed
#[derive(Default)]
pub(crate) struct Wakeup {
    state: Mutex<WakeState>,
    condvar: Condvar,
}

impl Wakeup {
    pub(crate) fn notify(&self) {
        lock(&self.state).requested = true;
        self.condvar.notify_one();
    }

    fn stop(&self) {
        lock(&self.state).stopped = true;
        self.condvar.notify_all();
    }

    fn reset(&self) {
        *lock(&self.state) = WakeState::default();
    }

    /// Blocks until woken or `timeout` elapsed. Returns `false` once stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let mut state = lock(&self.state);
        if !state.requested && !state.stopped {
            state = match self.condvar.wait_timeout(state, timeout) {
                Ok((state, _)) => state,
                Err(err) => err.into_inner().0,
            };
        }

        state.requested = false;
        !state.stopped
    }
}

/// Thread that runs routine desperation 0 passes and scrubs free frames.
///
/// Runs every `background_interval` or as soon as the amount of free
/// frames drops below the low water mark.
pub struct BackgroundReclaimer {
    vm: Arc<VMCore>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundReclaimer {
    pub fn spawn(vm: Arc<VMCore>) -> std::io::Result<Self> {
        vm.wakeup().reset();

        let thread_vm = vm.clone();
        let handle = thread::Builder::new()
            .name("vm-reclaimer".into())
            .spawn(move || Self::run(thread_vm))?;

        debug!("Started background reclaimer");
        Ok(Self {
            vm,
            handle: Some(handle),
        })
    }

    fn run(vm: Arc<VMCore>) {
        let interval = vm.config().background_interval;
        let scrub_batch = vm.config().scrub_batch;

        while vm.wakeup().wait(interval) {
            match vm.reclaim(0) {
                Some(outcome) if outcome.reclaimed != 0 => {
                    debug!(
                        "Background pass reclaimed {} frames ({} flushed)",
                        outcome.reclaimed, outcome.flushed
                    )
                }
                Some(_) => {}
                None => trace!("Reclaimer busy, skipping background pass"),
            }

            vm.frames().scrub(scrub_batch);
        }
    }

    /// Signals the thread to finish and waits for it
    pub fn stop(mut self) {
        self.stop_internal();
    }

    fn stop_internal(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.vm.wakeup().stop();
            if handle.join().is_err() {
                log::error!("Background reclaimer panicked");
            }
            debug!("Stopped background reclaimer");
        }
    }
}

impl Drop for BackgroundReclaimer {
    fn drop(&mut self) {
        self.stop_internal();
    }
}
