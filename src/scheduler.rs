// Copyright 2025 The Axvisor Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Round-robin scheduling of guests.
//!
//! One pass offers every unfinished guest a time slice of instructions. A guest is
//! launched with `VMENTER` the first time and continued with `VMRESUME` afterwards. Exits
//! are handled inside the slice; whatever is left of the quota is spent after resuming.

use crate::config::HypervisorConfig;
use crate::hypervisor::{ExitAction, Hypervisor};
use crate::instruction_emulator::SliceEnd;
use crate::virt::{GuestState, Mode};
use crate::HvResult;

/// Totals of a scheduling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub passes: u64,
    pub instructions: u64,
}

/// A round robin scheduler.
#[derive(Debug, Clone, Copy)]
pub struct RoundRobin {
    time_slice: u32,
}

impl RoundRobin {
    /// Create a new round robin scheduler. A zero time slice is raised to 1.
    pub fn new(time_slice: u32) -> Self {
        Self {
            time_slice: time_slice.max(1),
        }
    }

    pub fn from_config(config: &HypervisorConfig) -> Self {
        Self::new(config.time_slice)
    }

    pub fn time_slice(&self) -> u32 {
        self.time_slice
    }

    /// Schedule until every guest has stopped or been terminated.
    ///
    /// Never returns for a guest that runs forever; use [`RoundRobin::run_passes`] to bound
    /// the run.
    pub fn run(&self, hv: &mut Hypervisor) -> HvResult<ScheduleReport> {
        let mut report = ScheduleReport::default();
        while !hv.all_finished() {
            report.instructions += self.run_pass(hv)?;
            report.passes += 1;
        }
        hv.halted = true;
        info!(
            "[HV] all guests finished: {} passes, {} instructions",
            report.passes, report.instructions
        );
        Ok(report)
    }

    /// Schedule at most `max_passes` passes.
    pub fn run_passes(&self, hv: &mut Hypervisor, max_passes: u64) -> HvResult<ScheduleReport> {
        let mut report = ScheduleReport::default();
        while report.passes < max_passes && !hv.all_finished() {
            report.instructions += self.run_pass(hv)?;
            report.passes += 1;
        }
        if hv.all_finished() {
            hv.halted = true;
        }
        Ok(report)
    }

    /// Give every unfinished guest one time slice. Returns the instructions executed.
    pub fn run_pass(&self, hv: &mut Hypervisor) -> HvResult<u64> {
        let mut executed = 0u64;
        for guest_id in 0..hv.guest_count() as u32 {
            let Some(guest) = hv.guest(guest_id) else {
                continue;
            };
            if guest.is_finished() {
                continue;
            }
            executed += self.run_turn(hv, guest_id)? as u64;
            debug_assert_eq!(hv.mode(), Mode::Host);
        }
        hv.tick_count += 1;
        trace!("[HV] tick {}: {} instructions", hv.tick_count, executed);
        Ok(executed)
    }

    fn run_turn(&self, hv: &mut Hypervisor, guest_id: u32) -> HvResult<u32> {
        let launched = hv
            .guest(guest_id)
            .is_some_and(|guest| guest.vcpu().vmcs().is_launched());
        if launched {
            hv.vmresume(guest_id)?;
        } else {
            hv.vmenter(guest_id)?;
        }

        let mut remaining = self.time_slice;
        loop {
            let outcome = hv.run_slice(guest_id, remaining)?;
            remaining -= outcome.executed;
            let SliceEnd::Exited(_) = outcome.end else {
                break;
            };
            match hv.handle_exit(guest_id)? {
                ExitAction::Resume if remaining > 0 => hv.vmresume(guest_id)?,
                ExitAction::Resume => {
                    // Continued from the VMCS on its next turn.
                    if let Some(guest) = hv.guest_mut(guest_id) {
                        guest.vcpu_mut().state = GuestState::Paused;
                    }
                    break;
                }
                ExitAction::Terminate | ExitAction::Stop => break,
            }
        }
        Ok(self.time_slice - remaining)
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::from_config(&HypervisorConfig::default())
    }
}
