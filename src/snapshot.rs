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

use alloc::vec::Vec;

use crate::guest::GuestVm;
use crate::regs::GeneralRegisters;
use crate::virt::{ExitCause, GuestState, Mode, Privilege, TrapConfig};

/// A read-only copy of the hypervisor state, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypervisorSnapshot {
    pub mode: Mode,
    pub current_guest_id: Option<u32>,
    pub guest_count: usize,
    pub tick_count: u64,
    pub halted: bool,
    pub guests: Vec<GuestSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestSnapshot {
    pub id: u32,
    pub state: GuestState,
    pub terminated: bool,
    pub pc: u32,
    pub sp: u32,
    pub privilege: Privilege,
    pub guest_page_table_root: u32,
    pub host_page_table_root: u32,
    pub trap_config: TrapConfig,
    pub last_exit_cause: ExitCause,
    pub instruction_count: u64,
    pub registers: GeneralRegisters,
    pub tlb_entry_count: usize,
    pub tlb_valid: bool,
}

impl GuestSnapshot {
    pub fn of(guest: &GuestVm) -> Self {
        let vcpu = guest.vcpu();
        Self {
            id: guest.id(),
            state: guest.state(),
            terminated: guest.is_terminated(),
            pc: vcpu.pc,
            sp: vcpu.sp,
            privilege: vcpu.privilege,
            guest_page_table_root: vcpu.guest_page_table_root(),
            host_page_table_root: vcpu.host_page_table_root(),
            trap_config: vcpu.trap_config(),
            last_exit_cause: vcpu.last_exit_cause,
            instruction_count: guest.instruction_count(),
            registers: *vcpu.regs(),
            tlb_entry_count: vcpu.tlb_entry_count(),
            tlb_valid: vcpu.tlb_valid(),
        }
    }
}
