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

use crate::mem::{GUEST_PHYS_MEMORY_SIZE, GuestPhysAddr, GuestVirtAddr};
use crate::page_table::GuestPageTable;
use crate::regs::GeneralRegisters;
use crate::tlb::Tlb;
use crate::HvResult;

use super::{ExitCause, GuestState, Privilege, TrapConfig, Vmcs};

/// A virtual CPU within a guest.
///
/// The live architectural state. While the guest is not running, the authoritative copy
/// is the one in [`Vmcs`].
#[derive(Debug, Clone)]
pub struct VCpu {
    pub guest_id: u32,
    regs: GeneralRegisters,
    pub pc: u32,
    pub sp: u32,
    pub privilege: Privilege,
    guest_page_table: GuestPageTable,
    pub(crate) guest_page_table_root: u32,
    pub(crate) host_page_table_root: u32,
    pub(crate) vmcs: Vmcs,
    pub(crate) tlb: Tlb,
    pub state: GuestState,
    pub last_exit_cause: ExitCause,
    /// The active copy of the trap configuration.
    pub(crate) trap_config: TrapConfig,
}

impl VCpu {
    /// Create a new [`VCpu`] with an empty guest page table.
    pub fn new(guest_id: u32, tlb_capacity: usize) -> Self {
        let sp = (GUEST_PHYS_MEMORY_SIZE - 1) as u32;
        let vcpu = Self {
            guest_id,
            regs: GeneralRegisters::default(),
            pc: 0,
            sp,
            privilege: Privilege::User,
            guest_page_table: GuestPageTable::new(),
            guest_page_table_root: 0,
            host_page_table_root: 0,
            vmcs: Vmcs::new(guest_id, sp),
            tlb: Tlb::new(tlb_capacity),
            state: GuestState::Stopped,
            last_exit_cause: ExitCause::None,
            trap_config: TrapConfig::empty(),
        };
        debug!("[HV] created VCpu(guest: {}, vmcs: {})", guest_id, vcpu.vmcs.id);
        vcpu
    }

    pub fn regs(&self) -> &GeneralRegisters {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut GeneralRegisters {
        &mut self.regs
    }

    pub fn vmcs(&self) -> &Vmcs {
        &self.vmcs
    }

    pub fn vmcs_mut(&mut self) -> &mut Vmcs {
        &mut self.vmcs
    }

    pub fn guest_page_table(&self) -> &GuestPageTable {
        &self.guest_page_table
    }

    pub(crate) fn guest_page_table_mut(&mut self) -> &mut GuestPageTable {
        &mut self.guest_page_table
    }

    pub fn guest_page_table_root(&self) -> u32 {
        self.guest_page_table_root
    }

    pub fn host_page_table_root(&self) -> u32 {
        self.host_page_table_root
    }

    pub fn trap_config(&self) -> TrapConfig {
        self.trap_config
    }

    pub fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    pub fn tlb_entry_count(&self) -> usize {
        self.tlb.len()
    }

    pub fn tlb_valid(&self) -> bool {
        self.tlb.is_valid()
    }

    /// Map a guest-virtual page and drop any stale cached translation of it.
    pub fn map_page(&mut self, page: usize, frame: u32, writable: bool) -> HvResult {
        self.guest_page_table.map(page, frame, writable)?;
        self.tlb.invalidate_page(page);
        Ok(())
    }

    pub fn unmap_page(&mut self, page: usize) {
        self.guest_page_table.unmap(page);
        self.tlb.invalidate_page(page);
    }

    pub fn flush_tlb(&mut self) {
        self.tlb.flush();
    }

    /// Store the whole architectural state into the VMCS.
    pub fn save_to_vmcs(&mut self) {
        self.vmcs.regs = self.regs;
        self.vmcs.pc = self.pc;
        self.vmcs.sp = self.sp;
        self.vmcs.guest_privilege = self.privilege;
    }

    /// Load everything a first entry needs: registers, pc, sp, privilege, both page-table
    /// roots and the trap configuration.
    pub(crate) fn load_for_entry(&mut self) {
        self.load_for_resume();
        self.sp = self.vmcs.sp;
        if self.guest_page_table_root != self.vmcs.guest_page_table_root {
            self.tlb.flush();
        }
        self.guest_page_table_root = self.vmcs.guest_page_table_root;
        self.host_page_table_root = self.vmcs.host_page_table_root;
        self.trap_config = self.vmcs.trap_config;
    }

    /// Load the continuation state after a handled exit: registers, pc and privilege.
    pub(crate) fn load_for_resume(&mut self) {
        self.regs = self.vmcs.regs;
        self.pc = self.vmcs.pc;
        self.privilege = self.vmcs.guest_privilege;
    }

    /// Leave guest execution because of `cause`.
    ///
    /// The state is saved to the VMCS and the exit information fields are filled in.
    pub(crate) fn exit(
        &mut self,
        cause: ExitCause,
        qualification: u32,
        gla: Option<GuestVirtAddr>,
        gpa: Option<GuestPhysAddr>,
    ) {
        self.last_exit_cause = cause;
        self.state = GuestState::Blocked;
        self.save_to_vmcs();
        self.vmcs.record_exit(cause, qualification, gla, gpa);
    }

    /// Leave guest execution at the end of a time slice.
    pub(crate) fn preempt(&mut self) {
        self.state = GuestState::Paused;
        self.save_to_vmcs();
    }
}
