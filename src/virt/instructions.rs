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

//! Privileged ISA operations executed by the host.
//!
//! All of them are only valid in host mode. A failed operation is logged and leaves every
//! piece of hypervisor and guest state untouched.

use crate::guest::GuestVm;
use crate::hypervisor::Hypervisor;
use crate::{HvError, HvResult};

use super::{ExitCause, GuestState, Mode, TrapConfig, VmcsFlags};

impl Hypervisor {
    /// `VMENTER`: launch the guest owning VMCS `vmcs_id`.
    ///
    /// Loads the complete guest state from the VMCS, including the stack pointer, both
    /// page-table roots and the trap configuration.
    pub fn vmenter(&mut self, vmcs_id: u32) -> HvResult {
        self.check_host_mode("VMENTER")?;
        let guest = self.guest_of_vmcs(vmcs_id, "VMENTER")?;
        let vcpu = guest.vcpu_mut();
        vcpu.load_for_entry();
        vcpu.vmcs.flags.insert(VmcsFlags::LAUNCHED);
        vcpu.last_exit_cause = ExitCause::None;
        vcpu.state = GuestState::Running;
        debug!(
            "[ISA:VMENTER] guest {} pc {:#x} sp {:#x} {:?}",
            vcpu.guest_id, vcpu.pc, vcpu.sp, vcpu.privilege
        );

        self.mode = Mode::Guest;
        self.current_guest_id = Some(vmcs_id);
        Ok(())
    }

    /// `VMRESUME`: continue the guest owning VMCS `vmcs_id` after a handled exit.
    ///
    /// Only registers, pc and privilege are loaded from the VMCS.
    pub fn vmresume(&mut self, vmcs_id: u32) -> HvResult {
        self.check_host_mode("VMRESUME")?;
        let guest = self.guest_of_vmcs(vmcs_id, "VMRESUME")?;
        let vcpu = guest.vcpu_mut();
        vcpu.load_for_resume();
        vcpu.last_exit_cause = ExitCause::None;
        vcpu.state = GuestState::Running;
        trace!("[ISA:VMRESUME] guest {} pc {:#x}", vcpu.guest_id, vcpu.pc);

        self.mode = Mode::Guest;
        self.current_guest_id = Some(vmcs_id);
        Ok(())
    }

    /// `VMCAUSE`: the last exit cause of the current guest.
    ///
    /// Returns [`ExitCause::None`] outside host mode or without a current guest.
    pub fn vmcause(&self) -> ExitCause {
        if self.mode != Mode::Host {
            return ExitCause::None;
        }
        self.current_guest_id
            .and_then(|id| self.guest(id))
            .map_or(ExitCause::None, |guest| guest.vcpu().last_exit_cause)
    }

    /// `VMTRAPCFG`: select the conditions that exit the current guest.
    pub fn vmtrapcfg(&mut self, config: TrapConfig) -> HvResult {
        let vcpu = self.current_guest_mut("VMTRAPCFG")?.vcpu_mut();
        vcpu.trap_config = config;
        vcpu.vmcs.trap_config = config;
        debug!("[ISA:VMTRAPCFG] guest {} {:?}", vcpu.guest_id, config);
        Ok(())
    }

    /// `LDPGTR`: set the guest page-table root of the current guest. Flushes its TLB.
    pub fn ldpgtr(&mut self, root: u32) -> HvResult {
        let vcpu = self.current_guest_mut("LDPGTR")?.vcpu_mut();
        vcpu.guest_page_table_root = root;
        vcpu.vmcs.guest_page_table_root = root;
        vcpu.flush_tlb();
        debug!("[ISA:LDPGTR] guest {} root {:#x}", vcpu.guest_id, root);
        Ok(())
    }

    /// `LDHPTR`: set the host page-table root of the current guest.
    pub fn ldhptr(&mut self, root: u32) -> HvResult {
        let vcpu = self.current_guest_mut("LDHPTR")?.vcpu_mut();
        vcpu.host_page_table_root = root;
        vcpu.vmcs.host_page_table_root = root;
        debug!("[ISA:LDHPTR] guest {} root {:#x}", vcpu.guest_id, root);
        Ok(())
    }

    /// `TLBFLUSHV`: drop every cached translation of the current guest.
    pub fn tlbflushv(&mut self) -> HvResult {
        let vcpu = self.current_guest_mut("TLBFLUSHV")?.vcpu_mut();
        vcpu.flush_tlb();
        debug!("[ISA:TLBFLUSHV] guest {}", vcpu.guest_id);
        Ok(())
    }
}

// private implements
impl Hypervisor {
    fn check_host_mode(&self, op: &str) -> HvResult {
        if self.mode != Mode::Host {
            warn!("[ISA:{}] not in host mode", op);
            return Err(HvError::NotInHostMode);
        }
        Ok(())
    }

    fn guest_of_vmcs(&mut self, vmcs_id: u32, op: &str) -> HvResult<&mut GuestVm> {
        let Some(guest) = self
            .guests
            .iter_mut()
            .find(|g| g.vcpu().vmcs().id == vmcs_id)
        else {
            warn!("[ISA:{}] unknown VMCS {}", op, vmcs_id);
            return Err(HvError::UnknownVmcs(vmcs_id));
        };
        if guest.is_terminated() {
            warn!("[ISA:{}] guest {} was terminated", op, guest.id());
            return Err(HvError::InvalidGuest(guest.id()));
        }
        Ok(guest)
    }

    fn current_guest_mut(&mut self, op: &str) -> HvResult<&mut GuestVm> {
        self.check_host_mode(op)?;
        let Some(guest) = self
            .current_guest_id
            .and_then(|id| self.guests.get_mut(id as usize))
        else {
            warn!("[ISA:{}] no current guest", op);
            return Err(HvError::NoActiveGuest);
        };
        Ok(guest)
    }
}
