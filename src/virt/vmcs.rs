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

use bit_field::BitField;

use crate::mem::{GuestPhysAddr, GuestVirtAddr};
use crate::page_table::AccessKind;
use crate::regs::GeneralRegisters;

use super::{ExitCause, Privilege, TrapConfig};

bitflags::bitflags! {
    /// Control flags of a [`Vmcs`].
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct VmcsFlags: u32 {
        /// Set by the first successful `VMENTER`; later entries use `VMRESUME`.
        const LAUNCHED = 1 << 0;
    }
}

/// Virtual Machine Control Structure.
///
/// The save area of one vCPU. Every VM exit stores the complete guest state here, exit
/// handlers edit it, and `VMENTER`/`VMRESUME` load the vCPU from it.
#[derive(Debug, Clone)]
pub struct Vmcs {
    pub id: u32,
    pub regs: GeneralRegisters,
    pub pc: u32,
    pub sp: u32,
    pub flags: VmcsFlags,
    pub guest_page_table_root: u32,
    pub host_page_table_root: u32,
    pub guest_privilege: Privilege,
    pub exit_cause: ExitCause,
    /// Cause specific detail; a [`PageFaultQualification`] for page faults.
    pub exit_qualification: u32,
    /// Guest-virtual address of the last translation fault.
    pub guest_linear_address: Option<GuestVirtAddr>,
    /// Guest-physical address of the last EPT violation.
    pub guest_physical_address: Option<GuestPhysAddr>,
    pub trap_config: TrapConfig,
}

impl Vmcs {
    pub fn new(id: u32, sp: u32) -> Self {
        Self {
            id,
            regs: GeneralRegisters::default(),
            pc: 0,
            sp,
            flags: VmcsFlags::empty(),
            guest_page_table_root: 0,
            host_page_table_root: 0,
            guest_privilege: Privilege::User,
            exit_cause: ExitCause::None,
            exit_qualification: 0,
            guest_linear_address: None,
            guest_physical_address: None,
            trap_config: TrapConfig::empty(),
        }
    }

    pub fn is_launched(&self) -> bool {
        self.flags.contains(VmcsFlags::LAUNCHED)
    }

    /// Record the exit information fields.
    pub fn record_exit(
        &mut self,
        cause: ExitCause,
        qualification: u32,
        gla: Option<GuestVirtAddr>,
        gpa: Option<GuestPhysAddr>,
    ) {
        self.exit_cause = cause;
        self.exit_qualification = qualification;
        self.guest_linear_address = gla;
        self.guest_physical_address = gpa;
    }
}

/// Exit qualification of a `PageFault` exit.
///
/// Bits 0..=2 give the access (read, write, fetch) and bit 3 is set if the fault was
/// raised by the EPT rather than the guest page table. Bit 4 marks a `LOAD`/`STORE` operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFaultQualification(pub u32);

impl PageFaultQualification {
    const READ: usize = 0;
    const WRITE: usize = 1;
    const FETCH: usize = 2;
    const EPT: usize = 3;
    const DATA: usize = 4;

    pub fn new(access: AccessKind, ept: bool) -> Self {
        let mut bits = 0u32;
        let bit = match access {
            AccessKind::Read => Self::READ,
            AccessKind::Write => Self::WRITE,
            AccessKind::Fetch => Self::FETCH,
        };
        bits.set_bit(bit, true);
        bits.set_bit(Self::EPT, ept);
        Self(bits)
    }

    pub fn access(&self) -> AccessKind {
        if self.0.get_bit(Self::WRITE) {
            AccessKind::Write
        } else if self.0.get_bit(Self::FETCH) {
            AccessKind::Fetch
        } else {
            AccessKind::Read
        }
    }

    pub fn is_ept(&self) -> bool {
        self.0.get_bit(Self::EPT)
    }

    /// Mark the fault as raised by the memory operand of `LOAD` or `STORE`.
    pub fn with_data_access(mut self) -> Self {
        self.0.set_bit(Self::DATA, true);
        self
    }

    pub fn is_data_access(&self) -> bool {
        self.0.get_bit(Self::DATA)
    }
}
