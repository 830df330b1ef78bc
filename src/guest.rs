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

use crate::config::{HypervisorConfig, MappingPolicy};
use crate::ept::ExtendedPageTable;
use crate::mem::{GUEST_PHYS_PAGES, GuestMemory};
use crate::virt::{GuestState, VCpu};
use crate::HvResult;

/// A guest virtual machine: one vCPU, its RAM and its extended page table.
///
/// The unit of scheduling. A guest lives until the hypervisor is torn down.
#[derive(Debug)]
pub struct GuestVm {
    vm_id: u32,
    vcpu: VCpu,
    memory: GuestMemory,
    ept: ExtendedPageTable,
    pub(crate) instruction_count: u64,
    pub(crate) terminated: bool,
}

impl GuestVm {
    /// Create a guest whose RAM is preloaded with `image`.
    pub(crate) fn new(vm_id: u32, image: &[u8], config: &HypervisorConfig) -> HvResult<Self> {
        let mut memory = GuestMemory::new();
        let loaded = memory.load_image(image);
        if loaded < image.len() {
            warn!(
                "[HV] guest {} image truncated from {} to {} bytes",
                vm_id,
                image.len(),
                loaded
            );
        }

        let mut vcpu = VCpu::new(vm_id, config.tlb_capacity);
        // Ready to be launched by the scheduler.
        vcpu.state = GuestState::Paused;
        if config.guest_mapping == MappingPolicy::Identity {
            for page in 0..GUEST_PHYS_PAGES {
                vcpu.map_page(page, page as u32, true)?;
            }
        }
        let ept = match config.ept_mapping {
            MappingPolicy::Identity => ExtendedPageTable::identity(),
            MappingPolicy::OnDemand => ExtendedPageTable::new(),
        };

        Ok(Self {
            vm_id,
            vcpu,
            memory,
            ept,
            instruction_count: 0,
            terminated: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.vm_id
    }

    pub fn vcpu(&self) -> &VCpu {
        &self.vcpu
    }

    pub fn vcpu_mut(&mut self) -> &mut VCpu {
        &mut self.vcpu
    }

    pub fn memory(&self) -> &GuestMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut GuestMemory {
        &mut self.memory
    }

    pub fn ept(&self) -> &ExtendedPageTable {
        &self.ept
    }

    pub fn ept_mut(&mut self) -> &mut ExtendedPageTable {
        &mut self.ept
    }

    pub fn state(&self) -> GuestState {
        self.vcpu.state
    }

    /// Instructions executed so far, including the one that caused each exit.
    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Whether the guest was killed by a fatal exit.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// A finished guest is never scheduled again.
    pub fn is_finished(&self) -> bool {
        self.terminated || self.vcpu.state == GuestState::Stopped
    }
}
