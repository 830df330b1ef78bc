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

//! Hypervisor configuration.

/// Instructions a guest may execute per scheduling turn unless configured otherwise.
pub const DEFAULT_TIME_SLICE: u32 = 10_000;

const DEFAULT_TLB_CAPACITY: usize = 8;

/// How a translation table is populated when a guest is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MappingPolicy {
    /// Every page backed by guest RAM is mapped 1:1, present and writable.
    #[default]
    Identity,
    /// The table starts empty; faults are resolved by mapping the page on demand.
    OnDemand,
}

/// What the engine does with an out-of-range register operand or a zero divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandPolicy {
    /// Skip the instruction without any exit.
    Skip,
    /// Exit with `IllegalInstruction` or `DivideError`. Both are fatal to the guest.
    Trap,
}

impl Default for OperandPolicy {
    fn default() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(feature = "strict-operands")] {
                OperandPolicy::Trap
            } else {
                OperandPolicy::Skip
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HypervisorConfig {
    /// Instruction quota of one scheduling turn. Must be at least 1.
    pub time_slice: u32,
    /// First stage (guest page table) population.
    pub guest_mapping: MappingPolicy,
    /// Second stage (EPT) population.
    pub ept_mapping: MappingPolicy,
    pub operand_policy: OperandPolicy,
    /// Entries of each vCPU's TLB.
    pub tlb_capacity: usize,
}

impl HypervisorConfig {
    pub fn with_time_slice(time_slice: u32) -> Self {
        Self {
            time_slice,
            ..Self::default()
        }
    }
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            time_slice: DEFAULT_TIME_SLICE,
            guest_mapping: MappingPolicy::default(),
            ept_mapping: MappingPolicy::default(),
            operand_policy: OperandPolicy::default(),
            tlb_capacity: DEFAULT_TLB_CAPACITY,
        }
    }
}
