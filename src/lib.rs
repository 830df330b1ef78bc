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

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![doc = include_str!("../README.md")]

#[macro_use]
extern crate log;

extern crate alloc;

mod config;
mod error;
mod events;
mod guest;
mod hypervisor;
#[cfg(feature = "std")]
mod image;
mod instruction_emulator;
mod mem;
mod scheduler;
mod snapshot;
mod tlb;
mod translate;

pub mod ept;
pub mod page_table;
pub mod regs;
pub mod virt;

#[cfg(test)]
mod tests;

pub use config::{DEFAULT_TIME_SLICE, HypervisorConfig, MappingPolicy, OperandPolicy};
pub use error::{HvError, HvResult};
pub use events::VmEvent;
pub use guest::GuestVm;
pub use hypervisor::{ExitAction, HostPageTableEntry, Hypervisor};
#[cfg(feature = "std")]
pub use image::load_image_file;
pub use instruction_emulator::{Instruction, InstructionEngine, SliceEnd, SliceOutcome};
pub use mem::{
    GUEST_PHYS_MEMORY_SIZE, GUEST_VIRT_MEMORY_SIZE, GuestMemory, GuestPhysAddr, GuestVirtAddr,
    HOST_MEMORY_SIZE, HostPhysAddr, INSTRUCTION_SIZE, MAX_GUESTS, PAGE_SIZE, REGISTER_COUNT,
};
pub use regs::{GeneralRegisters, GeneralRegistersDiff};
pub use scheduler::{RoundRobin, ScheduleReport};
pub use snapshot::{GuestSnapshot, HypervisorSnapshot};
pub use tlb::{Tlb, TlbEntry};
pub use translate::{
    read_guest_bytes, translate, translate_guest_physical, translate_guest_virtual,
    translate_guest_virtual_access, write_guest_bytes,
};
pub use virt::{
    ExitCause, GuestState, HypercallNr, Mode, Opcode, PageFaultQualification, Privilege,
    TrapConfig, VCpu, Vmcs, VmcsFlags,
};
