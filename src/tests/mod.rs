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

//! Unit tests for the visa_hv crate.

mod general_registers;
mod hypercall;
mod translation;

use crate::instruction_emulator::Instruction;
use crate::virt::Opcode;
use crate::{Hypervisor, HypervisorConfig};

/// Encode `(opcode, rd, rs1, rs2)` records into a flat guest image.
pub(crate) fn assemble(program: &[(Opcode, u8, u8, u8)]) -> Vec<u8> {
    program
        .iter()
        .flat_map(|&(op, rd, rs1, rs2)| Instruction::new(op, rd, rs1, rs2).to_bytes())
        .collect()
}

/// A hypervisor with one guest running `program`, already entered.
pub(crate) fn entered_guest(config: HypervisorConfig, program: &[(Opcode, u8, u8, u8)]) -> Hypervisor {
    let mut hv = Hypervisor::new(config);
    let id = hv.create_guest_from_image(&assemble(program)).unwrap();
    hv.vmenter(id).unwrap();
    hv
}
