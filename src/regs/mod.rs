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

//! The general-purpose register file of a vCPU.

mod diff;

pub use diff::GeneralRegistersDiff;

use crate::mem::REGISTER_COUNT;

/// General-purpose registers `r0`..`r31`, all 32 bits wide.
///
/// By convention `r0` carries hypercall return values and `r1`/`r2` carry hypercall
/// arguments. The stack pointer is not part of this file; it lives in the vCPU.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GeneralRegisters {
    regs: [u32; REGISTER_COUNT],
}

impl GeneralRegisters {
    /// The names of the general purpose registers, in index order.
    pub const REGISTER_NAMES: [&'static str; REGISTER_COUNT] = [
        "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "r13",
        "r14", "r15", "r16", "r17", "r18", "r19", "r20", "r21", "r22", "r23", "r24", "r25", "r26",
        "r27", "r28", "r29", "r30", "r31",
    ];

    /// Returns the name of the register at the given index.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of range.
    pub const fn register_name(index: u8) -> &'static str {
        Self::REGISTER_NAMES[index as usize]
    }

    /// Returns whether `index` names a register.
    pub const fn is_valid_index(index: u8) -> bool {
        (index as usize) < REGISTER_COUNT
    }

    /// Returns the value of the register at `index`, or `None` if there is no such register.
    pub fn get(&self, index: u8) -> Option<u32> {
        self.regs.get(index as usize).copied()
    }

    /// Sets the register at `index`. Returns `false` if there is no such register.
    pub fn set(&mut self, index: u8, value: u32) -> bool {
        match self.regs.get_mut(index as usize) {
            Some(reg) => {
                *reg = value;
                true
            }
            None => false,
        }
    }

    /// Returns the value of the general purpose register at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`REGISTER_COUNT`].
    pub fn get_reg_of_index(&self, index: u8) -> u32 {
        match self.get(index) {
            Some(value) => value,
            None => panic!("Illegal index of GeneralRegisters: {}", index),
        }
    }

    /// Sets the value of the general purpose register at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`REGISTER_COUNT`].
    pub fn set_reg_of_index(&mut self, index: u8, value: u32) {
        if !self.set(index, value) {
            panic!("Illegal index of GeneralRegisters: {}", index);
        }
    }

    pub fn as_array(&self) -> &[u32; REGISTER_COUNT] {
        &self.regs
    }
}

impl From<[u32; REGISTER_COUNT]> for GeneralRegisters {
    fn from(regs: [u32; REGISTER_COUNT]) -> Self {
        Self { regs }
    }
}
