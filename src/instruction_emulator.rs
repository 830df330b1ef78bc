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

//! Fetch-decode-execute engine for the guest ISA.
//!
//! Every instruction is a 4-byte record `{opcode, rd, rs1, rs2}`. Immediate forms carry
//! their 8-bit immediate in the `rs2` byte. The program counter is advanced before the
//! instruction executes, so branch targets and return addresses see the advanced value.

use bit_field::BitField;

use crate::config::OperandPolicy;
use crate::guest::GuestVm;
use crate::mem::{GuestVirtAddr, INSTRUCTION_SIZE};
use crate::page_table::AccessKind;
use crate::regs::{GeneralRegisters, GeneralRegistersDiff};
use crate::translate::{read_guest_u8, translate, write_guest_u8};
use crate::virt::{ExitCause, GuestState, Opcode, PageFaultQualification, TrapConfig};
use crate::HvError;

/// A decoded instruction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
}

impl Instruction {
    pub const fn new(opcode: Opcode, rd: u8, rs1: u8, rs2: u8) -> Self {
        Self {
            opcode: opcode as u8,
            rd,
            rs1,
            rs2,
        }
    }

    /// Parse an instruction from its in-memory bytes.
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            opcode: bytes[0],
            rd: bytes[1],
            rs1: bytes[2],
            rs2: bytes[3],
        }
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        [self.opcode, self.rd, self.rs1, self.rs2]
    }

    /// Unpack an instruction word, opcode in the most significant byte.
    pub fn from_word(word: u32) -> Self {
        Self {
            opcode: word.get_bits(24..32) as u8,
            rd: word.get_bits(16..24) as u8,
            rs1: word.get_bits(8..16) as u8,
            rs2: word.get_bits(0..8) as u8,
        }
    }

    /// Pack into an instruction word; the form stored in exit qualifications.
    pub fn to_word(self) -> u32 {
        let mut word = 0u32;
        word.set_bits(24..32, self.opcode as u32);
        word.set_bits(16..24, self.rd as u32);
        word.set_bits(8..16, self.rs1 as u32);
        word.set_bits(0..8, self.rs2 as u32);
        word
    }

    /// The known opcode, or the raw byte if there is none.
    pub fn decode(&self) -> Result<Opcode, u8> {
        Opcode::try_from(self.opcode)
    }

    /// The 8-bit immediate of the immediate forms.
    pub const fn imm(&self) -> u32 {
        self.rs2 as u32
    }
}

/// Why a time slice ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceEnd {
    /// The instruction quota is used up; the guest can continue.
    QuotaExhausted,
    /// The guest executed `HALT`.
    Halted,
    /// The guest exited to the host.
    Exited(ExitCause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceOutcome {
    /// Instructions executed during the slice.
    pub executed: u32,
    pub end: SliceEnd,
}

enum Step {
    Continue,
    Halted,
    Exited(ExitCause),
}

/// Executes guest instructions on one [`GuestVm`] at a time.
#[derive(Debug, Clone, Copy)]
pub struct InstructionEngine {
    operand_policy: OperandPolicy,
}

impl InstructionEngine {
    pub const fn new(operand_policy: OperandPolicy) -> Self {
        Self { operand_policy }
    }

    /// Run `guest` for at most `quota` instructions.
    ///
    /// On an exit the guest is `Blocked` and its state is saved in the VMCS; on `HALT` it
    /// is `Stopped`. An exhausted quota leaves it `Running`.
    pub fn run(&self, guest: &mut GuestVm, quota: u32) -> SliceOutcome {
        let mut executed = 0;
        while executed < quota {
            let before = guest.instruction_count;
            let step = self.step(guest);
            executed += (guest.instruction_count - before) as u32;
            match step {
                Step::Continue => {}
                Step::Halted => {
                    return SliceOutcome {
                        executed,
                        end: SliceEnd::Halted,
                    };
                }
                Step::Exited(cause) => {
                    return SliceOutcome {
                        executed,
                        end: SliceEnd::Exited(cause),
                    };
                }
            }
        }
        SliceOutcome {
            executed,
            end: SliceEnd::QuotaExhausted,
        }
    }

    /// Fetch, decode and execute one instruction.
    ///
    /// Faulting fetches and rewound instructions are not counted; they run again once the
    /// fault has been resolved.
    fn step(&self, guest: &mut GuestVm) -> Step {
        let pc = guest.vcpu().pc;
        let pc_gva = GuestVirtAddr::from_usize(pc as usize);

        if pc as usize % INSTRUCTION_SIZE != 0 {
            warn!("guest {} misaligned pc {:#x}", guest.id(), pc);
            guest
                .vcpu_mut()
                .exit(ExitCause::IllegalInstruction, pc, Some(pc_gva), None);
            return Step::Exited(ExitCause::IllegalInstruction);
        }

        let fetched = translate(guest, pc_gva, AccessKind::Fetch)
            .and_then(|hpa| guest.memory().read_word(hpa));
        let instr = match fetched {
            Ok(bytes) => Instruction::from_bytes(bytes),
            Err(e) => return self.fault(guest, pc_gva, AccessKind::Fetch, e, false),
        };

        guest.vcpu_mut().pc = pc.wrapping_add(INSTRUCTION_SIZE as u32);
        let old_regs = *guest.vcpu().regs();
        let step = self.execute(guest, instr, pc);
        if !matches!(step, Step::Exited(ExitCause::PageFault)) {
            guest.instruction_count += 1;
        }

        if log::log_enabled!(log::Level::Trace) {
            let diff = GeneralRegistersDiff::new(old_regs, *guest.vcpu().regs());
            trace!("guest {} {:#06x}: {:x?} {:?}", guest.id(), pc, instr, diff);
        }
        step
    }

    fn execute(&self, guest: &mut GuestVm, instr: Instruction, pc: u32) -> Step {
        let opcode = match instr.decode() {
            Ok(opcode) => opcode,
            Err(raw) => {
                warn!("guest {} illegal opcode {:#04x} at {:#x}", guest.id(), raw, pc);
                return Self::exit(guest, ExitCause::IllegalInstruction, instr.to_word());
            }
        };
        let regs = *guest.vcpu().regs();
        match opcode {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                let (Some(a), Some(b)) = (regs.get(instr.rs1), regs.get(instr.rs2)) else {
                    return self.invalid_operand(guest, instr);
                };
                if !GeneralRegisters::is_valid_index(instr.rd) {
                    return self.invalid_operand(guest, instr);
                }
                self.alu(guest, opcode, instr, a, b)
            }
            Opcode::Addi | Opcode::Subi | Opcode::Muli | Opcode::Divi => {
                let Some(a) = regs.get(instr.rs1) else {
                    return self.invalid_operand(guest, instr);
                };
                if !GeneralRegisters::is_valid_index(instr.rd) {
                    return self.invalid_operand(guest, instr);
                }
                self.alu(guest, opcode, instr, a, instr.imm())
            }
            Opcode::Movi => self.write_reg(guest, instr, instr.rd, instr.imm()),
            Opcode::Mov => match regs.get(instr.rs1) {
                Some(value) => self.write_reg(guest, instr, instr.rd, value),
                None => self.invalid_operand(guest, instr),
            },
            Opcode::Load => {
                let Some(addr) = regs.get(instr.rs1) else {
                    return self.invalid_operand(guest, instr);
                };
                if !GeneralRegisters::is_valid_index(instr.rd) {
                    return self.invalid_operand(guest, instr);
                }
                let gva = GuestVirtAddr::from_usize(addr as usize);
                match read_guest_u8(guest, gva) {
                    Ok(byte) => self.write_reg(guest, instr, instr.rd, byte as u32),
                    Err(e) => self.data_fault(guest, gva, AccessKind::Read, e, pc),
                }
            }
            Opcode::Store => {
                let (Some(addr), Some(value)) = (regs.get(instr.rs1), regs.get(instr.rs2)) else {
                    return self.invalid_operand(guest, instr);
                };
                let gva = GuestVirtAddr::from_usize(addr as usize);
                match write_guest_u8(guest, gva, value.get_bits(0..8) as u8) {
                    Ok(()) => Step::Continue,
                    Err(e) => self.data_fault(guest, gva, AccessKind::Write, e, pc),
                }
            }
            Opcode::Jmp => {
                guest.vcpu_mut().pc = Self::target_of(instr.rd);
                Step::Continue
            }
            Opcode::Jeq | Opcode::Jne => {
                let (Some(a), Some(b)) = (regs.get(instr.rs1), regs.get(instr.rs2)) else {
                    return self.invalid_operand(guest, instr);
                };
                if (a == b) == (opcode == Opcode::Jeq) {
                    guest.vcpu_mut().pc = Self::target_of(instr.rd);
                }
                Step::Continue
            }
            Opcode::Call => {
                // An immediate target is an instruction index, a register target a byte address.
                let target = if instr.rd != 0 {
                    Self::target_of(instr.rd)
                } else {
                    match regs.get(instr.rs1) {
                        Some(addr) => addr,
                        None => return self.invalid_operand(guest, instr),
                    }
                };
                self.call(guest, target, pc)
            }
            Opcode::Ret => self.ret(guest, pc),
            Opcode::Syscall => Self::exit(guest, ExitCause::Syscall, instr.rd as u32),
            Opcode::Hypercall => Self::exit(guest, ExitCause::Hypercall, instr.rd as u32),
            Opcode::Halt => {
                let vcpu = guest.vcpu_mut();
                vcpu.state = GuestState::Stopped;
                vcpu.save_to_vmcs();
                Step::Halted
            }
            Opcode::VmEnter
            | Opcode::VmResume
            | Opcode::VmCause
            | Opcode::VmTrapCfg
            | Opcode::LdPgtr
            | Opcode::LdHptr
            | Opcode::TlbFlushV => {
                debug!("guest {} privileged {} at {:#x}", guest.id(), opcode.mnemonic(), pc);
                Self::exit(guest, ExitCause::PrivilegedInstruction, instr.to_word())
            }
        }
    }

    fn alu(&self, guest: &mut GuestVm, opcode: Opcode, instr: Instruction, a: u32, b: u32) -> Step {
        let value = match opcode {
            Opcode::Add | Opcode::Addi => a.wrapping_add(b),
            Opcode::Sub | Opcode::Subi => a.wrapping_sub(b),
            Opcode::Mul | Opcode::Muli => a.wrapping_mul(b),
            _ => match a.checked_div(b) {
                Some(q) => q,
                None => return self.divide_by_zero(guest, instr),
            },
        };
        self.write_reg(guest, instr, instr.rd, value)
    }

    fn write_reg(&self, guest: &mut GuestVm, instr: Instruction, rd: u8, value: u32) -> Step {
        if guest.vcpu_mut().regs_mut().set(rd, value) {
            Step::Continue
        } else {
            self.invalid_operand(guest, instr)
        }
    }

    /// Push the return address below `sp` (big-endian) and jump.
    fn call(&self, guest: &mut GuestVm, target: u32, pc: u32) -> Step {
        let ret_addr = guest.vcpu().pc;
        let sp = guest.vcpu().sp;
        let base = sp.wrapping_sub(3);
        for (i, byte) in ret_addr.to_be_bytes().into_iter().enumerate() {
            let gva = GuestVirtAddr::from_usize(base.wrapping_add(i as u32) as usize);
            if let Err(e) = write_guest_u8(guest, gva, byte) {
                return self.stack_fault(guest, gva, AccessKind::Write, e, pc);
            }
        }
        let vcpu = guest.vcpu_mut();
        vcpu.sp = sp.wrapping_sub(INSTRUCTION_SIZE as u32);
        vcpu.pc = target;
        Step::Continue
    }

    /// Pop the return address pushed by the matching `CALL`.
    fn ret(&self, guest: &mut GuestVm, pc: u32) -> Step {
        let saved_sp = guest.vcpu().sp.wrapping_add(INSTRUCTION_SIZE as u32);
        let base = saved_sp.wrapping_sub(3);
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let gva = GuestVirtAddr::from_usize(base.wrapping_add(i as u32) as usize);
            match read_guest_u8(guest, gva) {
                Ok(b) => *byte = b,
                Err(e) => return self.stack_fault(guest, gva, AccessKind::Read, e, pc),
            }
        }
        let vcpu = guest.vcpu_mut();
        vcpu.pc = u32::from_be_bytes(bytes);
        vcpu.sp = saved_sp;
        Step::Continue
    }

    const fn target_of(index: u8) -> u32 {
        index as u32 * INSTRUCTION_SIZE as u32
    }

    fn exit(guest: &mut GuestVm, cause: ExitCause, qualification: u32) -> Step {
        guest.vcpu_mut().exit(cause, qualification, None, None);
        Step::Exited(cause)
    }

    /// Exit with `PageFault` for a failed translation of `gva`.
    ///
    /// The instruction is rewound by the caller where it has to run again.
    fn fault(
        &self,
        guest: &mut GuestVm,
        gva: GuestVirtAddr,
        access: AccessKind,
        err: HvError,
        data: bool,
    ) -> Step {
        let (gpa, ept) = match err {
            HvError::EptViolation(gpa) => (Some(gpa), true),
            _ => (None, false),
        };
        debug!("guest {} page fault at {:?}: {}", guest.id(), gva, err);
        let mut qualification = PageFaultQualification::new(access, ept);
        if data {
            qualification = qualification.with_data_access();
        }
        let qualification = qualification.0;
        guest
            .vcpu_mut()
            .exit(ExitCause::PageFault, qualification, Some(gva), gpa);
        Step::Exited(ExitCause::PageFault)
    }

    /// A LOAD/STORE translation failure: skipped unless the host traps page faults.
    fn data_fault(
        &self,
        guest: &mut GuestVm,
        gva: GuestVirtAddr,
        access: AccessKind,
        err: HvError,
        pc: u32,
    ) -> Step {
        if guest.vcpu().trap_config().contains(TrapConfig::PAGE_FAULT) {
            guest.vcpu_mut().pc = pc;
            self.fault(guest, gva, access, err, true)
        } else {
            trace!("guest {} {:?} at {:?} skipped: {}", guest.id(), access, gva, err);
            Step::Continue
        }
    }

    /// A fault that always exits, with the pc rewound to the faulting instruction.
    fn stack_fault(
        &self,
        guest: &mut GuestVm,
        gva: GuestVirtAddr,
        access: AccessKind,
        err: HvError,
        pc: u32,
    ) -> Step {
        guest.vcpu_mut().pc = pc;
        self.fault(guest, gva, access, err, false)
    }

    fn invalid_operand(&self, guest: &mut GuestVm, instr: Instruction) -> Step {
        match self.operand_policy {
            OperandPolicy::Skip => {
                trace!("guest {} {:x?}: register operand out of range", guest.id(), instr);
                Step::Continue
            }
            OperandPolicy::Trap => Self::exit(guest, ExitCause::IllegalInstruction, instr.to_word()),
        }
    }

    fn divide_by_zero(&self, guest: &mut GuestVm, instr: Instruction) -> Step {
        match self.operand_policy {
            OperandPolicy::Skip => {
                trace!("guest {} {:x?}: division by zero", guest.id(), instr);
                Step::Continue
            }
            OperandPolicy::Trap => Self::exit(guest, ExitCause::DivideError, instr.to_word()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_word_layout() {
        let instr = Instruction::new(Opcode::Addi, 3, 4, 0x7f);
        assert_eq!(instr.to_word(), 0x0e03_047f);
        assert_eq!(Instruction::from_word(0x0e03_047f), instr);
    }

    #[test]
    fn test_decode_unknown_opcode() {
        let instr = Instruction::from_bytes([0x42, 0, 0, 0]);
        assert_eq!(instr.decode(), Err(0x42));
        assert_eq!(
            Instruction::from_bytes([0xff, 0, 0, 0]).decode(),
            Ok(Opcode::Halt)
        );
    }

    #[test]
    fn test_immediate_in_rs2_byte() {
        let instr = Instruction::from_bytes([0x0d, 1, 0, 200]);
        assert_eq!(instr.decode(), Ok(Opcode::Movi));
        assert_eq!(instr.imm(), 200);
    }
}
