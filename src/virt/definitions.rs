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

numeric_enum_macro::numeric_enum! {
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
/// Opcodes of the guest ISA. The values are part of the image format.
pub enum Opcode {
    Add = 0x01,
    Sub = 0x02,
    Mul = 0x03,
    Div = 0x04,
    Mov = 0x05,
    Load = 0x06,
    Store = 0x07,
    Jmp = 0x08,
    Jeq = 0x09,
    Jne = 0x0A,
    Call = 0x0B,
    Ret = 0x0C,
    Movi = 0x0D,
    Addi = 0x0E,
    Subi = 0x0F,
    Muli = 0x10,
    Divi = 0x11,
    Syscall = 0x20,
    Hypercall = 0x21,
    VmEnter = 0x30,
    VmResume = 0x31,
    VmCause = 0x32,
    VmTrapCfg = 0x33,
    LdPgtr = 0x34,
    LdHptr = 0x35,
    TlbFlushV = 0x36,
    Halt = 0xFF,
}
}

impl Opcode {
    /// Virtualization and page-table control opcodes; a guest executing one always exits.
    pub const fn is_privileged(self) -> bool {
        matches!(
            self,
            Self::VmEnter
                | Self::VmResume
                | Self::VmCause
                | Self::VmTrapCfg
                | Self::LdPgtr
                | Self::LdHptr
                | Self::TlbFlushV
        )
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mov => "MOV",
            Self::Load => "LOAD",
            Self::Store => "STORE",
            Self::Jmp => "JMP",
            Self::Jeq => "JEQ",
            Self::Jne => "JNE",
            Self::Call => "CALL",
            Self::Ret => "RET",
            Self::Movi => "MOVI",
            Self::Addi => "ADDI",
            Self::Subi => "SUBI",
            Self::Muli => "MULI",
            Self::Divi => "DIVI",
            Self::Syscall => "SYSCALL",
            Self::Hypercall => "HYPERCALL",
            Self::VmEnter => "VMENTER",
            Self::VmResume => "VMRESUME",
            Self::VmCause => "VMCAUSE",
            Self::VmTrapCfg => "VMTRAPCFG",
            Self::LdPgtr => "LDPGTR",
            Self::LdHptr => "LDHPTR",
            Self::TlbFlushV => "TLBFLUSHV",
            Self::Halt => "HALT",
        }
    }
}

numeric_enum_macro::numeric_enum! {
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
/// Reasons for a VM exit.
pub enum ExitCause {
    /// No exit has happened since the last entry.
    #[default]
    None = 0x00,
    IllegalInstruction = 0x01,
    PrivilegedInstruction = 0x02,
    Syscall = 0x03,
    /// Reserved for a preemption timer; never raised by the engine.
    Timer = 0x04,
    PageFault = 0x05,
    IoInstruction = 0x06,
    Hypercall = 0x07,
    /// Division by zero under the strict operand policy.
    DivideError = 0x08,
}
}

numeric_enum_macro::numeric_enum! {
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
/// Hypercall numbers, passed in the `rd` field of `HYPERCALL`.
pub enum HypercallNr {
    Print = 1,
    ReadMem = 2,
    WriteMem = 3,
    Exit = 4,
}
}

bitflags::bitflags! {
    /// Conditions selected by `VMTRAPCFG` that the host wants to intercept.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TrapConfig: u32 {
        /// Emulate privileged instructions (`TLBFLUSHV`) executed by the guest.
        const PRIVILEGED_INSTR = 1 << 0;
        /// Emulate guest writes of the page-table roots (`LDPGTR`, `LDHPTR`).
        const PGTBL_ROOT_WRITE = 1 << 1;
        /// Intercept I/O instructions.
        const IO_INSTR = 1 << 2;
        /// Exit on data page faults instead of skipping the faulting access.
        const PAGE_FAULT = 1 << 3;
    }
}

/// The host-wide execution mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Mode {
    #[default]
    Host,
    Guest,
}

numeric_enum_macro::numeric_enum! {
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
/// Privilege level of a vCPU.
pub enum Privilege {
    #[default]
    User = 0,
    Kernel = 1,
}
}

numeric_enum_macro::numeric_enum! {
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
/// Scheduling state of a guest.
pub enum GuestState {
    /// Halted or exited by hypercall.
    #[default]
    Stopped = 0,
    Running = 1,
    /// Exited to the host and waiting for the exit to be handled.
    Blocked = 2,
    /// Preempted at the end of its time slice.
    Paused = 3,
}
}
