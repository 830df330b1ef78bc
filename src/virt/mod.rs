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

//! Virtualization structures: ISA definitions, the VMCS, the vCPU and the privileged
//! instruction handlers.

mod definitions;
mod instructions;
mod vcpu;
mod vmcs;

pub use definitions::{ExitCause, GuestState, HypercallNr, Mode, Opcode, Privilege, TrapConfig};
pub use vcpu::VCpu;
pub use vmcs::{PageFaultQualification, Vmcs, VmcsFlags};
