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

use alloc::string::String;

use crate::mem::GuestVirtAddr;
use crate::virt::{ExitCause, HypercallNr};

/// Observable outcomes of guest execution, collected by the hypervisor and drained by
/// whoever renders them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmEvent {
    GuestCreated { guest_id: u32, image_size: usize },
    /// Text produced by a `PRINT` hypercall.
    GuestOutput { guest_id: u32, message: String },
    VmExit { guest_id: u32, cause: ExitCause, qualification: u32 },
    /// A fault was resolved by mapping `page` (guest-virtual, or guest-physical when `ept`).
    DemandMapped { guest_id: u32, page: usize, ept: bool },
    UnknownHypercall { guest_id: u32, nr: u32 },
    /// The guest buffer of a hypercall could not be translated; `r0` was set to 0.
    HypercallFailed { guest_id: u32, nr: HypercallNr },
    /// A trapped `LOAD`/`STORE` to `gva` had no page to back it and was skipped.
    AccessSkipped { guest_id: u32, gva: GuestVirtAddr },
    GuestHalted { guest_id: u32 },
    GuestTerminated { guest_id: u32, cause: ExitCause },
}

impl VmEvent {
    pub fn guest_id(&self) -> u32 {
        match *self {
            Self::GuestCreated { guest_id, .. }
            | Self::GuestOutput { guest_id, .. }
            | Self::VmExit { guest_id, .. }
            | Self::DemandMapped { guest_id, .. }
            | Self::UnknownHypercall { guest_id, .. }
            | Self::HypercallFailed { guest_id, .. }
            | Self::AccessSkipped { guest_id, .. }
            | Self::GuestHalted { guest_id }
            | Self::GuestTerminated { guest_id, .. } => guest_id,
        }
    }
}
