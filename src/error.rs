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

use thiserror::Error;

use crate::mem::{GuestPhysAddr, GuestVirtAddr, HostPhysAddr};

/// Errors reported by the hypervisor core.
///
/// Translation errors are kept apart so that callers can tell an address that can never
/// be valid from a page that is merely not mapped yet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HvError {
    #[error("guest virtual address {0:?} is out of range")]
    AddressOutOfRange(GuestVirtAddr),
    #[error("page not present for {0:?}")]
    PageNotPresent(GuestVirtAddr),
    #[error("EPT violation at {0:?}")]
    EptViolation(GuestPhysAddr),
    #[error("write to read-only page at {0:?}")]
    WriteProtected(GuestVirtAddr),
    #[error("{0:?} lies outside guest memory")]
    HostAddressOutOfRange(HostPhysAddr),
    #[error("cannot map page {page} to frame {frame}")]
    InvalidMapping { page: usize, frame: usize },

    #[error("guest capacity exceeded (max {0} guests)")]
    GuestCapacityExceeded(usize),
    #[error("failed to load guest image {path}: {reason}")]
    ImageLoadFailed { path: String, reason: String },
    #[error("guest image is empty")]
    ImageEmpty,

    #[error("illegal instruction (opcode {0:#04x})")]
    IllegalInstruction(u8),
    #[error("privileged instruction (opcode {0:#04x})")]
    PrivilegedInstruction(u8),
    #[error("unknown hypercall {0}")]
    UnknownHypercall(u32),

    #[error("VMCS {0} is not associated with any guest")]
    UnknownVmcs(u32),
    #[error("guest {0} does not exist")]
    InvalidGuest(u32),
    #[error("operation is only valid in host mode")]
    NotInHostMode,
    #[error("no guest is selected")]
    NoActiveGuest,
}

/// A specialized [`Result`] type for the hypervisor core.
pub type HvResult<T = ()> = Result<T, HvError>;
