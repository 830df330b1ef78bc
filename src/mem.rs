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

//! Address types, ISA memory constants and the guest RAM backing store.

use alloc::{boxed::Box, vec};

use memory_addr::{def_usize_addr, def_usize_addr_formatter};

use crate::{HvError, HvResult};

pub use memory_addr::PAGE_SIZE_4K as PAGE_SIZE;

/// Number of general-purpose registers of a vCPU.
pub const REGISTER_COUNT: usize = 32;
/// Size of the hypervisor's own memory.
pub const HOST_MEMORY_SIZE: usize = 64 * 1024;
/// Size of the guest-virtual address space.
pub const GUEST_VIRT_MEMORY_SIZE: usize = 4 * 1024 * 1024;
/// Size of the guest-physical memory (RAM) of one guest.
pub const GUEST_PHYS_MEMORY_SIZE: usize = 16 * 1024;
/// Maximum number of guests a hypervisor can host.
pub const MAX_GUESTS: usize = 4;
/// Every instruction is a fixed 4-byte record.
pub const INSTRUCTION_SIZE: usize = 4;

pub(crate) const GUEST_VIRT_PAGES: usize = GUEST_VIRT_MEMORY_SIZE / PAGE_SIZE;
pub(crate) const GUEST_PHYS_PAGES: usize = GUEST_PHYS_MEMORY_SIZE / PAGE_SIZE;
pub(crate) const HOST_PAGES: usize = HOST_MEMORY_SIZE / PAGE_SIZE;

def_usize_addr! {
    /// Guest virtual address.
    pub type GuestVirtAddr;
    /// Guest physical address.
    pub type GuestPhysAddr;
    /// Host physical address, an offset into the frames backing a guest.
    pub type HostPhysAddr;
}

def_usize_addr_formatter! {
    GuestVirtAddr = "GVA:{}";
    GuestPhysAddr = "GPA:{}";
    HostPhysAddr = "HPA:{}";
}

/// The host frames backing the physical memory of one guest.
///
/// The memory is zero-filled on creation and lives as long as the guest does.
#[derive(Clone)]
pub struct GuestMemory {
    bytes: Box<[u8]>,
}

impl GuestMemory {
    /// Allocate zeroed guest RAM of [`GUEST_PHYS_MEMORY_SIZE`] bytes.
    pub fn new() -> Self {
        Self {
            bytes: vec![0u8; GUEST_PHYS_MEMORY_SIZE].into_boxed_slice(),
        }
    }

    /// Copy `image` to offset 0, truncated to the memory size.
    ///
    /// Returns the number of bytes actually loaded.
    pub fn load_image(&mut self, image: &[u8]) -> usize {
        let len = image.len().min(self.bytes.len());
        self.bytes[..len].copy_from_slice(&image[..len]);
        len
    }

    /// Number of 4K frames backing this memory.
    pub const fn frame_count(&self) -> usize {
        GUEST_PHYS_PAGES
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn read_u8(&self, hpa: HostPhysAddr) -> HvResult<u8> {
        self.bytes
            .get(hpa.as_usize())
            .copied()
            .ok_or(HvError::HostAddressOutOfRange(hpa))
    }

    pub fn write_u8(&mut self, hpa: HostPhysAddr, val: u8) -> HvResult {
        let byte = self
            .bytes
            .get_mut(hpa.as_usize())
            .ok_or(HvError::HostAddressOutOfRange(hpa))?;
        *byte = val;
        Ok(())
    }

    /// Read four consecutive bytes starting at `hpa`.
    pub fn read_word(&self, hpa: HostPhysAddr) -> HvResult<[u8; 4]> {
        let start = hpa.as_usize();
        self.bytes
            .get(start..start + 4)
            .and_then(|s| s.try_into().ok())
            .ok_or(HvError::HostAddressOutOfRange(hpa))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for GuestMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for GuestMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("GuestMemory")
            .field("size", &self.bytes.len())
            .finish()
    }
}
