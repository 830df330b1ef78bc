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

//! Extended page table: the second translation stage, guest-physical to host-physical.
//!
//! The hypervisor owns one [`ExtendedPageTable`] per guest. Host physical pages are the
//! frames of the guest's [`GuestMemory`](crate::GuestMemory), so a present entry can never
//! point outside the memory of the guest it belongs to.

use alloc::{vec, vec::Vec};

use memory_addr::MemoryAddr;

use crate::mem::{GUEST_PHYS_PAGES, GuestPhysAddr, HostPhysAddr, PAGE_SIZE};
use crate::page_table::AccessKind;
use crate::{HvError, HvResult};

/// One EPT entry (guest-physical page → host-physical page).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EptEntry {
    pub host_physical_page: u32,
    pub present: bool,
    pub writable: bool,
}

#[derive(Debug, Clone)]
pub struct ExtendedPageTable {
    entries: Vec<EptEntry>,
}

impl ExtendedPageTable {
    /// An EPT without any present entry.
    pub fn new() -> Self {
        Self {
            entries: vec![EptEntry::default(); GUEST_PHYS_PAGES],
        }
    }

    /// An EPT mapping every guest-physical page to the host page with the same number.
    pub fn identity() -> Self {
        let mut ept = Self::new();
        for (page, entry) in ept.entries.iter_mut().enumerate() {
            *entry = EptEntry {
                host_physical_page: page as u32,
                present: true,
                writable: true,
            };
        }
        ept
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, page: usize) -> Option<&EptEntry> {
        self.entries.get(page)
    }

    /// Map guest-physical page `page` to host page `host_page`.
    ///
    /// Both must lie within the guest's memory.
    pub fn map(&mut self, page: usize, host_page: u32, writable: bool) -> HvResult {
        if host_page as usize >= GUEST_PHYS_PAGES {
            return Err(HvError::InvalidMapping {
                page,
                frame: host_page as usize,
            });
        }
        let entry = self.entries.get_mut(page).ok_or(HvError::InvalidMapping {
            page,
            frame: host_page as usize,
        })?;
        *entry = EptEntry {
            host_physical_page: host_page,
            present: true,
            writable,
        };
        debug!("[EPT] mapped GPA page {} -> HPA page {}", page, host_page);
        Ok(())
    }

    pub fn unmap(&mut self, page: usize) {
        if let Some(entry) = self.entries.get_mut(page) {
            *entry = EptEntry::default();
        }
    }

    /// Walk the EPT for `gpa`.
    ///
    /// Fails with [`HvError::EptViolation`] if the page is beyond the table, not present,
    /// or not writable for a write access.
    pub fn walk(&self, gpa: GuestPhysAddr, access: AccessKind) -> HvResult<HostPhysAddr> {
        let page = gpa.as_usize() / PAGE_SIZE;
        let entry = match self.entries.get(page) {
            Some(entry) if entry.present => entry,
            _ => {
                trace!("EPT walk {:?}: page {} not present", gpa, page);
                return Err(HvError::EptViolation(gpa));
            }
        };
        if access.is_write() && !entry.writable {
            return Err(HvError::EptViolation(gpa));
        }
        Ok(HostPhysAddr::from_usize(
            entry.host_physical_page as usize * PAGE_SIZE + gpa.align_offset_4k(),
        ))
    }
}

impl Default for ExtendedPageTable {
    fn default() -> Self {
        Self::new()
    }
}
