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

//! Used to query and manipulate the page table of a guest.
//!
//! The guest page table is single level: one [`GuestPageTableEntry`] per guest-virtual
//! page, indexed by `gva / PAGE_SIZE`.
use alloc::{vec, vec::Vec};

use memory_addr::MemoryAddr;

use crate::mem::{GUEST_VIRT_MEMORY_SIZE, GUEST_VIRT_PAGES, GuestPhysAddr, GuestVirtAddr, PAGE_SIZE};
use crate::{HvError, HvResult};

/// The kind of memory access that triggers a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Fetch,
}

impl AccessKind {
    pub fn is_write(self) -> bool {
        self == AccessKind::Write
    }
}

/// One guest page table entry (guest-virtual page → guest-physical page).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuestPageTableEntry {
    /// Guest physical page this virtual page is mapped to.
    pub guest_physical_page: u32,
    pub present: bool,
    pub writable: bool,
    /// Set by the translator on every successful walk.
    pub accessed: bool,
    /// Set by the translator on every successful write walk.
    pub dirty: bool,
}

/// Page table translating guest-virtual to guest-physical addresses.
#[derive(Clone)]
pub struct GuestPageTable {
    entries: Vec<GuestPageTableEntry>,
}

impl GuestPageTable {
    /// Create a page table with no present entries.
    pub fn new() -> Self {
        Self {
            entries: vec![GuestPageTableEntry::default(); GUEST_VIRT_PAGES],
        }
    }

    /// Number of entries, one per guest-virtual page.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map guest-virtual page `page` to guest-physical page `frame`.
    pub fn map(&mut self, page: usize, frame: u32, writable: bool) -> HvResult {
        let entry = self.entries.get_mut(page).ok_or(HvError::InvalidMapping {
            page,
            frame: frame as usize,
        })?;
        *entry = GuestPageTableEntry {
            guest_physical_page: frame,
            present: true,
            writable,
            accessed: false,
            dirty: false,
        };
        Ok(())
    }

    /// Remove the mapping of guest-virtual page `page`, if any.
    pub fn unmap(&mut self, page: usize) {
        if let Some(entry) = self.entries.get_mut(page) {
            *entry = GuestPageTableEntry::default();
        }
    }

    pub fn entry(&self, page: usize) -> Option<&GuestPageTableEntry> {
        self.entries.get(page)
    }

    pub fn entry_mut(&mut self, page: usize) -> Option<&mut GuestPageTableEntry> {
        self.entries.get_mut(page)
    }

    /// Queries the mapping of `gva` without touching the accessed/dirty bits.
    ///
    /// Returns the guest-physical address and whether the page is writable.
    pub fn query(&self, gva: GuestVirtAddr) -> HvResult<(GuestPhysAddr, bool)> {
        let entry = self.present_entry(gva)?;
        Ok((
            frame_addr(entry.guest_physical_page) + gva.align_offset_4k(),
            entry.writable,
        ))
    }

    /// Walks the table for `gva` the way the translator does.
    ///
    /// On success `accessed` is set, and `dirty` too for writes.
    pub fn walk(&mut self, gva: GuestVirtAddr, access: AccessKind) -> HvResult<GuestPhysAddr> {
        let page = page_index(gva)?;
        let entry = &mut self.entries[page];
        if !entry.present {
            trace!("GuestPT walk {:?}: page {} not present", gva, page);
            return Err(HvError::PageNotPresent(gva));
        }
        if access.is_write() && !entry.writable {
            return Err(HvError::WriteProtected(gva));
        }
        entry.accessed = true;
        if access.is_write() {
            entry.dirty = true;
        }
        Ok(frame_addr(entry.guest_physical_page) + gva.align_offset_4k())
    }

    /// Iterate over the present entries together with their page index.
    pub fn present_entries(&self) -> impl Iterator<Item = (usize, &GuestPageTableEntry)> {
        self.entries.iter().enumerate().filter(|(_, e)| e.present)
    }
}

// private implements
impl GuestPageTable {
    fn present_entry(&self, gva: GuestVirtAddr) -> HvResult<&GuestPageTableEntry> {
        let entry = &self.entries[page_index(gva)?];
        if entry.present {
            Ok(entry)
        } else {
            Err(HvError::PageNotPresent(gva))
        }
    }
}

impl Default for GuestPageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for GuestPageTable {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_map()
            .entries(self.present_entries().map(|(page, e)| (page, e.guest_physical_page)))
            .finish()
    }
}

/// Index of the page containing `gva`, or [`HvError::AddressOutOfRange`].
pub(crate) fn page_index(gva: GuestVirtAddr) -> HvResult<usize> {
    if gva.as_usize() >= GUEST_VIRT_MEMORY_SIZE {
        return Err(HvError::AddressOutOfRange(gva));
    }
    Ok(gva.as_usize() / PAGE_SIZE)
}

const fn frame_addr(frame: u32) -> GuestPhysAddr {
    GuestPhysAddr::from_usize(frame as usize * PAGE_SIZE)
}
