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

//! The address translator: guest-virtual → guest-physical → host-physical.

use alloc::vec::Vec;

use memory_addr::MemoryAddr;

use crate::guest::GuestVm;
use crate::mem::{GuestPhysAddr, GuestVirtAddr, HostPhysAddr, PAGE_SIZE};
use crate::page_table::{AccessKind, page_index};
use crate::virt::VCpu;
use crate::HvResult;

/// Translate `gva` through the guest page table of `vcpu` for a read.
///
/// Fails with [`AddressOutOfRange`](crate::HvError::AddressOutOfRange) beyond the
/// guest-virtual address space, or [`PageNotPresent`](crate::HvError::PageNotPresent) if
/// the page is not mapped. Marks the entry accessed.
pub fn translate_guest_virtual(vcpu: &mut VCpu, gva: GuestVirtAddr) -> HvResult<GuestPhysAddr> {
    translate_guest_virtual_access(vcpu, gva, AccessKind::Read)
}

/// First stage translation for a given kind of access. The TLB is consulted before the walk.
pub fn translate_guest_virtual_access(
    vcpu: &mut VCpu,
    gva: GuestVirtAddr,
    access: AccessKind,
) -> HvResult<GuestPhysAddr> {
    let page = page_index(gva)?;
    if let Some(hit) = vcpu.tlb.lookup(page) {
        if !access.is_write() || hit.writable {
            if access.is_write() {
                if let Some(entry) = vcpu.guest_page_table_mut().entry_mut(page) {
                    entry.dirty = true;
                }
            }
            trace!("TLB hit for {:?} -> frame {}", gva, hit.frame);
            return Ok(GuestPhysAddr::from_usize(
                hit.frame as usize * PAGE_SIZE + gva.align_offset_4k(),
            ));
        }
    }
    let gpa = vcpu.guest_page_table_mut().walk(gva, access)?;
    if let Some(entry) = vcpu.guest_page_table().entry(page) {
        let (frame, writable) = (entry.guest_physical_page, entry.writable);
        vcpu.tlb.insert(page, frame, writable);
    }
    Ok(gpa)
}

/// Translate `gpa` through the EPT of `guest` for a read.
pub fn translate_guest_physical(guest: &GuestVm, gpa: GuestPhysAddr) -> HvResult<HostPhysAddr> {
    guest.ept().walk(gpa, AccessKind::Read)
}

/// Both translation stages for one access by `guest`.
pub fn translate(guest: &mut GuestVm, gva: GuestVirtAddr, access: AccessKind) -> HvResult<HostPhysAddr> {
    let gpa = translate_guest_virtual_access(guest.vcpu_mut(), gva, access)?;
    guest.ept().walk(gpa, access)
}

pub(crate) fn read_guest_u8(guest: &mut GuestVm, gva: GuestVirtAddr) -> HvResult<u8> {
    let hpa = translate(guest, gva, AccessKind::Read)?;
    guest.memory().read_u8(hpa)
}

pub(crate) fn write_guest_u8(guest: &mut GuestVm, gva: GuestVirtAddr, val: u8) -> HvResult {
    let hpa = translate(guest, gva, AccessKind::Write)?;
    guest.memory_mut().write_u8(hpa, val)
}

/// Read `len` bytes of guest-virtual memory starting at `gva`, page by page.
pub fn read_guest_bytes(guest: &mut GuestVm, gva: GuestVirtAddr, len: usize) -> HvResult<Vec<u8>> {
    debug!("read_guest_bytes @{:?} len: {}", gva, len);

    let mut content = Vec::with_capacity(len);
    let mut remained_size = len;
    let mut addr = gva;

    while remained_size > 0 {
        let hpa = translate(guest, addr, AccessKind::Read).inspect_err(|e| {
            warn!("Failed to translate GVA {:?} err {:?}", addr, e);
        })?;
        let read_size = (PAGE_SIZE - addr.align_offset_4k()).min(remained_size);
        let start = hpa.as_usize();
        let bytes = guest
            .memory()
            .as_slice()
            .get(start..start + read_size)
            .ok_or(crate::HvError::HostAddressOutOfRange(hpa))?;
        content.extend_from_slice(bytes);
        addr = addr + read_size;
        remained_size -= read_size;
    }
    trace!("read_guest_bytes @{:?} content: {:x?}", gva, content);
    Ok(content)
}

/// Write `data` to guest-virtual memory starting at `gva`, byte by byte.
///
/// Stops at the first untranslatable byte; returns the error if nothing could be written.
pub fn write_guest_bytes(guest: &mut GuestVm, gva: GuestVirtAddr, data: &[u8]) -> HvResult<usize> {
    for (i, byte) in data.iter().enumerate() {
        if let Err(e) = write_guest_u8(guest, gva + i, *byte) {
            if i == 0 {
                return Err(e);
            }
            warn!("write_guest_bytes @{:?}: stopped after {} bytes: {:?}", gva, i, e);
            return Ok(i);
        }
    }
    Ok(data.len())
}
