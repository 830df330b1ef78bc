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

//! Tests for the two translation stages and the TLB.

use crate::ept::ExtendedPageTable;
use crate::guest::GuestVm;
use crate::page_table::AccessKind;
use crate::tlb::Tlb;
use crate::{
    GUEST_VIRT_MEMORY_SIZE, GuestPhysAddr, GuestVirtAddr, HostPhysAddr, HvError,
    HypervisorConfig, MappingPolicy, PAGE_SIZE, read_guest_bytes, translate,
    translate_guest_physical, translate_guest_virtual, translate_guest_virtual_access,
};

fn guest_with(guest_mapping: MappingPolicy, ept_mapping: MappingPolicy) -> GuestVm {
    let config = HypervisorConfig {
        guest_mapping,
        ept_mapping,
        ..HypervisorConfig::default()
    };
    GuestVm::new(0, &[0xff, 0, 0, 0], &config).unwrap()
}

fn gva(addr: usize) -> GuestVirtAddr {
    GuestVirtAddr::from_usize(addr)
}

#[test]
fn test_out_of_range_address() {
    let mut guest = guest_with(MappingPolicy::Identity, MappingPolicy::Identity);
    for addr in [GUEST_VIRT_MEMORY_SIZE, GUEST_VIRT_MEMORY_SIZE + 1, usize::MAX] {
        assert_eq!(
            translate_guest_virtual(guest.vcpu_mut(), gva(addr)),
            Err(HvError::AddressOutOfRange(gva(addr)))
        );
    }
}

#[test]
fn test_page_not_present_is_distinct() {
    let mut guest = guest_with(MappingPolicy::OnDemand, MappingPolicy::Identity);
    assert_eq!(
        translate_guest_virtual(guest.vcpu_mut(), gva(0x10)),
        Err(HvError::PageNotPresent(gva(0x10)))
    );
    assert_eq!(
        translate_guest_virtual(guest.vcpu_mut(), gva(GUEST_VIRT_MEMORY_SIZE - 1)),
        Err(HvError::PageNotPresent(gva(GUEST_VIRT_MEMORY_SIZE - 1)))
    );
}

#[test]
fn test_present_mapping_covers_whole_page() {
    let mut guest = guest_with(MappingPolicy::OnDemand, MappingPolicy::Identity);
    let vcpu = guest.vcpu_mut();
    vcpu.map_page(5, 2, true).unwrap();
    assert!(!vcpu.guest_page_table().entry(5).unwrap().accessed);

    for offset in [0, 1, 0x123, PAGE_SIZE - 1] {
        let gpa = translate_guest_virtual(vcpu, gva(5 * PAGE_SIZE + offset)).unwrap();
        assert_eq!(gpa, GuestPhysAddr::from_usize(2 * PAGE_SIZE + offset));
    }
    let entry = vcpu.guest_page_table().entry(5).unwrap();
    assert!(entry.accessed);
    assert!(!entry.dirty);
}

#[test]
fn test_write_protection_and_dirty_bit() {
    let mut guest = guest_with(MappingPolicy::OnDemand, MappingPolicy::Identity);
    let vcpu = guest.vcpu_mut();
    vcpu.map_page(0, 0, true).unwrap();
    vcpu.map_page(1, 1, false).unwrap();

    translate_guest_virtual_access(vcpu, gva(0x20), AccessKind::Write).unwrap();
    assert!(vcpu.guest_page_table().entry(0).unwrap().dirty);

    assert_eq!(
        translate_guest_virtual_access(vcpu, gva(PAGE_SIZE + 4), AccessKind::Write),
        Err(HvError::WriteProtected(gva(PAGE_SIZE + 4)))
    );
    // Reads of the read-only page still work.
    assert!(translate_guest_virtual(vcpu, gva(PAGE_SIZE + 4)).is_ok());
}

#[test]
fn test_tlb_is_consulted_before_walk() {
    let mut guest = guest_with(MappingPolicy::OnDemand, MappingPolicy::Identity);
    let vcpu = guest.vcpu_mut();
    vcpu.map_page(3, 1, true).unwrap();
    translate_guest_virtual(vcpu, gva(3 * PAGE_SIZE)).unwrap();
    assert_eq!(vcpu.tlb_entry_count(), 1);
    assert!(vcpu.tlb_valid());

    // Changing the entry behind the TLB's back leaves the stale translation cached.
    vcpu.guest_page_table_mut().entry_mut(3).unwrap().guest_physical_page = 2;
    assert_eq!(
        translate_guest_virtual(vcpu, gva(3 * PAGE_SIZE + 8)).unwrap(),
        GuestPhysAddr::from_usize(PAGE_SIZE + 8)
    );

    vcpu.flush_tlb();
    assert!(!vcpu.tlb_valid());
    assert_eq!(vcpu.tlb_entry_count(), 0);
    assert_eq!(
        translate_guest_virtual(vcpu, gva(3 * PAGE_SIZE + 8)).unwrap(),
        GuestPhysAddr::from_usize(2 * PAGE_SIZE + 8)
    );
}

#[test]
fn test_map_page_invalidates_cached_translation() {
    let mut guest = guest_with(MappingPolicy::OnDemand, MappingPolicy::Identity);
    let vcpu = guest.vcpu_mut();
    vcpu.map_page(7, 0, true).unwrap();
    translate_guest_virtual(vcpu, gva(7 * PAGE_SIZE)).unwrap();
    vcpu.map_page(7, 3, true).unwrap();
    assert_eq!(
        translate_guest_virtual(vcpu, gva(7 * PAGE_SIZE)).unwrap(),
        GuestPhysAddr::from_usize(3 * PAGE_SIZE)
    );

    vcpu.unmap_page(7);
    assert_eq!(
        translate_guest_virtual(vcpu, gva(7 * PAGE_SIZE)),
        Err(HvError::PageNotPresent(gva(7 * PAGE_SIZE)))
    );
}

#[test]
fn test_tlb_fifo_replacement() {
    let mut tlb = Tlb::new(8);
    assert!(!tlb.is_valid());
    for page in 0..9 {
        tlb.insert(page, page as u32, true);
    }
    assert_eq!(tlb.len(), 8);
    assert!(tlb.lookup(0).is_none());
    assert_eq!(tlb.lookup(8).map(|e| e.frame), Some(8));

    tlb.invalidate_page(8);
    assert!(tlb.lookup(8).is_none());
    assert_eq!(tlb.len(), 7);

    tlb.flush();
    assert!(tlb.is_empty());
    assert!(tlb.lookup(1).is_none());
}

#[test]
fn test_ept_identity_and_violation() {
    let ept = ExtendedPageTable::identity();
    let gpa = GuestPhysAddr::from_usize(3 * PAGE_SIZE + 0x10);
    assert_eq!(
        ept.walk(gpa, AccessKind::Write),
        Ok(HostPhysAddr::from_usize(3 * PAGE_SIZE + 0x10))
    );
    let beyond = GuestPhysAddr::from_usize(4 * PAGE_SIZE);
    assert_eq!(ept.walk(beyond, AccessKind::Read), Err(HvError::EptViolation(beyond)));

    let mut ept = ExtendedPageTable::new();
    assert_eq!(ept.walk(gpa, AccessKind::Read), Err(HvError::EptViolation(gpa)));
    ept.map(3, 1, false).unwrap();
    assert_eq!(
        ept.walk(gpa, AccessKind::Read),
        Ok(HostPhysAddr::from_usize(PAGE_SIZE + 0x10))
    );
    assert_eq!(ept.walk(gpa, AccessKind::Write), Err(HvError::EptViolation(gpa)));
    assert!(matches!(ept.map(0, 4, true), Err(HvError::InvalidMapping { .. })));
}

#[test]
fn test_two_stage_translation() {
    let mut guest = guest_with(MappingPolicy::OnDemand, MappingPolicy::OnDemand);
    guest.vcpu_mut().map_page(9, 2, true).unwrap();
    let addr = gva(9 * PAGE_SIZE + 0x44);
    let gpa = GuestPhysAddr::from_usize(2 * PAGE_SIZE + 0x44);

    assert_eq!(translate(&mut guest, addr, AccessKind::Read), Err(HvError::EptViolation(gpa)));
    guest.ept_mut().map(2, 0, true).unwrap();
    assert_eq!(
        translate(&mut guest, addr, AccessKind::Read),
        Ok(HostPhysAddr::from_usize(0x44))
    );
    assert_eq!(
        translate_guest_physical(&guest, gpa),
        Ok(HostPhysAddr::from_usize(0x44))
    );
}

#[test]
fn test_read_guest_bytes_across_pages() {
    let mut guest = guest_with(MappingPolicy::Identity, MappingPolicy::Identity);
    let start = PAGE_SIZE - 2;
    for (i, b) in [1u8, 2, 3, 4].into_iter().enumerate() {
        let hpa = translate(&mut guest, gva(start + i), AccessKind::Write).unwrap();
        guest.memory_mut().write_u8(hpa, b).unwrap();
    }
    assert_eq!(read_guest_bytes(&mut guest, gva(start), 4).unwrap(), vec![1, 2, 3, 4]);
    assert!(read_guest_bytes(&mut guest, gva(4 * PAGE_SIZE - 1), 2).is_err());
}
