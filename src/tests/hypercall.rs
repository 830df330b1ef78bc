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

//! Tests for hypercalls, demand paging and privileged instruction emulation.

use super::assemble;
use crate::virt::{ExitCause, GuestState, HypercallNr, Opcode, TrapConfig};
use crate::{GuestVirtAddr, Hypervisor, HypervisorConfig, MappingPolicy, RoundRobin, VmEvent};

use Opcode::*;

const DATA: usize = 0x40;

fn image_with_data(program: &[(Opcode, u8, u8, u8)], data: &[u8]) -> Vec<u8> {
    let mut image = assemble(program);
    assert!(image.len() <= DATA);
    image.resize(DATA, 0);
    image.extend_from_slice(data);
    image
}

fn run_to_completion(config: HypervisorConfig, image: &[u8]) -> (Hypervisor, Vec<VmEvent>) {
    let mut hv = Hypervisor::new(config);
    hv.create_guest_from_image(image).unwrap();
    RoundRobin::from_config(hv.config()).run(&mut hv).unwrap();
    let events = hv.drain_events();
    (hv, events)
}

fn outputs(events: &[VmEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            VmEvent::GuestOutput { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_print_number_and_string() {
    let image = image_with_data(
        &[
            (Movi, 1, 0, 42),
            (Hypercall, 1, 0, 0),
            (Movi, 1, 0, DATA as u8),
            (Movi, 2, 0, 5),
            (Hypercall, 1, 0, 0),
            (Halt, 0, 0, 0),
        ],
        b"hello",
    );
    let (hv, events) = run_to_completion(HypervisorConfig::default(), &image);
    assert_eq!(outputs(&events), vec!["42".to_string(), "hello".to_string()]);
    assert_eq!(hv.guest(0).unwrap().state(), GuestState::Stopped);
    assert!(events.iter().any(|e| matches!(
        e,
        VmEvent::VmExit {
            cause: ExitCause::Hypercall,
            qualification: 1,
            ..
        }
    )));
}

#[test]
fn test_read_and_write_mem() {
    let image = image_with_data(
        &[
            (Movi, 1, 0, DATA as u8),
            (Movi, 2, 0, 4),
            (Hypercall, 2, 0, 0), // READ_MEM into the mailbox
            (Mov, 6, 0, 0),
            (Movi, 1, 0, 0x80),
            (Hypercall, 3, 0, 0), // WRITE_MEM back to 0x80
            (Mov, 7, 0, 0),
            (Halt, 0, 0, 0),
        ],
        b"data",
    );
    let (hv, _) = run_to_completion(HypervisorConfig::default(), &image);
    let guest = hv.guest(0).unwrap();
    assert_eq!(guest.vcpu().regs().get_reg_of_index(6), 4);
    assert_eq!(guest.vcpu().regs().get_reg_of_index(7), 4);
    assert_eq!(&guest.memory().as_slice()[0x80..0x84], b"data");
    assert_eq!(&hv.mailbox(0).unwrap()[..4], b"data");
}

#[test]
fn test_exit_hypercall_stops_guest() {
    let image = assemble(&[
        (Hypercall, 4, 0, 0),
        (Movi, 3, 0, 1),
        (Halt, 0, 0, 0),
    ]);
    let (hv, events) = run_to_completion(HypervisorConfig::default(), &image);
    let guest = hv.guest(0).unwrap();
    assert_eq!(guest.state(), GuestState::Stopped);
    assert_eq!(guest.instruction_count(), 1);
    assert_eq!(guest.vcpu().regs().get_reg_of_index(3), 0);
    assert!(events.contains(&VmEvent::GuestHalted { guest_id: 0 }));
}

#[test]
fn test_unknown_hypercall_resumes() {
    let image = assemble(&[(Hypercall, 9, 0, 0), (Movi, 3, 0, 1), (Halt, 0, 0, 0)]);
    let (hv, events) = run_to_completion(HypervisorConfig::default(), &image);
    assert!(events.contains(&VmEvent::UnknownHypercall { guest_id: 0, nr: 9 }));
    assert_eq!(hv.guest(0).unwrap().vcpu().regs().get_reg_of_index(3), 1);
}

#[test]
fn test_syscall_is_resumed() {
    let image = assemble(&[(Syscall, 3, 0, 0), (Movi, 3, 0, 1), (Halt, 0, 0, 0)]);
    let (hv, _) = run_to_completion(HypervisorConfig::default(), &image);
    let guest = hv.guest(0).unwrap();
    assert_eq!(guest.state(), GuestState::Stopped);
    assert_eq!(guest.instruction_count(), 3);
}

#[test]
fn test_demand_mapping_both_stages() {
    let config = HypervisorConfig {
        guest_mapping: MappingPolicy::OnDemand,
        ept_mapping: MappingPolicy::OnDemand,
        ..HypervisorConfig::default()
    };
    let image = assemble(&[(Addi, 0, 0, 2), (Call, 3, 0, 0), (Halt, 0, 0, 0), (Ret, 0, 0, 0)]);
    let (hv, events) = run_to_completion(config, &image);

    let guest = hv.guest(0).unwrap();
    assert_eq!(guest.state(), GuestState::Stopped);
    assert_eq!(guest.instruction_count(), 4);
    assert_eq!(guest.vcpu().regs().get_reg_of_index(0), 2);
    for (page, ept) in [(0, false), (0, true), (3, false), (3, true)] {
        assert!(events.contains(&VmEvent::DemandMapped {
            guest_id: 0,
            page,
            ept
        }));
    }
    assert!(guest.vcpu().guest_page_table().entry(3).unwrap().present);
    assert!(guest.ept().entry(3).unwrap().present);
}

#[test]
fn test_unbacked_page_fault_terminates() {
    // Jump to byte 0x50 * 0xff, in the fifth page that no frame backs.
    let image = assemble(&[(Movi, 1, 0, 0x50), (Muli, 1, 1, 0xff), (Call, 0, 1, 0)]);
    let (hv, events) = run_to_completion(HypervisorConfig::default(), &image);
    let guest = hv.guest(0).unwrap();
    assert!(guest.is_terminated());
    assert_eq!(guest.vcpu().last_exit_cause, ExitCause::PageFault);
    assert!(events.contains(&VmEvent::GuestTerminated {
        guest_id: 0,
        cause: ExitCause::PageFault
    }));
}

#[test]
fn test_privileged_emulation_with_trap_config() {
    let mut hv = Hypervisor::new(HypervisorConfig::default());
    let image = assemble(&[
        (Movi, 3, 0, 0x77),
        (LdPgtr, 3, 0, 0),
        (LdHptr, 3, 0, 0),
        (TlbFlushV, 0, 0, 0),
        (Halt, 0, 0, 0),
    ]);
    hv.create_guest_from_image(&image).unwrap();
    hv.guest_mut(0).unwrap().vcpu_mut().vmcs_mut().trap_config =
        TrapConfig::PRIVILEGED_INSTR | TrapConfig::PGTBL_ROOT_WRITE;
    RoundRobin::default().run(&mut hv).unwrap();

    let vcpu = hv.guest(0).unwrap().vcpu();
    assert_eq!(vcpu.state, GuestState::Stopped);
    assert_eq!(vcpu.guest_page_table_root(), 0x77);
    assert_eq!(vcpu.vmcs().guest_page_table_root, 0x77);
    assert_eq!(vcpu.host_page_table_root(), 0x77);
    assert_eq!(vcpu.vmcs().host_page_table_root, 0x77);
}

#[test]
fn test_privileged_rejected_without_trap_config() {
    let image = assemble(&[(Movi, 3, 0, 0x77), (LdPgtr, 3, 0, 0), (Halt, 0, 0, 0)]);
    let (hv, _) = run_to_completion(HypervisorConfig::default(), &image);
    let vcpu = hv.guest(0).unwrap().vcpu();
    assert_eq!(vcpu.state, GuestState::Stopped);
    assert_eq!(vcpu.guest_page_table_root(), 0);
    assert_eq!(hv.guest(0).unwrap().instruction_count(), 3);
}

#[test]
fn test_print_reports_byte_count() {
    let image = image_with_data(
        &[
            (Movi, 1, 0, DATA as u8),
            (Movi, 2, 0, 2),
            (Hypercall, 1, 0, 0),
            (Mov, 5, 0, 0),
            (Halt, 0, 0, 0),
        ],
        b"hi",
    );
    let (hv, events) = run_to_completion(HypervisorConfig::default(), &image);
    assert_eq!(outputs(&events), vec!["hi".to_string()]);
    assert_eq!(hv.guest(0).unwrap().vcpu().regs().get_reg_of_index(5), 2);
}

#[test]
fn test_print_from_unmapped_buffer_fails() {
    let image = assemble(&[
        (Movi, 0, 0, 9),
        (Movi, 1, 0, 0x50),
        (Muli, 1, 1, 0xff),
        (Movi, 2, 0, 4),
        (Hypercall, 1, 0, 0),
        (Mov, 5, 0, 0),
        (Halt, 0, 0, 0),
    ]);
    let (hv, events) = run_to_completion(HypervisorConfig::default(), &image);
    assert!(outputs(&events).is_empty());
    assert!(events.contains(&VmEvent::HypercallFailed {
        guest_id: 0,
        nr: HypercallNr::Print
    }));
    let guest = hv.guest(0).unwrap();
    assert_eq!(guest.state(), GuestState::Stopped);
    assert_eq!(guest.vcpu().regs().get_reg_of_index(5), 0);
}

#[test]
fn test_unbacked_trapped_data_access_is_skipped() {
    let image = assemble(&[
        (Movi, 1, 0, 0x50),
        (Muli, 1, 1, 0xff), // 0x4fb0, beyond guest RAM
        (Movi, 3, 0, 1),
        (Load, 3, 1, 0),
        (Store, 0, 1, 3),
        (Movi, 4, 0, 2),
        (Halt, 0, 0, 0),
    ]);
    let mut hv = Hypervisor::new(HypervisorConfig::default());
    hv.create_guest_from_image(&image).unwrap();
    hv.guest_mut(0).unwrap().vcpu_mut().vmcs_mut().trap_config = TrapConfig::PAGE_FAULT;
    RoundRobin::default().run(&mut hv).unwrap();
    let events = hv.drain_events();

    let guest = hv.guest(0).unwrap();
    assert!(!guest.is_terminated());
    assert_eq!(guest.state(), GuestState::Stopped);
    assert_eq!(guest.instruction_count(), 7);
    assert_eq!(guest.vcpu().regs().get_reg_of_index(3), 1);
    assert_eq!(guest.vcpu().regs().get_reg_of_index(4), 2);
    let skipped = events
        .iter()
        .filter(|e| {
            **e == VmEvent::AccessSkipped {
                guest_id: 0,
                gva: GuestVirtAddr::from_usize(0x4fb0),
            }
        })
        .count();
    assert_eq!(skipped, 2);
}
