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

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::{vec, vec::Vec};
#[cfg(feature = "std")]
use std::path::Path;

use memory_addr::MemoryAddr;

use crate::config::HypervisorConfig;
use crate::events::VmEvent;
use crate::guest::GuestVm;
#[cfg(feature = "std")]
use crate::image::load_image_file;
use crate::instruction_emulator::{Instruction, InstructionEngine, SliceEnd, SliceOutcome};
use crate::mem::{
    GUEST_PHYS_PAGES, GUEST_VIRT_MEMORY_SIZE, GuestVirtAddr, HOST_MEMORY_SIZE, HOST_PAGES,
    INSTRUCTION_SIZE, MAX_GUESTS, PAGE_SIZE,
};
use crate::snapshot::{GuestSnapshot, HypervisorSnapshot};
use crate::translate::{read_guest_bytes, write_guest_bytes};
use crate::virt::{
    ExitCause, GuestState, HypercallNr, Mode, Opcode, PageFaultQualification, TrapConfig,
};
use crate::{HvError, HvResult};

/// One page of the hypervisor's own memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostPageTableEntry {
    /// The guest whose hypercall mailbox lives in this page.
    pub owner: Option<u32>,
    pub present: bool,
    pub writable: bool,
}

/// What the scheduler should do with a guest after its exit has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Continue the guest with `VMRESUME`.
    Resume,
    /// The guest is dead and must never be scheduled again.
    Terminate,
    /// The guest asked to stop.
    Stop,
}

/// The hypervisor context: every guest, the host memory and the host-wide mode.
pub struct Hypervisor {
    pub(crate) config: HypervisorConfig,
    pub(crate) mode: Mode,
    pub(crate) current_guest_id: Option<u32>,
    pub(crate) guests: Vec<GuestVm>,
    host_memory: Box<[u8]>,
    host_page_table: Vec<HostPageTableEntry>,
    pub(crate) tick_count: u64,
    pub(crate) halted: bool,
    events: Vec<VmEvent>,
    engine: InstructionEngine,
}

impl Hypervisor {
    pub fn new(config: HypervisorConfig) -> Self {
        info!(
            "[HV] starting: time slice {}, operand policy {:?}",
            config.time_slice, config.operand_policy
        );
        Self {
            engine: InstructionEngine::new(config.operand_policy),
            config,
            mode: Mode::Host,
            current_guest_id: None,
            guests: Vec::with_capacity(MAX_GUESTS),
            host_memory: vec![0u8; HOST_MEMORY_SIZE].into_boxed_slice(),
            host_page_table: vec![HostPageTableEntry::default(); HOST_PAGES],
            tick_count: 0,
            halted: false,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &HypervisorConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn current_guest_id(&self) -> Option<u32> {
        self.current_guest_id
    }

    pub fn guest_count(&self) -> usize {
        self.guests.len()
    }

    pub fn guests(&self) -> &[GuestVm] {
        &self.guests
    }

    pub fn guest(&self, guest_id: u32) -> Option<&GuestVm> {
        self.guests.get(guest_id as usize)
    }

    pub fn guest_mut(&mut self, guest_id: u32) -> Option<&mut GuestVm> {
        self.guests.get_mut(guest_id as usize)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Set once the scheduler has driven every guest to completion.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn host_page_table(&self) -> &[HostPageTableEntry] {
        &self.host_page_table
    }

    /// The hypercall mailbox page of `guest_id`.
    pub fn mailbox(&self, guest_id: u32) -> Option<&[u8]> {
        let start = self.mailbox_offset(guest_id)?;
        self.host_memory.get(start..start + PAGE_SIZE)
    }

    /// Whether no guest is left to schedule.
    pub fn all_finished(&self) -> bool {
        self.guests.iter().all(GuestVm::is_finished)
    }

    /// Create a guest from the image file at `path`. Returns the new guest id.
    #[cfg(feature = "std")]
    pub fn create_guest(&mut self, path: &Path) -> HvResult<u32> {
        if self.guests.len() >= MAX_GUESTS {
            warn!("[HV] cannot create guest from {}: capacity exceeded", path.display());
            return Err(HvError::GuestCapacityExceeded(MAX_GUESTS));
        }
        let image = load_image_file(path).inspect_err(|e| {
            warn!("[HV] cannot create guest: {}", e);
        })?;
        self.create_guest_from_image(&image)
    }

    /// Create a guest whose memory is preloaded with `image`. Returns the new guest id.
    ///
    /// The hypervisor is left untouched if creation fails.
    pub fn create_guest_from_image(&mut self, image: &[u8]) -> HvResult<u32> {
        if self.guests.len() >= MAX_GUESTS {
            return Err(HvError::GuestCapacityExceeded(MAX_GUESTS));
        }
        if image.is_empty() {
            return Err(HvError::ImageEmpty);
        }

        let guest_id = self.guests.len() as u32;
        let guest = GuestVm::new(guest_id, image, &self.config)?;
        if let Some(entry) = self.host_page_table.get_mut(guest_id as usize) {
            *entry = HostPageTableEntry {
                owner: Some(guest_id),
                present: true,
                writable: true,
            };
        }
        self.guests.push(guest);

        info!("[HV] created guest {} ({} bytes)", guest_id, image.len());
        self.emit(VmEvent::GuestCreated {
            guest_id,
            image_size: image.len(),
        });
        Ok(guest_id)
    }

    /// Take every event recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<VmEvent> {
        core::mem::take(&mut self.events)
    }

    pub(crate) fn emit(&mut self, event: VmEvent) {
        self.events.push(event);
    }

    pub fn snapshot(&self) -> HypervisorSnapshot {
        HypervisorSnapshot {
            mode: self.mode,
            current_guest_id: self.current_guest_id,
            guest_count: self.guests.len(),
            tick_count: self.tick_count,
            halted: self.halted,
            guests: self.guests.iter().map(GuestSnapshot::of).collect(),
        }
    }

    /// Execute up to `quota` instructions of the entered guest `guest_id`.
    ///
    /// Control is back in host mode when this returns. A guest that used up its quota is
    /// saved to its VMCS and marked `Paused`.
    pub fn run_slice(&mut self, guest_id: u32, quota: u32) -> HvResult<SliceOutcome> {
        if self.mode != Mode::Guest || self.current_guest_id != Some(guest_id) {
            warn!("[HV] guest {} is not the entered guest", guest_id);
            return Err(HvError::NoActiveGuest);
        }
        let guest = self
            .guests
            .get_mut(guest_id as usize)
            .ok_or(HvError::InvalidGuest(guest_id))?;

        let outcome = self.engine.run(guest, quota);
        match outcome.end {
            SliceEnd::QuotaExhausted => {
                guest.vcpu_mut().preempt();
                trace!("[HV] guest {} preempted at pc {:#x}", guest_id, guest.vcpu().pc);
            }
            SliceEnd::Halted => {
                info!(
                    "[HV] guest {} halted after {} instructions",
                    guest_id, guest.instruction_count
                );
                self.events.push(VmEvent::GuestHalted { guest_id });
            }
            SliceEnd::Exited(cause) => {
                let qualification = guest.vcpu().vmcs().exit_qualification;
                debug!(
                    "[HV] VM exit: guest {} cause {:?} qualification {:#x}",
                    guest_id, cause, qualification
                );
                self.events.push(VmEvent::VmExit {
                    guest_id,
                    cause,
                    qualification,
                });
            }
        }
        self.mode = Mode::Host;
        Ok(outcome)
    }

    /// Handle the pending VM exit of `guest_id`.
    ///
    /// Exit handlers work on the VMCS; a guest to be resumed must be continued with
    /// [`Hypervisor::vmresume`].
    pub fn handle_exit(&mut self, guest_id: u32) -> HvResult<ExitAction> {
        if self.mode != Mode::Host {
            return Err(HvError::NotInHostMode);
        }
        let guest = self
            .guests
            .get(guest_id as usize)
            .ok_or(HvError::InvalidGuest(guest_id))?;
        let cause = guest.vcpu().last_exit_cause;
        let qualification = guest.vcpu().vmcs().exit_qualification;

        let action = match cause {
            ExitCause::IllegalInstruction => {
                let opcode = Instruction::from_word(qualification).opcode;
                warn!("[HV] guest {}: {}", guest_id, HvError::IllegalInstruction(opcode));
                self.terminate_guest(guest_id, cause);
                ExitAction::Terminate
            }
            ExitCause::DivideError => {
                self.terminate_guest(guest_id, cause);
                ExitAction::Terminate
            }
            ExitCause::PageFault => self.handle_page_fault(guest_id)?,
            ExitCause::Hypercall => self.handle_hypercall(guest_id)?,
            ExitCause::PrivilegedInstruction => {
                self.handle_privileged_instruction(guest_id)?;
                ExitAction::Resume
            }
            ExitCause::Syscall => {
                debug!("[HV] guest {} syscall {}", guest_id, qualification);
                ExitAction::Resume
            }
            ExitCause::IoInstruction | ExitCause::Timer | ExitCause::None => {
                debug!("[HV] guest {} exit {:?} ignored", guest_id, cause);
                ExitAction::Resume
            }
        };

        if action == ExitAction::Resume {
            let vcpu = self.guests[guest_id as usize].vcpu_mut();
            vcpu.vmcs.pc = vcpu.pc;
        }
        Ok(action)
    }
}

// exit handlers
impl Hypervisor {
    fn terminate_guest(&mut self, guest_id: u32, cause: ExitCause) {
        if let Some(guest) = self.guests.get_mut(guest_id as usize) {
            guest.terminated = true;
            error!(
                "[HV] guest {} terminated by {:?} at pc {:#x}",
                guest_id,
                cause,
                guest.vcpu().vmcs().pc
            );
        }
        self.emit(VmEvent::GuestTerminated { guest_id, cause });
    }

    /// Map the faulting page 1:1 if guest RAM backs it, otherwise kill the guest.
    fn handle_page_fault(&mut self, guest_id: u32) -> HvResult<ExitAction> {
        let guest = self
            .guests
            .get_mut(guest_id as usize)
            .ok_or(HvError::InvalidGuest(guest_id))?;
        let vmcs = guest.vcpu().vmcs();
        let qualification = PageFaultQualification(vmcs.exit_qualification);
        let gla = vmcs.guest_linear_address;
        let gpa = vmcs.guest_physical_address;

        let mapped = if qualification.is_ept() {
            match gpa.map(|gpa| gpa.as_usize() / PAGE_SIZE) {
                Some(page) if page < GUEST_PHYS_PAGES => {
                    guest.ept_mut().map(page, page as u32, true)?;
                    Some((page, true))
                }
                _ => None,
            }
        } else {
            match gla.map(GuestVirtAddr::as_usize) {
                Some(addr) if addr < GUEST_VIRT_MEMORY_SIZE => {
                    let page = addr / PAGE_SIZE;
                    let present = guest
                        .vcpu()
                        .guest_page_table()
                        .entry(page)
                        .is_some_and(|e| e.present);
                    if page < GUEST_PHYS_PAGES && !present {
                        guest.vcpu_mut().map_page(page, page as u32, true)?;
                        Some((page, false))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        match mapped {
            Some((page, ept)) => {
                debug!(
                    "[HV] guest {} demand mapped {} page {}",
                    guest_id,
                    if ept { "GPA" } else { "GVA" },
                    page
                );
                self.emit(VmEvent::DemandMapped {
                    guest_id,
                    page,
                    ept,
                });
                Ok(ExitAction::Resume)
            }
            None => match gla {
                Some(gva) if qualification.is_data_access() => {
                    let guest = &mut self.guests[guest_id as usize];
                    let vmcs = guest.vcpu_mut().vmcs_mut();
                    vmcs.pc = vmcs.pc.wrapping_add(INSTRUCTION_SIZE as u32);
                    guest.instruction_count += 1;
                    warn!(
                        "[HV] guest {} {:?} at {:?} has no backing page, skipped",
                        guest_id,
                        qualification.access(),
                        gva
                    );
                    self.emit(VmEvent::AccessSkipped { guest_id, gva });
                    Ok(ExitAction::Resume)
                }
                _ => {
                    warn!(
                        "[HV] guest {} unresolvable page fault: {:?} / {:?} ({:?})",
                        guest_id,
                        gla,
                        gpa,
                        qualification.access()
                    );
                    self.terminate_guest(guest_id, ExitCause::PageFault);
                    Ok(ExitAction::Terminate)
                }
            },
        }
    }

    fn handle_hypercall(&mut self, guest_id: u32) -> HvResult<ExitAction> {
        let mailbox_start = self
            .mailbox_offset(guest_id)
            .ok_or(HvError::InvalidGuest(guest_id))?;
        let guest = self
            .guests
            .get_mut(guest_id as usize)
            .ok_or(HvError::InvalidGuest(guest_id))?;
        let vmcs = guest.vcpu().vmcs();
        let nr = vmcs.exit_qualification;
        let arg0 = vmcs.regs.get_reg_of_index(1);
        let arg1 = vmcs.regs.get_reg_of_index(2);
        let len = (arg1 as usize).min(PAGE_SIZE);
        let gva = GuestVirtAddr::from_usize(arg0 as usize);

        let Ok(nr) = HypercallNr::try_from(nr) else {
            warn!("[HV] guest {}: {}", guest_id, HvError::UnknownHypercall(nr));
            self.emit(VmEvent::UnknownHypercall { guest_id, nr });
            return Ok(ExitAction::Resume);
        };
        trace!("[HV] guest {} hypercall {:?}({:#x}, {})", guest_id, nr, arg0, arg1);

        let result = match nr {
            HypercallNr::Print => {
                let message = if arg1 == 0 {
                    Ok(arg0.to_string())
                } else {
                    read_guest_bytes(guest, gva, len)
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                };
                message.map(|message| {
                    let printed = message.len();
                    info!("[GUEST {}] {}", guest_id, message);
                    self.events.push(VmEvent::GuestOutput { guest_id, message });
                    printed
                })
            }
            HypercallNr::ReadMem => read_guest_bytes(guest, gva, len).map(|bytes| {
                self.host_memory[mailbox_start..mailbox_start + bytes.len()]
                    .copy_from_slice(&bytes);
                bytes.len()
            }),
            HypercallNr::WriteMem => {
                let data = &self.host_memory[mailbox_start..mailbox_start + len];
                write_guest_bytes(guest, gva, data)
            }
            HypercallNr::Exit => {
                guest.vcpu_mut().state = GuestState::Stopped;
                info!("[HV] guest {} exited by hypercall", guest_id);
                self.emit(VmEvent::GuestHalted { guest_id });
                return Ok(ExitAction::Stop);
            }
        };

        // r0 returns the byte count, 0 when the guest buffer is not mapped.
        let count = result.unwrap_or_else(|e| {
            warn!("[HV] guest {} hypercall {:?} failed: {}", guest_id, nr, e);
            self.events.push(VmEvent::HypercallFailed { guest_id, nr });
            0
        });
        guest.vcpu_mut().vmcs.regs.set_reg_of_index(0, count as u32);
        Ok(ExitAction::Resume)
    }

    /// Emulate the privileged instructions the trap configuration allows, reject the rest.
    fn handle_privileged_instruction(&mut self, guest_id: u32) -> HvResult {
        let guest = self
            .guests
            .get_mut(guest_id as usize)
            .ok_or(HvError::InvalidGuest(guest_id))?;
        let vcpu = guest.vcpu_mut();
        let instr = Instruction::from_word(vcpu.vmcs().exit_qualification);
        let trap_config = vcpu.trap_config();

        match Opcode::try_from(instr.opcode) {
            Ok(Opcode::TlbFlushV) if trap_config.contains(TrapConfig::PRIVILEGED_INSTR) => {
                vcpu.flush_tlb();
                debug!("[HV] guest {} emulated TLBFLUSHV", guest_id);
            }
            Ok(op @ (Opcode::LdPgtr | Opcode::LdHptr))
                if trap_config.contains(TrapConfig::PGTBL_ROOT_WRITE) =>
            {
                let Some(root) = vcpu.vmcs().regs.get(instr.rd) else {
                    warn!("[HV] guest {} {}: bad register r{}", guest_id, op.mnemonic(), instr.rd);
                    return Ok(());
                };
                if op == Opcode::LdPgtr {
                    vcpu.guest_page_table_root = root;
                    vcpu.vmcs.guest_page_table_root = root;
                    vcpu.flush_tlb();
                } else {
                    vcpu.host_page_table_root = root;
                    vcpu.vmcs.host_page_table_root = root;
                }
                debug!("[HV] guest {} emulated {} {:#x}", guest_id, op.mnemonic(), root);
            }
            _ => {
                warn!(
                    "[HV] guest {}: {} rejected",
                    guest_id,
                    HvError::PrivilegedInstruction(instr.opcode)
                );
            }
        }
        Ok(())
    }

    fn mailbox_offset(&self, guest_id: u32) -> Option<usize> {
        let entry = self.host_page_table.get(guest_id as usize)?;
        (entry.present && entry.owner == Some(guest_id)).then_some(guest_id as usize * PAGE_SIZE)
    }
}

impl Default for Hypervisor {
    fn default() -> Self {
        Self::new(HypervisorConfig::default())
    }
}

impl Drop for Hypervisor {
    fn drop(&mut self) {
        info!(
            "[HV] tearing down: {} guests, {} ticks",
            self.guests.len(),
            self.tick_count
        );
    }
}

impl core::fmt::Debug for Hypervisor {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Hypervisor")
            .field("mode", &self.mode)
            .field("current_guest_id", &self.current_guest_id)
            .field("guests", &self.guests.len())
            .field("tick_count", &self.tick_count)
            .field("halted", &self.halted)
            .finish()
    }
}
