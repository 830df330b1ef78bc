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

//! `visa-hv`: load guest images, schedule them to completion and dump the final state.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info};

use visa_hv::{
    GuestSnapshot, Hypervisor, HypervisorConfig, HypervisorSnapshot, MAX_GUESTS, RoundRobin,
    ScheduleReport, VmEvent,
};

#[derive(Parser)]
#[command(name = "visa-hv")]
#[command(about = "Software-simulated hypervisor for the vISA", long_about = None)]
struct Cli {
    /// Flat guest images, one guest per image
    #[arg(required = true, value_name = "IMAGE")]
    images: Vec<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = HypervisorConfig::default();
    let scheduler = RoundRobin::from_config(&config);
    let mut hv = Hypervisor::new(config);

    for path in &cli.images {
        match hv.create_guest(path) {
            Ok(id) => info!("guest {} <- {}", id, path.display()),
            Err(e) => error!("skipping {}: {}", path.display(), e),
        }
    }
    if hv.guest_count() == 0 {
        bail!("no guest could be created (at most {} images)", MAX_GUESTS);
    }
    render_events(hv.drain_events());

    // One pass at a time, so guest output shows up while the guests run.
    let mut report = ScheduleReport::default();
    while !hv.all_finished() {
        let pass = scheduler
            .run_passes(&mut hv, 1)
            .context("scheduling guests failed")?;
        report.passes += pass.passes;
        report.instructions += pass.instructions;
        render_events(hv.drain_events());
    }

    println!(
        "\n{} passes, {} instructions",
        report.passes, report.instructions
    );
    print!("{}", render_snapshot(&hv.snapshot()));
    Ok(())
}

fn render_events(events: Vec<VmEvent>) {
    for event in events {
        match event {
            VmEvent::GuestOutput { guest_id, message } => println!("[guest {}] {}", guest_id, message),
            VmEvent::GuestTerminated { guest_id, cause } => {
                println!("[guest {}] terminated: {:?}", guest_id, cause)
            }
            VmEvent::UnknownHypercall { guest_id, nr } => {
                println!("[guest {}] unknown hypercall {}", guest_id, nr)
            }
            VmEvent::HypercallFailed { guest_id, nr } => {
                println!("[guest {}] hypercall {:?} failed: buffer not mapped", guest_id, nr)
            }
            VmEvent::AccessSkipped { guest_id, gva } => {
                println!("[guest {}] access to {:?} skipped", guest_id, gva)
            }
            _ => {}
        }
    }
}

fn render_snapshot(snapshot: &HypervisorSnapshot) -> String {
    let mut out = String::new();
    out.push_str("\n[HYPERVISOR STATE]\n");
    out.push_str(&format!("Mode: {:?}\n", snapshot.mode));
    out.push_str(&format!("Guests: {}/{}\n", snapshot.guest_count, MAX_GUESTS));
    out.push_str(&format!("Ticks: {}\n", snapshot.tick_count));
    for guest in &snapshot.guests {
        out.push_str(&render_guest(guest));
    }
    out
}

fn render_guest(guest: &GuestSnapshot) -> String {
    let mut out = format!("\n  [GUEST {}]\n", guest.id);
    let state = if guest.terminated {
        format!("{:?} (terminated)", guest.state)
    } else {
        format!("{:?}", guest.state)
    };
    out.push_str(&format!("  State: {}\n", state));
    out.push_str(&format!("  PC: {:#010x}\n", guest.pc));
    out.push_str(&format!("  SP: {:#010x}\n", guest.sp));
    out.push_str(&format!("  Priv: {:?}\n", guest.privilege));
    out.push_str(&format!(
        "  Roots: guest {:#x} host {:#x}\n",
        guest.guest_page_table_root, guest.host_page_table_root
    ));
    out.push_str(&format!("  Traps: {:?}\n", guest.trap_config));
    out.push_str(&format!("  Last exit: {:?}\n", guest.last_exit_cause));
    out.push_str(&format!("  Instructions: {}\n", guest.instruction_count));
    out.push_str(&format!(
        "  TLB: {} entries{}\n",
        guest.tlb_entry_count,
        if guest.tlb_valid { "" } else { " (invalid)" }
    ));
    let regs = guest.registers.as_array();
    for (i, chunk) in regs.chunks(8).enumerate() {
        let line: Vec<String> = chunk
            .iter()
            .enumerate()
            .map(|(j, v)| format!("r{:<2}={:#010x}", i * 8 + j, v))
            .collect();
        out.push_str(&format!("  {}\n", line.join(" ")));
    }
    out
}
