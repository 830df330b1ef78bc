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

//! Tests for GeneralRegisters structure.

use crate::regs::{GeneralRegisters, GeneralRegistersDiff};

#[test]
fn test_general_registers_default() {
    let regs = GeneralRegisters::default();
    assert!(regs.as_array().iter().all(|&r| r == 0));
}

#[test]
fn test_general_registers_copy_eq() {
    let mut regs1 = GeneralRegisters::default();
    regs1.set_reg_of_index(3, 0xabcd);

    let regs2 = regs1; // Copy
    assert_eq!(regs1, regs2);

    let mut regs3 = regs2;
    regs3.set_reg_of_index(31, 1);
    assert_ne!(regs1, regs3);
}

#[test]
fn test_register_names() {
    assert_eq!(GeneralRegisters::REGISTER_NAMES.len(), 32);
    assert_eq!(GeneralRegisters::register_name(0), "r0");
    assert_eq!(GeneralRegisters::register_name(15), "r15");
    assert_eq!(GeneralRegisters::register_name(31), "r31");
}

#[test]
fn test_get_set_checked() {
    let mut regs = GeneralRegisters::default();
    assert!(regs.set(7, 0x77));
    assert_eq!(regs.get(7), Some(0x77));
    assert!(!regs.set(32, 1));
    assert_eq!(regs.get(32), None);
    assert_eq!(regs.get(255), None);
    assert!(GeneralRegisters::is_valid_index(31));
    assert!(!GeneralRegisters::is_valid_index(32));
}

#[test]
fn test_set_reg_of_index() {
    let mut regs = GeneralRegisters::default();
    for i in 0..32u8 {
        regs.set_reg_of_index(i, 0x100 + i as u32);
    }
    for i in 0..32u8 {
        assert_eq!(regs.get_reg_of_index(i), 0x100 + i as u32);
    }
}

#[test]
#[should_panic(expected = "Illegal index")]
fn test_get_reg_invalid_index_high() {
    let regs = GeneralRegisters::default();
    let _ = regs.get_reg_of_index(32);
}

#[test]
#[should_panic(expected = "Illegal index")]
fn test_set_reg_invalid_index_high() {
    let mut regs = GeneralRegisters::default();
    regs.set_reg_of_index(200, 0);
}

#[test]
fn test_diff_reports_changed_registers() {
    let old = GeneralRegisters::default();
    let mut new = old;
    assert!(GeneralRegistersDiff::new(old, new).is_same());

    new.set_reg_of_index(2, 0x10);
    new.set_reg_of_index(30, 0x20);
    let diff = GeneralRegistersDiff::new(old, new);
    assert!(!diff.is_same());
    assert_eq!(diff.changed().collect::<Vec<_>>(), vec![2, 30]);

    let debug_str = format!("{:?}", diff);
    assert!(debug_str.contains("GeneralRegistersDiff"));
    assert!(debug_str.contains("r2"));
    assert!(debug_str.contains("0x0 -> 0x10"));
    assert!(!debug_str.contains("r5"));
}
