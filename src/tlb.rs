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

//! A small per-vCPU translation cache for the first translation stage.

use alloc::collections::VecDeque;

/// A cached guest-virtual page → guest-physical frame translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub page: usize,
    pub frame: u32,
    pub writable: bool,
}

/// FIFO-replaced translation cache.
///
/// `valid` is cleared by a flush and set again by the first insertion after it.
#[derive(Debug, Clone)]
pub struct Tlb {
    entries: VecDeque<TlbEntry>,
    capacity: usize,
    valid: bool,
}

impl Tlb {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            valid: false,
        }
    }

    pub fn lookup(&self, page: usize) -> Option<TlbEntry> {
        if !self.valid {
            return None;
        }
        self.entries.iter().find(|e| e.page == page).copied()
    }

    pub fn insert(&mut self, page: usize, frame: u32, writable: bool) {
        if self.capacity == 0 {
            return;
        }
        self.invalidate_page(page);
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(TlbEntry {
            page,
            frame,
            writable,
        });
        self.valid = true;
    }

    /// Drop the cached translation of one page (the `invlpg` of this ISA).
    pub fn invalidate_page(&mut self, page: usize) {
        self.entries.retain(|e| e.page != page);
    }

    pub fn flush(&mut self) {
        self.entries.clear();
        self.valid = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}
