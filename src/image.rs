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

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::mem::GUEST_PHYS_MEMORY_SIZE;
use crate::{HvError, HvResult};

/// Read a flat guest image, at most [`GUEST_PHYS_MEMORY_SIZE`] bytes of it.
pub fn load_image_file(path: &Path) -> HvResult<Vec<u8>> {
    let load_failed = |e: std::io::Error| HvError::ImageLoadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let file = File::open(path).map_err(load_failed)?;
    let mut image = Vec::new();
    file.take(GUEST_PHYS_MEMORY_SIZE as u64)
        .read_to_end(&mut image)
        .map_err(load_failed)?;
    if image.is_empty() {
        return Err(HvError::ImageEmpty);
    }
    debug!("[HV] loaded {} bytes from {}", image.len(), path.display());
    Ok(image)
}
