// Copyright 2025 Google LLC
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

use rand::RngCore as _;

/// Generate a process-unique id.
///
/// The id combines a millisecond timestamp with 128 bits from the
/// thread rng (a CSPRNG), hex encoded. The timestamp keeps ids
/// roughly sortable in logs; the random half rules out collisions
/// across a long-lived broker.
pub fn unique_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let entropy = u128::from_le_bytes(bytes);
    format!("{:x}-{:032x}", chrono::Utc::now().timestamp_millis(), entropy)
}
