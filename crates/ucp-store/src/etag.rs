// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Content-derived ETags.

use sha2::{Digest, Sha256};

/// Compute the ETag for serialized resource data.
pub fn new(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
