// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Port allocation for containerized workspaces.
//!
//! Ports live in a JSON table shared by every `berth` process on the
//! machine. [`DirLock`] serializes mutations; [`PortAllocator`] implements
//! acquire, release and prune on top of it.

mod allocator;
mod lock;
mod table;

pub use allocator::{PortAllocator, PortAssignment};
pub use lock::{DirLock, DirLockGuard};
pub use table::{PortMap, PortTable};
