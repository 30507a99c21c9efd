// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Child object synchronization.

pub mod child;

pub use child::{ChildSynchronizer, ChildTemplate, SyncAction, Synced};
