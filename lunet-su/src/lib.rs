// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
//! Write-once 4 KiB block store with a durable commit bitmap, exposed to
//! scripts as the `su` module (spec.md §4.K, §6).

mod bitmap;
mod ops;
mod unit;

pub use ops::{install, StorageUnitLua};
pub use unit::StorageUnit;
