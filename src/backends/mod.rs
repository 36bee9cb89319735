// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for capture devices
//!
//! # Modules
//!
//! - [`camera`]: capture source seam, frame types, and a synthetic test-pattern camera

pub mod camera;
