//! SecureEye camera hub: zone detection workers, their supervisor and alert delivery.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

#[macro_use]
extern crate log;

pub mod config;
pub mod detection_log;
pub mod events;
pub mod frame_source;
pub mod sink;
pub mod supervisor;
pub mod synthetic;
pub mod traits;
pub mod worker;
pub mod zone_store;

#[cfg(test)]
mod test_util;

pub use secureeye_motion_ai::zone::Zone;
