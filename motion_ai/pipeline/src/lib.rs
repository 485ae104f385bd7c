//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod config;
pub mod frame;
pub mod motion;
pub mod presence;
pub mod traits;
pub mod zone;
