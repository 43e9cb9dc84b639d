/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod connection;
pub mod core;
pub mod error;

pub use crate::connection::Connection;
pub use crate::connection::backend::find_mtk_serial_ports;
pub use crate::core::device::Device;
pub use crate::error::{ProtocolError, Result};
