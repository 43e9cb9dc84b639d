/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod serial_backend;
pub use serial_backend::{SerialMTKPort, find_mtk_serial_ports};
pub mod mock_backend;
pub use mock_backend::MockPort;
