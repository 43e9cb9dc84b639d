/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use tokio::io::Result;

pub const KNOWN_PORTS: &[(u16, u16)] = &[
    (0x0e8d, 0x0003), // Mediatek USB Port (BROM)
    (0x0e8d, 0x2000), // Mediatek USB Port (Preloader)
    (0x0e8d, 0x2001), // Mediatek USB Port (DA)
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Brom,
    Preloader,
    Da,
}

/// Byte-oriented CDC link to the device. The protocol layer only ever uses
/// these primitives; everything above (echo, commands, crypto) is built on
/// top of them.
#[async_trait::async_trait]
pub trait MTKPort: Send + std::fmt::Debug {
    async fn open(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<usize>;
    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
    /// Pulses a line break, used to re-arm the BROM handshake listener.
    async fn set_break(&mut self) -> Result<()>;
    async fn set_line_coding(&mut self, baudrate: u32) -> Result<()>;
    fn get_connection_type(&self) -> ConnectionType;
    fn get_baudrate(&self) -> u32;
    fn get_port_name(&self) -> String;
}
