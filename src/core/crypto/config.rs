/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::error::Result;

/// Register-level access used by the hardware crypto drivers. The BROM
/// command channel implements this, and so does any already-running agent
/// that exposes equivalent read/write semantics (see `core::stage2`).
#[async_trait::async_trait(?Send)]
pub trait CryptoIO {
    async fn read32(&mut self, addr: u32, dwords: usize) -> Result<Vec<u32>>;
    async fn write32(&mut self, addr: u32, words: &[u32]) -> Result<()>;
    /// Byte-buffer write in LE words, zero-padded; the drivers depend on
    /// this exact layout for their scratch buffers.
    async fn writemem(&mut self, addr: u32, data: &[u8]) -> Result<()>;
    /// Cache-control hook invoked before blacklist manipulation.
    async fn refresh_cache(&mut self, cmd: u8) -> Result<()>;
}

/// Everything a crypto driver needs to know about the connected chip,
/// bundled with the register transport.
pub struct CryptoSetup<'a> {
    pub hwcode: u16,
    pub dxcc_base: u32,
    pub da_payload_addr: u32,
    pub io: &'a mut dyn CryptoIO,
}

impl<'a> CryptoSetup<'a> {
    pub fn new(
        hwcode: u16,
        dxcc_base: u32,
        da_payload_addr: u32,
        io: &'a mut dyn CryptoIO,
    ) -> Self {
        Self {
            hwcode,
            dxcc_base,
            da_payload_addr,
            io,
        }
    }
}
