/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! Register transport over an already-running stage2 agent.
//!
//! Once second-stage code executes on the device, the echo-based BROM
//! protocol is gone; the agent instead accepts magic-word framed commands.
//! The semantics of `read32`/`write32`/`writemem` stay identical, so the
//! crypto drivers run unchanged on top of this client.

use crate::connection::port::MTKPort;
use crate::core::crypto::config::CryptoIO;
use crate::error::{ProtocolError, Result};
use log::error;

const STAGE2_MAGIC: u32 = 0xF00DD00D;
const CMD_WRITE32: u32 = 0x4000;
const CMD_READ32: u32 = 0x4002;
const CMD_FLUSH_CACHE: u32 = 0x5000;
const ACK: [u8; 4] = [0xD0, 0xD0, 0xD0, 0xD0];

#[derive(Debug)]
pub struct Stage2Client {
    pub port: Box<dyn MTKPort>,
}

impl Stage2Client {
    pub fn new(port: Box<dyn MTKPort>) -> Self {
        Self { port }
    }

    async fn send_word(&mut self, value: u32) -> Result<()> {
        self.port.write_all(&value.to_be_bytes()).await?;
        Ok(())
    }

    async fn read_ack(&mut self, what: &str) -> Result<()> {
        let mut ack = [0u8; 4];
        self.port.read_exact(&mut ack).await?;
        if ack != ACK {
            error!("Stage2 {} not acknowledged: {:02X?}", what, ack);
            return Err(ProtocolError::EchoMismatch);
        }
        Ok(())
    }
}

#[async_trait::async_trait(?Send)]
impl CryptoIO for Stage2Client {
    async fn read32(&mut self, addr: u32, dwords: usize) -> Result<Vec<u32>> {
        let mut result = Vec::with_capacity(dwords);
        for pos in 0..dwords as u32 {
            self.send_word(STAGE2_MAGIC).await?;
            self.send_word(CMD_READ32).await?;
            self.send_word(addr + pos * 4).await?;
            self.send_word(4).await?;
            let mut word = [0u8; 4];
            self.port.read_exact(&mut word).await?;
            result.push(u32::from_le_bytes(word));
        }
        Ok(result)
    }

    async fn write32(&mut self, addr: u32, words: &[u32]) -> Result<()> {
        for (pos, word) in words.iter().enumerate() {
            self.send_word(STAGE2_MAGIC).await?;
            self.send_word(CMD_WRITE32).await?;
            self.send_word(addr + (pos as u32) * 4).await?;
            self.send_word(4).await?;
            self.port.write_all(&word.to_le_bytes()).await?;
            self.read_ack("write32").await?;
        }
        Ok(())
    }

    async fn writemem(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        for (i, chunk) in data.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write32(addr + (i as u32) * 4, &[u32::from_le_bytes(word)])
                .await?;
        }
        Ok(())
    }

    async fn refresh_cache(&mut self, _cmd: u8) -> Result<()> {
        self.send_word(STAGE2_MAGIC).await?;
        self.send_word(CMD_FLUSH_CACHE).await?;
        self.read_ack("cache flush").await
    }
}
