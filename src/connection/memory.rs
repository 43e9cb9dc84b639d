/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::connection::Connection;
use crate::connection::command::Command;
use crate::core::crypto::config::CryptoIO;
use crate::error::{ProtocolError, Result, status_str};
use log::error;

impl Connection {
    /// Reads `dwords` 32-bit words starting at `addr`.
    ///
    /// Wire shape: echoed opcode, echoed BE address and count, LE status,
    /// LE data words, trailing LE status. Never returns partial data: any
    /// failing status yields an error instead.
    pub async fn read32(&mut self, addr: u32, dwords: usize) -> Result<Vec<u32>> {
        self.echo_or_desync(&[Command::Read32 as u8]).await?;
        self.echo_u32_or_desync(addr).await?;
        let ack = self.echo_u32(dwords as u32).await?;
        let status = self.read_status().await?;
        if !ack || status > 0xFF {
            error!(
                "Error on read32, addr {:#010X}: {}",
                addr,
                status_str(status)
            );
            return Err(ProtocolError::status(status));
        }

        let mut result = Vec::with_capacity(dwords);
        for _ in 0..dwords {
            result.push(self.read_u32_le().await?);
        }

        let status2 = self.read_status().await?;
        if status2 > 0xFF {
            error!(
                "Error on read32, addr {:#010X}: {}",
                addr,
                status_str(status2)
            );
            return Err(ProtocolError::status(status2));
        }
        Ok(result)
    }

    /// Writes 32-bit words starting at `addr`. Every word is individually
    /// echo-acknowledged; the device closes the transaction with a second
    /// status word.
    pub async fn write32(&mut self, addr: u32, dwords: &[u32]) -> Result<()> {
        self.echo_or_desync(&[Command::Write32 as u8]).await?;
        self.echo_u32_or_desync(addr).await?;
        let ack = self.echo_u32(dwords.len() as u32).await?;
        let status = self.read_status().await?;
        if status > 0xFF {
            error!(
                "Error on write32, addr {:#010X}: {}",
                addr,
                status_str(status)
            );
            return Err(ProtocolError::status(status));
        }
        if !ack || status > 3 {
            return Err(ProtocolError::EchoMismatch);
        }

        for dword in dwords {
            if !self.echo_u32(*dword).await? {
                break;
            }
        }

        let status2 = self.read_status().await?;
        if status2 > 0xFF {
            error!(
                "Error on write32, addr {:#010X}: {}",
                addr,
                status_str(status2)
            );
            return Err(ProtocolError::status(status2));
        }
        Ok(())
    }

    /// Writes a byte buffer word by word, zero-padding the final partial
    /// word. The crypto drivers rely on exactly this layout.
    pub async fn writemem(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        for (i, chunk) in data.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write32(addr + (i as u32) * 4, &[u32::from_le_bytes(word)])
                .await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait(?Send)]
impl CryptoIO for Connection {
    async fn read32(&mut self, addr: u32, dwords: usize) -> Result<Vec<u32>> {
        Connection::read32(self, addr, dwords).await
    }

    async fn write32(&mut self, addr: u32, words: &[u32]) -> Result<()> {
        Connection::write32(self, addr, words).await
    }

    async fn writemem(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        Connection::writemem(self, addr, data).await
    }

    async fn refresh_cache(&mut self, cmd: u8) -> Result<()> {
        self.run_ext_cmd(cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::backend::MockPort;

    fn mock_connection() -> (Connection, MockPort) {
        let port = MockPort::new();
        let handle = port.handle();
        (Connection::new(Box::new(port)), handle)
    }

    /// Queues the echoes of a read32/write32 command preamble.
    fn queue_preamble(handle: &MockPort, opcode: u8, addr: u32, count: u32) {
        handle.queue(&[opcode]);
        handle.queue(&addr.to_be_bytes());
        handle.queue(&count.to_be_bytes());
    }

    #[tokio::test]
    async fn read32_returns_words_on_clean_statuses() {
        let (mut conn, handle) = mock_connection();
        queue_preamble(&handle, 0xD1, 0x1000, 2);
        handle.queue_u16_le(0x0000);
        handle.queue_u32_le(0x11223344);
        handle.queue_u32_le(0xAABBCCDD);
        handle.queue_u16_le(0x0000);

        let words = conn.read32(0x1000, 2).await.unwrap();
        assert_eq!(words, vec![0x11223344, 0xAABBCCDD]);
        assert_eq!(handle.remaining_rx(), 0);
    }

    #[tokio::test]
    async fn read32_fails_on_first_status() {
        let (mut conn, handle) = mock_connection();
        queue_preamble(&handle, 0xD1, 0x1000, 1);
        handle.queue_u16_le(0x1001);

        let err = conn.read32(0x1000, 1).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Status { code: 0x1001 }));
    }

    #[tokio::test]
    async fn read32_rejects_partial_data_on_trailing_status() {
        let (mut conn, handle) = mock_connection();
        queue_preamble(&handle, 0xD1, 0x2000, 1);
        handle.queue_u16_le(0x0000);
        handle.queue_u32_le(0xDEADBEEF);
        handle.queue_u16_le(0x0100);

        let err = conn.read32(0x2000, 1).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Status { code: 0x0100 }));
    }

    #[tokio::test]
    async fn write32_succeeds_with_clean_statuses() {
        let (mut conn, handle) = mock_connection();
        queue_preamble(&handle, 0xD4, 0x1000, 1);
        handle.queue_u16_le(0x0000);
        handle.queue(&0xAABBCCDDu32.to_be_bytes()); // word echo
        handle.queue_u16_le(0x0000);

        conn.write32(0x1000, &[0xAABBCCDD]).await.unwrap();
        let bytes = handle.written_bytes();
        // opcode, BE addr, BE count, BE word
        assert_eq!(
            bytes,
            vec![0xD4, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB, 0xCC, 0xDD]
        );
    }

    #[tokio::test]
    async fn write32_fails_on_trailing_status() {
        let (mut conn, handle) = mock_connection();
        queue_preamble(&handle, 0xD4, 0x1000, 1);
        handle.queue_u16_le(0x0000);
        handle.queue(&0xAABBCCDDu32.to_be_bytes());
        handle.queue_u16_le(0x0100);

        let err = conn.write32(0x1000, &[0xAABBCCDD]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Status { code: 0x0100 }));
    }

    #[tokio::test]
    async fn writemem_pads_final_word_and_steps_addresses() {
        let (mut conn, handle) = mock_connection();
        // Two write32 transactions: 5 bytes -> words 0x44332211, 0x00000055.
        for (addr, word) in [(0x100u32, 0x44332211u32), (0x104, 0x00000055)] {
            queue_preamble(&handle, 0xD4, addr, 1);
            handle.queue_u16_le(0x0000);
            handle.queue(&word.to_be_bytes());
            handle.queue_u16_le(0x0000);
        }

        conn.writemem(0x100, &[0x11, 0x22, 0x33, 0x44, 0x55])
            .await
            .unwrap();
        assert_eq!(handle.remaining_rx(), 0);
    }
}
