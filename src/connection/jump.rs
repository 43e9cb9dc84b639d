/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::connection::Connection;
use crate::connection::command::Command;
use crate::error::{ProtocolError, Result, status_str};
use log::{error, info};

impl Connection {
    /// Transfers control to uploaded 32-bit code at `addr`.
    pub async fn jump_da(&mut self, addr: u32) -> Result<()> {
        info!("Jumping to {:#010X}", addr);
        self.jump(Command::JumpDa, addr, false).await
    }

    /// 64-bit variant: after the address round-trips, a mode byte selects
    /// the aarch64 entry.
    pub async fn jump_da64(&mut self, addr: u32) -> Result<()> {
        info!("Jumping to {:#010X} (64-bit)", addr);
        self.jump(Command::JumpDa64, addr, true).await
    }

    async fn jump(&mut self, cmd: Command, addr: u32, mode64: bool) -> Result<()> {
        self.echo_or_desync(&[cmd as u8]).await?;
        self.echo_u32_or_desync(addr).await?;

        // The device now answers with the accepted address: new data, not
        // an echo. Short reads here mean the jump never happened.
        let resaddr = match self.read_u32_le().await {
            Ok(v) => v,
            Err(e) => {
                error!("JumpDa response error at {:#010X}: {}", addr, e);
                return Err(ProtocolError::JumpFailed { addr });
            }
        };
        if resaddr != addr {
            error!(
                "JumpDa address mismatch: sent {:#010X}, got {:#010X}",
                addr, resaddr
            );
            return Err(ProtocolError::JumpFailed { addr });
        }

        if mode64 {
            self.echo_or_desync(&[0x01]).await?;
        }

        let status = match self.read_status().await {
            Ok(v) => v,
            Err(e) => {
                error!("JumpDa status error at {:#010X}: {}", addr, e);
                return Err(ProtocolError::JumpFailed { addr });
            }
        };
        if status != 0 {
            error!("JumpDa status error: {}", status_str(status));
            return Err(ProtocolError::status(status));
        }
        Ok(())
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

    #[tokio::test]
    async fn jump_da_verifies_returned_address_and_status() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0xD5]);
        handle.queue(&0x00201000u32.to_be_bytes());
        handle.queue_u32_le(0x00201000); // device reports the entry address
        handle.queue_u16_le(0x0000);

        conn.jump_da(0x00201000).await.unwrap();
        assert_eq!(handle.remaining_rx(), 0);
    }

    #[tokio::test]
    async fn jump_da_rejects_wrong_returned_address() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0xD5]);
        handle.queue(&0x00201000u32.to_be_bytes());
        handle.queue_u32_le(0x00100000);

        let err = conn.jump_da(0x00201000).await.unwrap_err();
        assert!(matches!(err, ProtocolError::JumpFailed { addr: 0x00201000 }));
    }

    #[tokio::test]
    async fn jump_da_short_read_reports_jump_failure() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0xD5]);
        handle.queue(&0x00201000u32.to_be_bytes());
        // No address word queued: the read times out.

        let err = conn.jump_da(0x00201000).await.unwrap_err();
        assert!(matches!(err, ProtocolError::JumpFailed { .. }));
    }

    #[tokio::test]
    async fn jump_da64_sends_mode_byte_after_address() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0xDE]);
        handle.queue(&0x40000000u32.to_be_bytes());
        handle.queue_u32_le(0x40000000);
        handle.queue(&[0x01]); // mode byte echo
        handle.queue_u16_le(0x0000);

        conn.jump_da64(0x40000000).await.unwrap();
        let writes = handle.writes();
        assert_eq!(writes.last().unwrap(), &vec![0x01]);
    }
}
