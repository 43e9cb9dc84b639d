/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! Scripted in-memory port for unit testing the protocol layer.
//!
//! Tests queue the exact byte stream the device would produce (echoes
//! included) and inspect the captured writes afterwards.

use crate::connection::port::{ConnectionType, MTKPort};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::Result;

#[derive(Debug, Default)]
struct MockState {
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    opens: u32,
    breaks: u32,
    line_codings: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct MockPort {
    state: Arc<Mutex<MockState>>,
    connection_type: ConnectionType,
    baudrate: u32,
}

impl MockPort {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            connection_type: ConnectionType::Brom,
            baudrate: 115_200,
        }
    }

    /// Handle for queueing responses and inspecting traffic after the port
    /// has been boxed into a `Connection`.
    pub fn handle(&self) -> MockPort {
        self.clone()
    }

    pub fn queue(&self, data: &[u8]) {
        self.state.lock().unwrap().rx.extend(data.iter().copied());
    }

    pub fn queue_u16_le(&self, value: u16) {
        self.queue(&value.to_le_bytes());
    }

    pub fn queue_u32_le(&self, value: u32) {
        self.queue(&value.to_le_bytes());
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    /// All captured writes flattened into one stream.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state.lock().unwrap().writes.concat()
    }

    pub fn breaks(&self) -> u32 {
        self.state.lock().unwrap().breaks
    }

    pub fn opens(&self) -> u32 {
        self.state.lock().unwrap().opens
    }

    pub fn line_codings(&self) -> Vec<u32> {
        self.state.lock().unwrap().line_codings.clone()
    }

    pub fn remaining_rx(&self) -> usize {
        self.state.lock().unwrap().rx.len()
    }
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MTKPort for MockPort {
    async fn open(&mut self) -> Result<()> {
        self.state.lock().unwrap().opens += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.rx.len() < buf.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "mock rx queue exhausted",
            ));
        }
        for slot in buf.iter_mut() {
            *slot = state.rx.pop_front().unwrap();
        }
        Ok(buf.len())
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.state.lock().unwrap().writes.push(buf.to_vec());
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    async fn set_break(&mut self) -> Result<()> {
        self.state.lock().unwrap().breaks += 1;
        Ok(())
    }

    async fn set_line_coding(&mut self, baudrate: u32) -> Result<()> {
        self.state.lock().unwrap().line_codings.push(baudrate);
        Ok(())
    }

    fn get_connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    fn get_baudrate(&self) -> u32 {
        self.baudrate
    }

    fn get_port_name(&self) -> String {
        String::from("mock")
    }
}
