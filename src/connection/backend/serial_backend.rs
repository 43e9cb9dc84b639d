/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::connection::port::{ConnectionType, KNOWN_PORTS, MTKPort};
use log::{error, info};
use tokio::io::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{
    SerialPort, SerialPortBuilderExt, SerialPortInfo, SerialPortType, SerialStream,
};

#[derive(Debug)]
pub struct SerialMTKPort {
    port: Option<SerialStream>,
    port_info: SerialPortInfo,
    baudrate: u32,
    connection_type: ConnectionType,
}

impl SerialMTKPort {
    pub fn new(port_info: SerialPortInfo, baudrate: u32, connection_type: ConnectionType) -> Self {
        Self {
            port: None,
            port_info,
            baudrate,
            connection_type,
        }
    }

    pub fn from_port_info(port_info: SerialPortInfo) -> Option<Self> {
        let connection_type = match &port_info.port_type {
            SerialPortType::UsbPort(usb_info) => match (usb_info.vid, usb_info.pid) {
                (0x0e8d, 0x0003) => ConnectionType::Brom,
                (0x0e8d, 0x2000) => ConnectionType::Preloader,
                (0x0e8d, 0x2001) => ConnectionType::Da,
                _ => {
                    error!(
                        "Unknown MTK port type: {:04x}:{:04x}",
                        usb_info.vid, usb_info.pid
                    );
                    return None;
                }
            },
            _ => {
                error!("Not a USB serial port");
                return None;
            }
        };

        let baudrate: u32 = match connection_type {
            ConnectionType::Brom => 115_200,
            ConnectionType::Preloader | ConnectionType::Da => 921_600,
        };

        Some(SerialMTKPort::new(port_info, baudrate, connection_type))
    }

    fn stream(&mut self) -> Result<&mut SerialStream> {
        self.port.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "Port is not open")
        })
    }
}

#[async_trait::async_trait]
impl MTKPort for SerialMTKPort {
    async fn open(&mut self) -> Result<()> {
        if self.port.is_none() {
            self.port = Some(
                tokio_serial::new(&self.port_info.port_name, self.baudrate)
                    .timeout(std::time::Duration::from_millis(1000))
                    .open_native_async()?,
            );
            info!(
                "Opened MTK serial port: {} with baudrate {}",
                self.port_info.port_name, self.baudrate
            );
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.port.take();
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream()?.read_exact(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream()?.write_all(buf).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.stream()?.clear(tokio_serial::ClearBuffer::Input)?;
        Ok(())
    }

    async fn set_break(&mut self) -> Result<()> {
        self.stream()?.set_break()?;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        self.stream()?.clear_break()?;
        Ok(())
    }

    async fn set_line_coding(&mut self, baudrate: u32) -> Result<()> {
        self.stream()?.set_baud_rate(baudrate)?;
        Ok(())
    }

    fn get_connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    fn get_baudrate(&self) -> u32 {
        self.baudrate
    }

    fn get_port_name(&self) -> String {
        self.port_info.port_name.clone()
    }
}

pub fn find_mtk_serial_ports() -> Vec<SerialPortInfo> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .filter(|p| match &p.port_type {
                SerialPortType::UsbPort(usb_info) => KNOWN_PORTS
                    .iter()
                    .any(|(vid, pid)| usb_info.vid == *vid && usb_info.pid == *pid),
                _ => false,
            })
            .collect(),
        Err(e) => {
            error!("Error listing serial ports: {}", e);
            vec![]
        }
    }
}
