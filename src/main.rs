/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use antumbra::connection::backend::{SerialMTKPort, find_mtk_serial_ports};
use antumbra::core::device::Device;
use env_logger::Builder;
use log::{error, info};
use std::fs;
use std::path::Path;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let mut ports = find_mtk_serial_ports();
    if ports.is_empty() {
        error!("No MTK ports found. Please connect a device.");
        std::process::exit(1);
    }
    let port_info = ports.remove(0);
    info!("Found MTK port: {}", port_info.port_name);

    let Some(port) = SerialMTKPort::from_port_info(port_info) else {
        error!("Failed to open MTK connection!");
        std::process::exit(1);
    };

    let device = match Device::init(Box::new(port), None).await {
        Ok(device) => device,
        Err(e) => {
            error!("Device init failed: {}", e);
            std::process::exit(1);
        }
    };

    // Downstream tooling picks the identifiers up from flat files.
    let logs = Path::new("logs");
    fs::create_dir_all(logs)?;
    fs::write(logs.join("hwcode"), format!("{:#x}", device.info.hw_code))?;
    if device.info.meid.len() >= 16 {
        fs::write(logs.join("meid"), hex::encode(&device.info.meid))?;
    }
    if device.info.socid.len() >= 16 {
        fs::write(logs.join("socid"), hex::encode(&device.info.socid))?;
    }
    info!("Device initialized, identifiers stored in logs/");
    Ok(())
}
