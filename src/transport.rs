//! Narrow transport seam between the sequencer and the physical link.

use serde::{Deserialize, Serialize};
use serialport::SerialPortType;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::Result;

pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Byte pipe to the device. The sequencer only ever needs ordered chunk
/// reads and fire-and-forget writes; framing lives entirely above this.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Write the full command to the device.
    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Read whatever bytes are available, in arrival order. `Ok(0)` means
    /// the link is gone.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

#[async_trait::async_trait]
impl<T> Transport for T
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        AsyncWriteExt::write_all(self, bytes).await?;
        AsyncWriteExt::flush(self).await
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }
}

/// A serial port visible on the host, with USB metadata when the port has
/// any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// List serial ports available on this host.
pub fn discover_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    let mut infos = Vec::with_capacity(ports.len());

    for port in ports {
        let mut info = PortInfo {
            port_name: port.port_name.clone(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        };
        if let SerialPortType::UsbPort(usb) = port.port_type {
            info.vid = Some(usb.vid);
            info.pid = Some(usb.pid);
            info.serial_number = usb.serial_number;
            info.manufacturer = usb.manufacturer;
            info.product = usb.product;
        }
        infos.push(info);
    }

    Ok(infos)
}

/// Open a serial port as an async byte stream usable as a [`Transport`].
pub fn open_serial(path: &str, baud_rate: u32) -> Result<SerialStream> {
    let stream = tokio_serial::new(path, baud_rate).open_native_async()?;
    log::info!("Connected to {} at {} baud", path, baud_rate);
    Ok(stream)
}
