//! Physical links
//!
//! A physical link is one serial port. Writes are synchronous and report how
//! many bytes the port accepted. Reads happen on a background thread that turns
//! port activity into [`LinkEvent`]s for the transport driver.

use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::READ_BUFFER_SIZE;

/// Which physical link an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkId {
    /// Command port; every request is written here
    Command,
    /// TTL port; only present in USB Dual Port mode
    Telemetry,
}

impl LinkId {
    pub(crate) fn index(self) -> usize {
        match self {
            LinkId::Command => 0,
            LinkId::Telemetry => 1,
        }
    }
}

/// Activity reported by a physical link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The port is open and writable
    Open(LinkId),
    /// Bytes read from the port
    Data(LinkId, Vec<u8>),
    /// The port failed or was unplugged
    Disconnected(LinkId),
}

/// Downstream capability a transport writes through
pub trait PhysicalLink: Send {
    /// Port name, for logging
    fn name(&self) -> &str;

    /// Write bytes, returning how many the port accepted
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Discard anything received but not yet read
    fn clear_input(&mut self) -> io::Result<()>;

    /// Close the port
    fn close(&mut self) -> io::Result<()>;
}

/// Serial port backed link
pub struct SerialLink {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    stop: Arc<AtomicBool>,
}

impl SerialLink {
    /// Wrap an opened port and start its reader thread
    ///
    /// The port is already open when this is called, so `Open` is reported
    /// straight away.
    pub fn start(
        id: LinkId,
        name: &str,
        port: Box<dyn SerialPort>,
        events: UnboundedSender<LinkEvent>,
    ) -> io::Result<Self> {
        let reader = port.try_clone().map_err(io::Error::other)?;
        let stop = Arc::new(AtomicBool::new(false));

        spawn_reader(id, name.to_string(), reader, events.clone(), stop.clone());
        let _ = events.send(LinkEvent::Open(id));

        Ok(Self {
            name: name.to_string(),
            port: Some(port),
            stop,
        })
    }
}

impl PhysicalLink for SerialLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))?;
        let written = port.write(bytes)?;
        port.flush()?;
        Ok(written)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        if let Some(port) = self.port.as_mut() {
            port.clear(ClearBuffer::Input)?;
            debug!(port = %self.name, "Cleared input buffer");
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the handle closes the port
        if self.port.take().is_some() {
            info!(port = %self.name, "Closed serial port");
        }
        Ok(())
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Spawn the thread that reads a port until it fails or is closed
fn spawn_reader(
    id: LinkId,
    name: String,
    mut port: Box<dyn SerialPort>,
    events: UnboundedSender<LinkEvent>,
    stop: Arc<AtomicBool>,
) {
    thread::spawn(move || {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        while !stop.load(Ordering::SeqCst) {
            match port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    if events.send(LinkEvent::Data(id, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if !stop.load(Ordering::SeqCst) {
                        warn!(port = %name, error = %e, "Serial read failed, link disconnected");
                        let _ = events.send(LinkEvent::Disconnected(id));
                    }
                    break;
                }
            }
        }
        debug!(port = %name, "Reader thread exiting");
    });
}
