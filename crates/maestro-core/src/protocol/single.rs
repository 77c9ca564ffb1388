//! USB Chained mode transport
//!
//! In USB Chained mode the Maestro reads commands from and writes replies to
//! the command port, so a single link carries everything. Scripts cannot send
//! data back to the host in this mode.

use std::time::Instant;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use super::link::{LinkId, PhysicalLink};
use super::TransportError;
use super::transport::{
    CompletionHandler, PendingRequest, RequestQueue, ResponseHandler, Transport, TransportConfig,
    TransportEvent, TransportState,
};
use crate::config::SerialMode;

/// Transport over one physical link
pub struct SingleChannelTransport {
    link: Box<dyn PhysicalLink>,
    queue: RequestQueue,
}

impl SingleChannelTransport {
    /// Wrap a link. The transport stays disconnected until the link reports
    /// that it is open.
    pub fn new(link: Box<dyn PhysicalLink>, config: TransportConfig) -> Self {
        Self {
            link,
            queue: RequestQueue::new(config),
        }
    }
}

impl Transport for SingleChannelTransport {
    fn mode(&self) -> SerialMode {
        SerialMode::UsbChained
    }

    fn state(&self) -> TransportState {
        self.queue.state()
    }

    fn subscribe(&mut self) -> UnboundedReceiver<TransportEvent> {
        self.queue.subscribe()
    }

    fn publish_to(&mut self, sender: broadcast::Sender<TransportEvent>) {
        self.queue.publish_to(sender);
    }

    fn write(&mut self, bytes: Vec<u8>, on_complete: Option<CompletionHandler>) {
        self.queue
            .submit(PendingRequest::write(bytes, on_complete), self.link.as_mut());
    }

    fn write_and_read(&mut self, bytes: Vec<u8>, on_data: ResponseHandler) {
        self.queue
            .submit(PendingRequest::write_and_read(bytes, on_data), self.link.as_mut());
    }

    fn close(&mut self, on_closed: CompletionHandler) {
        self.queue.shutdown();
        let result = self.link.close().map_err(TransportError::from);
        info!(port = self.link.name(), "Closed transport");
        on_closed(result);
    }

    fn handle_open(&mut self, link: LinkId) {
        if link != LinkId::Command {
            warn!(?link, "Ignoring open from a link this transport does not own");
            return;
        }
        if self.queue.is_connected() {
            debug!("Link reported open while already connected");
            return;
        }
        self.queue.connect(self.link.as_mut());
    }

    fn handle_data(&mut self, link: LinkId, data: &[u8]) {
        if link != LinkId::Command {
            warn!(?link, "Ignoring data from a link this transport does not own");
            return;
        }
        self.queue.on_data(data, self.link.as_mut());
    }

    fn handle_disconnect(&mut self, link: LinkId) {
        if link != LinkId::Command {
            return;
        }
        self.queue.disconnect();
    }

    fn handle_timeout(&mut self, now: Instant) {
        self.queue.on_timeout(now, self.link.as_mut());
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }
}
