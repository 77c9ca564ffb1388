//! USB Dual Port mode transport
//!
//! In USB Dual Port mode the Maestro exposes two ports. Commands and their
//! replies travel over the command port, while scripts that call
//! `serial_send_byte` deliver their output on the TTL port (RX must be wired to
//! TX on the board). A request that expects a response therefore listens on
//! both ports and takes whichever answers first.

use std::time::Instant;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use super::link::{LinkId, PhysicalLink};
use super::transport::{
    CompletionHandler, PendingRequest, RequestQueue, ResponseHandler, Transport, TransportConfig,
    TransportEvent, TransportState,
};
use super::TransportError;
use crate::config::SerialMode;

/// Transport over a command link and a telemetry link
pub struct DualChannelTransport {
    command: Box<dyn PhysicalLink>,
    telemetry: Box<dyn PhysicalLink>,
    /// Per-link open flags, indexed by [`LinkId`]
    open: [bool; 2],
    queue: RequestQueue,
}

impl DualChannelTransport {
    /// Wrap both links. The transport connects once both report open.
    pub fn new(
        command: Box<dyn PhysicalLink>,
        telemetry: Box<dyn PhysicalLink>,
        config: TransportConfig,
    ) -> Self {
        Self {
            command,
            telemetry,
            open: [false; 2],
            queue: RequestQueue::new(config),
        }
    }

    /// Whether a given link has reported open since it last dropped
    pub fn is_link_open(&self, link: LinkId) -> bool {
        self.open[link.index()]
    }

    /// Whether a listener is attached to `link`.
    ///
    /// A response listener covers both links; the error probe only listens on
    /// the command link.
    pub fn is_listening(&self, link: LinkId) -> bool {
        let state = self.queue.state();
        match link {
            LinkId::Command => state.awaiting_read || state.probing,
            LinkId::Telemetry => state.awaiting_read,
        }
    }

    fn link_name(&self, link: LinkId) -> &str {
        match link {
            LinkId::Command => self.command.name(),
            LinkId::Telemetry => self.telemetry.name(),
        }
    }
}

impl Transport for DualChannelTransport {
    fn mode(&self) -> SerialMode {
        SerialMode::UsbDualPort
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
            .submit(PendingRequest::write(bytes, on_complete), self.command.as_mut());
    }

    fn write_and_read(&mut self, bytes: Vec<u8>, on_data: ResponseHandler) {
        self.queue.submit(
            PendingRequest::write_and_read(bytes, on_data),
            self.command.as_mut(),
        );
    }

    fn close(&mut self, on_closed: CompletionHandler) {
        self.queue.shutdown();
        self.open = [false; 2];

        let command = self.command.close();
        let telemetry = self.telemetry.close();
        info!(
            command_port = self.command.name(),
            ttl_port = self.telemetry.name(),
            "Closed both ports"
        );

        on_closed(command.and(telemetry).map_err(TransportError::from));
    }

    fn handle_open(&mut self, link: LinkId) {
        if self.open[link.index()] {
            debug!(port = self.link_name(link), "Port reported open twice");
            return;
        }
        self.open[link.index()] = true;
        debug!(port = self.link_name(link), "Port open");

        if self.open == [true, true] && !self.queue.is_connected() {
            info!(
                command_port = self.command.name(),
                ttl_port = self.telemetry.name(),
                "Both ports open"
            );
            self.queue.connect(self.command.as_mut());
        }
    }

    fn handle_data(&mut self, link: LinkId, data: &[u8]) {
        if self.queue.state().resyncing {
            // Late data on either link keeps the resync window open
            self.queue.on_data(data, self.command.as_mut());
            return;
        }

        if !self.is_listening(link) {
            // The losing link of an earlier race, or unsolicited output. The
            // Maestro answers commands on the command port, so the error probe
            // never listens on the TTL port.
            debug!(port = self.link_name(link), bytes = ?data, "No listener, dropping data");
            return;
        }

        debug!(port = self.link_name(link), "Response arrived first on this port");
        // Taking the in-flight request detaches the listener from both links
        // before the handler runs
        self.queue.on_data(data, self.command.as_mut());
    }

    fn handle_disconnect(&mut self, link: LinkId) {
        self.open[link.index()] = false;

        if self.queue.disconnect() {
            warn!(port = self.link_name(link), "Port disconnected");
        } else {
            debug!(port = self.link_name(link), "Disconnect already reported");
        }
    }

    fn handle_timeout(&mut self, now: Instant) {
        if self.queue.resync_due(now) {
            // The queue clears the command link itself
            if let Err(e) = self.telemetry.clear_input() {
                warn!(port = self.telemetry.name(), error = %e, "Could not clear input buffer");
            }
        }
        self.queue.on_timeout(now, self.command.as_mut());
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }
}
