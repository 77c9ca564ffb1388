//! Transport capability and request queue
//!
//! The serial port gives us synchronous writes but asynchronous reads with no
//! way to tell which write a read belongs to. The Maestro never tags its
//! replies, so the only way to pair them up is to keep one request in flight at
//! a time and hold everything else back until its reply (and the trailing error
//! probe) has arrived.
//!
//! Transports are sans-IO state machines: link activity is fed in through the
//! `handle_*` methods and callbacks fire synchronously from inside them. The
//! [`TransportDriver`](super::TransportDriver) owns a transport inside a single
//! tokio task and is the usual way to use one.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, trace, warn};

use super::link::{LinkEvent, LinkId, PhysicalLink};
use super::probe::{self, SerialFault, ERROR_PROBE_RESPONSE_LEN};
use super::{TransportError, DEFAULT_TIMEOUT_MS, RESYNC_QUIET_MS};
use crate::config::SerialMode;

/// Called once a write and its error probe have finished
pub type CompletionHandler = Box<dyn FnOnce(Result<(), TransportError>) + Send>;

/// Called once with the raw response to a `write_and_read`
pub type ResponseHandler = Box<dyn FnOnce(Result<Vec<u8>, TransportError>) + Send>;

/// Events a transport reports to its subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    /// All physical links are open and requests are flowing
    Open,
    /// The error probe reported a fault
    Fault(SerialFault),
    /// A link dropped while connected
    Disconnected,
}

/// Snapshot of a transport's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransportState {
    /// Links are open
    pub connected: bool,
    /// Waiting for the response to a `write_and_read`
    pub awaiting_read: bool,
    /// Waiting for the error probe reply
    pub probing: bool,
    /// Discarding input after a timeout until the link goes quiet
    pub resyncing: bool,
    /// Requests waiting behind the in-flight one
    pub queued: usize,
}

/// Transport tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// How long an in-flight request may wait for its response.
    /// `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
        }
    }
}

impl TransportConfig {
    /// Config that never times out in-flight requests
    pub fn without_timeout() -> Self {
        Self {
            request_timeout: None,
        }
    }
}

/// Capability shared by every transport
///
/// Higher level code only ever talks to a `Box<dyn Transport>`.
pub trait Transport: Send {
    /// Serial mode this transport implements
    fn mode(&self) -> SerialMode;

    /// Current state
    fn state(&self) -> TransportState;

    /// Register for transport events. Events emitted before subscribing are
    /// not replayed.
    fn subscribe(&mut self) -> UnboundedReceiver<TransportEvent>;

    /// Also publish every event to `sender`, at the moment it is emitted
    fn publish_to(&mut self, sender: broadcast::Sender<TransportEvent>);

    /// Queue a write. `on_complete` fires after the trailing error probe.
    fn write(&mut self, bytes: Vec<u8>, on_complete: Option<CompletionHandler>);

    /// Queue a write that expects a response
    fn write_and_read(&mut self, bytes: Vec<u8>, on_data: ResponseHandler);

    /// Close every physical link. Pending requests are dropped without their
    /// callbacks firing.
    fn close(&mut self, on_closed: CompletionHandler);

    /// A physical link reported that it is open
    fn handle_open(&mut self, link: LinkId);

    /// A physical link produced data
    fn handle_data(&mut self, link: LinkId, data: &[u8]);

    /// A physical link dropped
    fn handle_disconnect(&mut self, link: LinkId);

    /// Fail the in-flight request if its deadline has passed, or finish
    /// resyncing once the link has been quiet long enough
    fn handle_timeout(&mut self, now: Instant);

    /// When `handle_timeout` next needs to run, if ever
    fn next_deadline(&self) -> Option<Instant>;

    /// Dispatch a link event to the matching handler
    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Open(link) => self.handle_open(link),
            LinkEvent::Data(link, data) => self.handle_data(link, &data),
            LinkEvent::Disconnected(link) => self.handle_disconnect(link),
        }
    }
}

/// What to do once a request has been written
pub(crate) enum RequestKind {
    Write(Option<CompletionHandler>),
    WriteAndRead(ResponseHandler),
    /// Error probe carrying the completion of the write that triggered it
    Probe(Option<CompletionHandler>),
}

/// A request waiting for, or occupying, the link
pub(crate) struct PendingRequest {
    pub(crate) bytes: Vec<u8>,
    pub(crate) kind: RequestKind,
}

impl PendingRequest {
    pub(crate) fn write(bytes: Vec<u8>, on_complete: Option<CompletionHandler>) -> Self {
        Self {
            bytes,
            kind: RequestKind::Write(on_complete),
        }
    }

    pub(crate) fn write_and_read(bytes: Vec<u8>, on_data: ResponseHandler) -> Self {
        Self {
            bytes,
            kind: RequestKind::WriteAndRead(on_data),
        }
    }

    fn probe(on_complete: Option<CompletionHandler>) -> Self {
        Self {
            bytes: probe::probe_request(),
            kind: RequestKind::Probe(on_complete),
        }
    }

    /// Fail the request without transmitting it
    fn fail(self, err: TransportError) {
        match self.kind {
            RequestKind::Write(Some(cb)) | RequestKind::Probe(Some(cb)) => cb(Err(err)),
            RequestKind::WriteAndRead(cb) => cb(Err(err)),
            RequestKind::Write(None) | RequestKind::Probe(None) => {}
        }
    }
}

/// The request currently holding the link
enum InFlight {
    Response {
        handler: ResponseHandler,
        deadline: Option<Instant>,
    },
    Probe {
        on_complete: Option<CompletionHandler>,
        received: Vec<u8>,
        deadline: Option<Instant>,
    },
}

impl InFlight {
    fn deadline(&self) -> Option<Instant> {
        match self {
            InFlight::Response { deadline, .. } | InFlight::Probe { deadline, .. } => *deadline,
        }
    }
}

/// Fan-out of transport events to subscribers
///
/// Events are delivered before `emit` returns, so a fault is visible to every
/// subscriber before the completion of the write that caused it runs.
#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Vec<UnboundedSender<TransportEvent>>,
    broadcast: Option<broadcast::Sender<TransportEvent>>,
}

impl EventBus {
    pub(crate) fn subscribe(&mut self) -> UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn publish_to(&mut self, sender: broadcast::Sender<TransportEvent>) {
        self.broadcast = Some(sender);
    }

    pub(crate) fn emit(&mut self, event: TransportEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
        if let Some(tx) = &self.broadcast {
            // No receivers is fine; nobody is listening
            let _ = tx.send(event);
        }
    }
}

/// FIFO of requests with at most one in flight
///
/// Shared by the single and dual channel transports. All writes go to the link
/// passed in; which links may deliver responses is the caller's concern.
pub(crate) struct RequestQueue {
    connected: bool,
    pending: VecDeque<PendingRequest>,
    in_flight: Option<InFlight>,
    /// Set after a timeout: input is discarded and nothing is sent until this
    /// passes with the link quiet
    resync_until: Option<Instant>,
    timeout: Option<Duration>,
    events: EventBus,
}

impl RequestQueue {
    pub(crate) fn new(config: TransportConfig) -> Self {
        Self {
            connected: false,
            pending: VecDeque::new(),
            in_flight: None,
            resync_until: None,
            timeout: config.request_timeout,
            events: EventBus::default(),
        }
    }

    pub(crate) fn state(&self) -> TransportState {
        TransportState {
            connected: self.connected,
            awaiting_read: matches!(self.in_flight, Some(InFlight::Response { .. })),
            probing: matches!(self.in_flight, Some(InFlight::Probe { .. })),
            resyncing: self.resync_until.is_some(),
            queued: self.pending.len(),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn subscribe(&mut self) -> UnboundedReceiver<TransportEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish_to(&mut self, sender: broadcast::Sender<TransportEvent>) {
        self.events.publish_to(sender);
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.resync_until
            .or_else(|| self.in_flight.as_ref().and_then(InFlight::deadline))
    }

    /// Whether `on_timeout(now)` will end the current resync
    pub(crate) fn resync_due(&self, now: Instant) -> bool {
        self.resync_until.is_some_and(|until| until <= now)
    }

    /// Queue a request, transmitting it straight away if the link is idle
    pub(crate) fn submit(&mut self, request: PendingRequest, link: &mut dyn PhysicalLink) {
        if request.bytes.is_empty() {
            request.fail(TransportError::InvalidInput(
                "refusing to send an empty request".to_string(),
            ));
            return;
        }

        if !self.connected {
            debug!(bytes = ?request.bytes, "Not connected yet, deferring request");
        } else if self.in_flight.is_some() {
            debug!(bytes = ?request.bytes, "Deferring request until the in-flight one completes");
        }

        self.pending.push_back(request);
        self.pump(link);
    }

    /// Enter the connected state and replay deferred requests
    pub(crate) fn connect(&mut self, link: &mut dyn PhysicalLink) {
        if self.connected {
            return;
        }
        self.connected = true;
        info!(port = link.name(), queued = self.pending.len(), "Connected");
        self.events.emit(TransportEvent::Open);
        self.pump(link);
    }

    /// Leave the connected state. Returns false if already disconnected.
    pub(crate) fn disconnect(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        self.connected = false;
        self.abandon();
        warn!("Link disconnected");
        self.events.emit(TransportEvent::Disconnected);
        true
    }

    /// Drop everything after a close. No event is emitted.
    pub(crate) fn shutdown(&mut self) {
        self.connected = false;
        self.abandon();
    }

    /// Drop every pending request without invoking its callback
    fn abandon(&mut self) {
        let dropped = self.pending.len() + usize::from(self.in_flight.is_some());
        if dropped > 0 {
            debug!(dropped, "Abandoning pending requests");
        }
        self.pending.clear();
        self.in_flight = None;
        self.resync_until = None;
    }

    /// Route incoming data to the in-flight request.
    ///
    /// Returns true if the data was consumed. Data arriving with nothing in
    /// flight has no listener and is dropped.
    pub(crate) fn on_data(&mut self, data: &[u8], link: &mut dyn PhysicalLink) -> bool {
        if let Some(until) = self.resync_until {
            // A late reply to the request that timed out; restart the quiet window
            let quiet_from_now = Instant::now() + resync_quiet();
            self.resync_until = Some(until.max(quiet_from_now));
            debug!(bytes = ?data, "Discarding input while resyncing after a timeout");
            return false;
        }

        let Some(in_flight) = self.in_flight.take() else {
            trace!(bytes = ?data, "No listener for data, dropping");
            return false;
        };

        match in_flight {
            InFlight::Response { handler, .. } => {
                debug!(bytes = ?data, "Read response");
                handler(Ok(data.to_vec()));
            }
            InFlight::Probe {
                on_complete,
                mut received,
                deadline,
            } => {
                received.extend_from_slice(data);
                if received.len() < ERROR_PROBE_RESPONSE_LEN {
                    // Reply split across reads; keep listening
                    self.in_flight = Some(InFlight::Probe {
                        on_complete,
                        received,
                        deadline,
                    });
                    return true;
                }
                if received.len() > ERROR_PROBE_RESPONSE_LEN {
                    let extra = received.len() - ERROR_PROBE_RESPONSE_LEN;
                    debug!(extra, "Ignoring trailing bytes after error probe reply");
                }
                self.finish_probe(&received[..ERROR_PROBE_RESPONSE_LEN], on_complete);
            }
        }

        self.pump(link);
        true
    }

    fn finish_probe(&mut self, reply: &[u8], on_complete: Option<CompletionHandler>) {
        match probe::parse_probe_response(reply) {
            Ok(faults) => {
                for fault in faults {
                    warn!(code = fault.code(), "{}", fault.message());
                    self.events.emit(TransportEvent::Fault(fault));
                }
            }
            Err(e) => warn!(error = %e, "Could not decode error probe reply"),
        }

        if let Some(cb) = on_complete {
            cb(Ok(()));
        }
    }

    /// Fail the in-flight request if its deadline has passed.
    ///
    /// A reply may still be on its way after a timeout, and nothing in the
    /// protocol would tell it apart from the next reply. The queue therefore
    /// holds back the next request, discards input until the link has been
    /// quiet for a while, and clears the port's input buffer before moving on.
    pub(crate) fn on_timeout(&mut self, now: Instant, link: &mut dyn PhysicalLink) {
        if self.resync_due(now) {
            self.resync_until = None;
            if let Err(e) = link.clear_input() {
                warn!(port = link.name(), error = %e, "Could not clear input buffer");
            }
            info!(port = link.name(), "Link quiet, resuming requests");
            self.pump(link);
            return;
        }

        let expired = self
            .in_flight
            .as_ref()
            .and_then(InFlight::deadline)
            .is_some_and(|deadline| deadline <= now);
        if !expired {
            return;
        }

        match self.in_flight.take() {
            Some(InFlight::Response { handler, .. }) => {
                warn!("Timed out waiting for response");
                handler(Err(TransportError::Timeout));
            }
            Some(InFlight::Probe { on_complete, .. }) => {
                warn!("Timed out waiting for error probe reply");
                if let Some(cb) = on_complete {
                    cb(Err(TransportError::Timeout));
                }
            }
            None => {}
        }

        self.resync_until = Some(now + resync_quiet());
    }

    /// Release queued requests while the link is idle
    fn pump(&mut self, link: &mut dyn PhysicalLink) {
        while self.connected && self.in_flight.is_none() && self.resync_until.is_none() {
            let Some(request) = self.pending.pop_front() else {
                break;
            };
            self.dispatch(request, link);
        }
    }

    /// Transmit a request and set up whatever it waits for next
    fn dispatch(&mut self, request: PendingRequest, link: &mut dyn PhysicalLink) {
        let PendingRequest { bytes, kind } = request;
        debug!(port = link.name(), bytes = ?bytes, "Writing");

        match link.write(&bytes) {
            Ok(written) if written != bytes.len() => {
                warn!(written, requested = bytes.len(), "Short write");
            }
            Ok(_) => {}
            Err(e) => {
                error!(port = link.name(), error = %e, "Write failed");
                PendingRequest { bytes, kind }.fail(TransportError::Io(e));
                return;
            }
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        match kind {
            RequestKind::Write(on_complete) => {
                // Probe runs before anything else queued
                self.pending.push_front(PendingRequest::probe(on_complete));
            }
            RequestKind::WriteAndRead(handler) => {
                self.pending.push_front(PendingRequest::probe(None));
                self.in_flight = Some(InFlight::Response { handler, deadline });
            }
            RequestKind::Probe(on_complete) => {
                self.in_flight = Some(InFlight::Probe {
                    on_complete,
                    received: Vec::new(),
                    deadline,
                });
            }
        }
    }
}

fn resync_quiet() -> Duration {
    Duration::from_millis(RESYNC_QUIET_MS)
}
