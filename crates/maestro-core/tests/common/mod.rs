//! Shared test helpers: scripted mock links and callback recorders

#![allow(dead_code)]

use maestro_core::protocol::{
    CompletionHandler, LinkEvent, LinkId, PhysicalLink, ResponseHandler, TransportError,
};
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

/// Install a tracing subscriber once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What a mock link saw, shared with the test
#[derive(Clone, Default)]
pub struct Wire {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    input_clears: Arc<Mutex<usize>>,
    closed: Arc<Mutex<bool>>,
}

impl Wire {
    /// Every write, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    /// Writes other than the error check
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.writes()
            .into_iter()
            .filter(|w| w.as_slice() != [0xA1])
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    /// How often the input buffer was cleared
    pub fn input_clears(&self) -> usize {
        *self.input_clears.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

/// Reply sent when a matching request is written
#[derive(Clone)]
struct Rule {
    input: Vec<u8>,
    link: LinkId,
    output: Vec<u8>,
}

/// Scripted replies, delivered as link events
#[derive(Clone)]
pub struct Responder {
    events: UnboundedSender<LinkEvent>,
    rules: Arc<Mutex<Vec<Rule>>>,
}

impl Responder {
    /// Responder that answers the error check with "no errors"
    pub fn new(events: UnboundedSender<LinkEvent>) -> Self {
        let responder = Self {
            events,
            rules: Arc::new(Mutex::new(Vec::new())),
        };
        responder.reply(&[0xA1], LinkId::Command, &[0x00, 0x00]);
        responder
    }

    /// Answer `input` with `output` on `link`. Later rules win.
    pub fn reply(&self, input: &[u8], link: LinkId, output: &[u8]) {
        self.rules.lock().unwrap().insert(
            0,
            Rule {
                input: input.to_vec(),
                link,
                output: output.to_vec(),
            },
        );
    }

    fn respond(&self, bytes: &[u8]) {
        let rule = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.input == bytes)
            .cloned();
        if let Some(rule) = rule {
            let _ = self.events.send(LinkEvent::Data(rule.link, rule.output));
        }
    }
}

/// In-memory physical link
pub struct MockLink {
    name: String,
    wire: Wire,
    short_by: usize,
    fail_writes: bool,
    fail_close: bool,
    responder: Option<Responder>,
}

impl MockLink {
    pub fn new(name: &str) -> (Self, Wire) {
        let wire = Wire::default();
        (
            Self {
                name: name.to_string(),
                wire: wire.clone(),
                short_by: 0,
                fail_writes: false,
                fail_close: false,
                responder: None,
            },
            wire,
        )
    }

    /// Accept `n` fewer bytes than requested on every write
    pub fn short_by(mut self, n: usize) -> Self {
        self.short_by = n;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn boxed(self) -> Box<dyn PhysicalLink> {
        Box::new(self)
    }
}

impl PhysicalLink for MockLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        self.wire.writes.lock().unwrap().push(bytes.to_vec());
        if let Some(responder) = &self.responder {
            responder.respond(bytes);
        }
        Ok(bytes.len().saturating_sub(self.short_by))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        *self.wire.input_clears.lock().unwrap() += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        *self.wire.closed.lock().unwrap() = true;
        if self.fail_close {
            return Err(io::Error::other("mock close failure"));
        }
        Ok(())
    }
}

/// Records write and close completions
pub type Completions = Recorder<()>;

/// Records `write_and_read` responses
pub type Responses = Recorder<Vec<u8>>;

/// Collects callback results
#[derive(Clone)]
pub struct Recorder<T> {
    results: Arc<Mutex<Vec<Result<T, String>>>>,
}

impl<T: Clone + Send + 'static> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<Result<T, String>> {
        self.results.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.results.lock().unwrap().len()
    }

    fn record(&self, result: Result<T, TransportError>) {
        self.results
            .lock()
            .unwrap()
            .push(result.map_err(|e| e.to_string()));
    }
}

impl Recorder<()> {
    pub fn completion(&self) -> Option<CompletionHandler> {
        let this = self.clone();
        Some(Box::new(move |result| this.record(result)))
    }

    pub fn closed(&self) -> CompletionHandler {
        let this = self.clone();
        Box::new(move |result| this.record(result))
    }
}

impl Recorder<Vec<u8>> {
    pub fn response(&self) -> ResponseHandler {
        let this = self.clone();
        Box::new(move |result| this.record(result))
    }
}
