//! Transport driver
//!
//! Runs a transport inside one tokio task. The task is the only code that ever
//! touches the transport, which gives the single-threaded scheduling the queue
//! relies on: caller requests, link events and deadlines are all handled one
//! at a time, in the order they arrive.

use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use super::link::LinkEvent;
use super::transport::{Transport, TransportEvent, TransportState};
use super::TransportError;
use crate::config::SerialMode;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

enum DriverCommand {
    Write {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    WriteAndRead {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<u8>, TransportError>>,
    },
    Close {
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    State {
        reply: oneshot::Sender<TransportState>,
    },
}

/// Cloneable handle to a running transport
#[derive(Clone)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<DriverCommand>,
    events: broadcast::Sender<TransportEvent>,
    mode: SerialMode,
}

/// Spawns transports onto the tokio runtime
pub struct TransportDriver;

impl TransportDriver {
    /// Move `transport` into a new task fed by `link_events`.
    ///
    /// The returned receiver is subscribed before the task starts, so it sees
    /// every event including the initial `Open`. Events are published from
    /// inside the transport, ahead of any callback that follows them.
    pub fn spawn(
        mut transport: Box<dyn Transport>,
        mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> (TransportHandle, broadcast::Receiver<TransportEvent>) {
        let (commands_tx, mut commands) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mode = transport.mode();
        transport.publish_to(events_tx.clone());

        tokio::spawn(async move {
            let mut links_alive = true;

            loop {
                let deadline = transport.next_deadline();

                tokio::select! {
                    command = commands.recv() => {
                        let Some(command) = command else {
                            debug!("All transport handles dropped, stopping driver");
                            break;
                        };
                        if apply(transport.as_mut(), command) {
                            break;
                        }
                    }
                    event = link_events.recv(), if links_alive => {
                        match event {
                            Some(event) => transport.handle_link_event(event),
                            None => links_alive = false,
                        }
                    }
                    _ = sleep_until(deadline), if deadline.is_some() => {
                        transport.handle_timeout(Instant::now());
                    }
                }
            }

            info!("Transport driver stopped");
        });

        (
            TransportHandle {
                commands: commands_tx,
                events: events_tx,
                mode,
            },
            events_rx,
        )
    }
}

/// Wait until `events` reports that the transport is open
///
/// Fails with `NotConnected` if a disconnect comes first, or `Timeout` once
/// `limit` has passed.
pub async fn wait_for_open(
    events: &mut broadcast::Receiver<TransportEvent>,
    limit: Option<Duration>,
) -> Result<(), TransportError> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(TransportEvent::Open) => return Ok(()),
                Ok(TransportEvent::Disconnected) => return Err(TransportError::NotConnected),
                Ok(TransportEvent::Fault(_)) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(TransportError::DriverStopped)
                }
            }
        }
    };

    match limit {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| TransportError::Timeout)?,
        None => wait.await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
    }
}

/// Apply one caller command. Returns true once the transport is closed.
fn apply(transport: &mut dyn Transport, command: DriverCommand) -> bool {
    match command {
        DriverCommand::Write { bytes, reply } => {
            transport.write(
                bytes,
                Some(Box::new(move |result| {
                    let _ = reply.send(result);
                })),
            );
            false
        }
        DriverCommand::WriteAndRead { bytes, reply } => {
            transport.write_and_read(
                bytes,
                Box::new(move |result| {
                    let _ = reply.send(result);
                }),
            );
            false
        }
        DriverCommand::Close { reply } => {
            transport.close(Box::new(move |result| {
                let _ = reply.send(result);
            }));
            true
        }
        DriverCommand::State { reply } => {
            let _ = reply.send(transport.state());
            false
        }
    }
}

impl TransportHandle {
    /// Serial mode of the underlying transport
    pub fn mode(&self) -> SerialMode {
        self.mode
    }

    /// New receiver for transport events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Write bytes and wait until the trailing error probe has finished
    pub async fn write(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverCommand::Write { bytes, reply })?;
        rx.await.map_err(|_| TransportError::Abandoned)?
    }

    /// Write bytes and wait for the response
    pub async fn write_and_read(&self, bytes: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverCommand::WriteAndRead { bytes, reply })?;
        rx.await.map_err(|_| TransportError::Abandoned)?
    }

    /// Close the transport and stop the driver
    pub async fn close(&self) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverCommand::Close { reply })?;
        rx.await.map_err(|_| TransportError::DriverStopped)?
    }

    /// Snapshot of the transport state
    pub async fn state(&self) -> Result<TransportState, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverCommand::State { reply })?;
        rx.await.map_err(|_| TransportError::DriverStopped)
    }

    fn send(&self, command: DriverCommand) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::DriverStopped)
    }
}
