//! Request sequencing over a command link paired with a TTL link

mod common;

use common::{init_tracing, Completions, MockLink, Responses, Wire};
use maestro_core::protocol::{
    DualChannelTransport, LinkId, SerialFault, Transport, TransportConfig, TransportEvent,
};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

const RESTART_SCRIPT: [u8; 2] = [0xA7, 0x03];
const GET_ERRORS: [u8; 1] = [0xA1];
const NO_FAULTS: [u8; 2] = [0x00, 0x00];

struct Harness {
    transport: DualChannelTransport,
    command: Wire,
    ttl: Wire,
}

fn harness_with(
    command: MockLink,
    ttl: MockLink,
    command_wire: Wire,
    ttl_wire: Wire,
) -> Harness {
    init_tracing();
    Harness {
        transport: DualChannelTransport::new(
            command.boxed(),
            ttl.boxed(),
            TransportConfig::default(),
        ),
        command: command_wire,
        ttl: ttl_wire,
    }
}

fn harness() -> Harness {
    let (command, command_wire) = MockLink::new("/dev/ttyACM0");
    let (ttl, ttl_wire) = MockLink::new("/dev/ttyACM1");
    harness_with(command, ttl, command_wire, ttl_wire)
}

fn open_harness() -> Harness {
    let mut h = harness();
    h.transport.handle_open(LinkId::Command);
    h.transport.handle_open(LinkId::Telemetry);
    h
}

fn drain(rx: &mut UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_connects_once_both_links_open() {
    for order in [
        [LinkId::Command, LinkId::Telemetry],
        [LinkId::Telemetry, LinkId::Command],
    ] {
        let mut h = harness();
        let mut events = h.transport.subscribe();
        h.transport.write(RESTART_SCRIPT.to_vec(), None);

        h.transport.handle_open(order[0]);
        assert!(h.transport.is_link_open(order[0]));
        assert!(!h.transport.state().connected);
        assert_eq!(h.command.write_count(), 0);
        assert!(drain(&mut events).is_empty());

        h.transport.handle_open(order[1]);
        assert!(h.transport.state().connected);
        assert_eq!(drain(&mut events), vec![TransportEvent::Open]);
        assert_eq!(h.command.writes(), vec![RESTART_SCRIPT.to_vec(), GET_ERRORS.to_vec()]);
    }
}

#[test]
fn test_repeated_open_from_one_link_does_not_connect() {
    let mut h = harness();
    h.transport.handle_open(LinkId::Command);
    h.transport.handle_open(LinkId::Command);

    assert!(!h.transport.state().connected);
    assert!(!h.transport.is_link_open(LinkId::Telemetry));
}

#[test]
fn test_writes_only_touch_command_link() {
    let mut h = open_harness();
    let done = Completions::new();
    let response = Responses::new();

    h.transport.write(vec![0x84, 0x00, 0x70, 0x2E], done.completion());
    h.transport.handle_data(LinkId::Command, &NO_FAULTS);
    h.transport.write_and_read(vec![0x90, 0x00], response.response());
    h.transport.handle_data(LinkId::Command, &[0x70, 0x17]);
    h.transport.handle_data(LinkId::Command, &NO_FAULTS);

    assert_eq!(done.results(), vec![Ok(())]);
    assert_eq!(response.results(), vec![Ok(vec![0x70, 0x17])]);
    assert_eq!(h.command.write_count(), 4);
    assert!(h.ttl.writes().is_empty());
}

#[test]
fn test_response_from_ttl_link() {
    let mut h = open_harness();
    let response = Responses::new();

    h.transport.write_and_read(RESTART_SCRIPT.to_vec(), response.response());
    assert!(h.transport.is_listening(LinkId::Command));
    assert!(h.transport.is_listening(LinkId::Telemetry));

    h.transport.handle_data(LinkId::Telemetry, &[0x2A]);
    assert_eq!(response.results(), vec![Ok(vec![0x2A])]);

    // The error check goes out on the command link and is answered there
    assert_eq!(h.command.writes(), vec![RESTART_SCRIPT.to_vec(), GET_ERRORS.to_vec()]);
    assert!(h.transport.is_listening(LinkId::Command));
    assert!(!h.transport.is_listening(LinkId::Telemetry));

    h.transport.handle_data(LinkId::Command, &NO_FAULTS);
    assert!(!h.transport.state().probing);
    assert!(!h.transport.is_listening(LinkId::Command));
}

#[test]
fn test_losing_link_data_is_dropped() {
    let mut h = open_harness();
    let response = Responses::new();
    let next = Completions::new();

    h.transport.write_and_read(RESTART_SCRIPT.to_vec(), response.response());
    h.transport.write(vec![0x84, 0x00, 0x70, 0x2E], next.completion());

    // Command link wins the race
    h.transport.handle_data(LinkId::Command, &[0x01]);
    // The TTL copy arrives while the error check is in flight and has no listener
    h.transport.handle_data(LinkId::Telemetry, &[0x01]);
    assert!(h.transport.state().probing);

    h.transport.handle_data(LinkId::Command, &NO_FAULTS);
    h.transport.handle_data(LinkId::Command, &NO_FAULTS);

    assert_eq!(response.results(), vec![Ok(vec![0x01])]);
    assert_eq!(next.results(), vec![Ok(())]);
}

#[test]
fn test_late_command_copy_is_read_as_error_reply() {
    let mut h = open_harness();
    let mut events = h.transport.subscribe();
    let response = Responses::new();

    h.transport.write_and_read(RESTART_SCRIPT.to_vec(), response.response());
    h.transport.handle_data(LinkId::Telemetry, &[0x2A]);
    assert_eq!(response.results(), vec![Ok(vec![0x2A])]);

    // With no request ids the late copy answers the error query
    h.transport.handle_data(LinkId::Command, &[0x2A, 0x00]);
    assert!(!h.transport.state().probing);
    assert_eq!(
        drain(&mut events),
        vec![
            TransportEvent::Fault(SerialFault::SerialOverrun),
            TransportEvent::Fault(SerialFault::SerialCrc),
            TransportEvent::Fault(SerialFault::SerialTimeout),
        ]
    );

    // The real reply finds no listener
    h.transport.handle_data(LinkId::Command, &NO_FAULTS);
    assert!(drain(&mut events).is_empty());
    assert_eq!(response.count(), 1);
    assert_eq!(h.command.writes(), vec![RESTART_SCRIPT.to_vec(), GET_ERRORS.to_vec()]);
}

#[test]
fn test_timeout_resyncs_both_links() {
    let mut h = open_harness();
    let response = Responses::new();

    h.transport.write_and_read(RESTART_SCRIPT.to_vec(), response.response());
    let timed_out_at = Instant::now() + Duration::from_secs(3);
    h.transport.handle_timeout(timed_out_at);
    assert_eq!(response.count(), 1);
    assert!(h.transport.state().resyncing);

    // A late TTL reply is swallowed and keeps the window open
    h.transport.handle_data(LinkId::Telemetry, &[0x2A]);
    h.transport.handle_timeout(timed_out_at);
    assert!(h.transport.state().resyncing);
    assert_eq!(h.command.writes(), vec![RESTART_SCRIPT.to_vec()]);

    h.transport.handle_timeout(timed_out_at + Duration::from_secs(1));
    assert!(!h.transport.state().resyncing);
    assert_eq!(h.command.input_clears(), 1);
    assert_eq!(h.ttl.input_clears(), 1);
    assert_eq!(h.command.writes(), vec![RESTART_SCRIPT.to_vec(), GET_ERRORS.to_vec()]);
}

#[test]
fn test_idle_data_is_dropped() {
    let mut h = open_harness();
    h.transport.handle_data(LinkId::Telemetry, &[0x55]);
    h.transport.handle_data(LinkId::Command, &[0x55]);

    let response = Responses::new();
    h.transport.write_and_read(RESTART_SCRIPT.to_vec(), response.response());
    assert_eq!(response.count(), 0);
}

#[test]
fn test_disconnects_are_coalesced() {
    let mut h = open_harness();
    let mut events = h.transport.subscribe();
    let response = Responses::new();

    h.transport.write_and_read(RESTART_SCRIPT.to_vec(), response.response());
    h.transport.handle_disconnect(LinkId::Command);
    h.transport.handle_disconnect(LinkId::Telemetry);

    assert_eq!(drain(&mut events), vec![TransportEvent::Disconnected]);
    assert!(!h.transport.state().connected);
    assert!(!h.transport.is_link_open(LinkId::Command));
    assert_eq!(response.count(), 0);

    // Both links must come back before requests flow again
    h.transport.write(vec![0x84, 0x00, 0x70, 0x2E], None);
    h.transport.handle_open(LinkId::Command);
    assert!(!h.transport.state().connected);
    assert_eq!(h.command.write_count(), 1);

    h.transport.handle_open(LinkId::Telemetry);
    assert_eq!(drain(&mut events), vec![TransportEvent::Open]);
    assert_eq!(h.command.write_count(), 3);
}

#[test]
fn test_single_link_drop_disconnects() {
    let mut h = open_harness();
    let mut events = h.transport.subscribe();

    h.transport.handle_disconnect(LinkId::Telemetry);
    assert_eq!(drain(&mut events), vec![TransportEvent::Disconnected]);
    assert!(h.transport.is_link_open(LinkId::Command));

    // The surviving link reopening alone changes nothing
    h.transport.handle_open(LinkId::Command);
    assert!(!h.transport.state().connected);

    h.transport.handle_open(LinkId::Telemetry);
    assert!(h.transport.state().connected);
}

#[test]
fn test_close_closes_both_links() {
    let mut h = open_harness();
    let response = Responses::new();
    let closed = Completions::new();

    h.transport.write_and_read(RESTART_SCRIPT.to_vec(), response.response());
    h.transport.close(closed.closed());

    assert_eq!(closed.results(), vec![Ok(())]);
    assert!(h.command.is_closed());
    assert!(h.ttl.is_closed());
    assert_eq!(response.count(), 0);
    assert!(!h.transport.state().connected);
    assert!(!h.transport.is_link_open(LinkId::Command));
}

#[test]
fn test_close_error_from_either_link() {
    let (command, command_wire) = MockLink::new("/dev/ttyACM0");
    let (ttl, ttl_wire) = MockLink::new("/dev/ttyACM1");
    let mut h = harness_with(command, ttl.failing_close(), command_wire, ttl_wire);
    let closed = Completions::new();

    h.transport.close(closed.closed());

    assert_eq!(closed.count(), 1);
    assert!(closed.results()[0].is_err());
    // The command link is still closed when the TTL link fails
    assert!(h.command.is_closed());
    assert!(h.ttl.is_closed());
}
