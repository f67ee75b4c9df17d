//! End-to-end scenarios for the bridge loop, driven through the mock port,
//! a scripted console and a scripted waiter.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use common::{create_mock_port_with_chunks, quiet_options, BridgeHarness};
use pretty_assertions::assert_eq;
use serial_bridge::bridge::{Channel, RenderOptions, ScriptedConsole, ScriptedWaiter};
use serial_bridge::lifecycle::{ExitCode, ExitController, Outcome, StopReason};
use serial_bridge::port::{MockSerialPort, SerialPortAdapter};
use serial_bridge::{AppError, Bridge, BridgeError, BridgeOptions, DisconnectMatcher, StopFlag};
use std::time::Duration;

fn fixed_clock() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap()
}

#[test]
fn test_line_limit_with_crlf_device() {
    let mut port = MockSerialPort::new("MOCK0");
    port.enqueue_bytewise(b"A\r\nB\r\n");
    let run = BridgeHarness::new(port)
        .with_options(BridgeOptions {
            max_lines: Some(2),
            ..quiet_options()
        })
        .run();

    assert_eq!(run.reason(), StopReason::LineLimit(2));
    assert_eq!(run.output, b"A\r\nB\r\n");
    assert_eq!(run.stats.lines_received, 2);
    assert_eq!(run.stats.bytes_received, 5);
}

#[test]
fn test_line_limit_after_lf_adds_nothing() {
    let port = create_mock_port_with_chunks("MOCK0", &[b"one\ntwo\nthree\n"]);
    let run = BridgeHarness::new(port)
        .with_options(BridgeOptions {
            max_lines: Some(2),
            ..quiet_options()
        })
        .run();

    assert_eq!(run.reason(), StopReason::LineLimit(2));
    assert_eq!(run.output_string(), "one\ntwo\n");
}

#[test]
fn test_disconnect_stops_mid_buffer() {
    let port = create_mock_port_with_chunks("MOCK0", &[b"hello Bye\r more"]);
    let run = BridgeHarness::new(port).with_trigger(r"Bye\r").run();

    assert_eq!(run.reason(), StopReason::Disconnect);
    assert_eq!(run.output, b"hello Bye\r");
    assert_eq!(run.stats.bytes_received, 10);
}

#[test]
fn test_disconnect_split_across_reads() {
    let port = create_mock_port_with_chunks("MOCK0", &[b"xxBy", b"e", b"\rtail"]);
    let run = BridgeHarness::new(port).with_trigger(r"Bye\r").run();

    assert_eq!(run.reason(), StopReason::Disconnect);
    assert_eq!(run.output_string(), "xxBye\r");
}

#[test]
fn test_inactivity_timeout() {
    let port = MockSerialPort::new("MOCK0");
    let run = BridgeHarness::new(port)
        .with_options(BridgeOptions {
            timeout: Some(Duration::from_millis(500)),
            ..quiet_options()
        })
        .run();

    assert_eq!(run.reason(), StopReason::Timeout(Duration::from_millis(500)));
    assert_eq!(run.waiter.wait_count(), 499);
    assert!(run.output.is_empty());
}

#[test]
fn test_activity_refills_timeout_budget() {
    let port = create_mock_port_with_chunks("MOCK0", &[b"a", b"b", b"c"]);
    let run = BridgeHarness::new(port)
        .with_options(BridgeOptions {
            timeout: Some(Duration::from_millis(10)),
            ..quiet_options()
        })
        .run();

    assert_eq!(run.reason(), StopReason::Timeout(Duration::from_millis(10)));
    assert_eq!(run.output_string(), "abc");
    // Three busy waits, then nine idle ones before the tenth charge expires.
    assert_eq!(run.waiter.wait_count(), 3 + 9);
}

#[test]
fn test_error_condition_ends_loop() {
    let port = MockSerialPort::new("MOCK0");
    let run = BridgeHarness::new(port)
        .with_waiter(ScriptedWaiter::new().fail_at(2, Channel::LocalOutput))
        .run_for(100);

    let err = run.result.unwrap_err();
    assert!(matches!(err, BridgeError::Channel(Channel::LocalOutput)));
    assert_eq!(err.to_string(), "I/O local out error");
    assert_eq!(AppError::from(err).exit_code(), ExitCode::Io);
}

#[test]
fn test_wait_failure_is_fatal() {
    let port = MockSerialPort::new("MOCK0");
    let run = BridgeHarness::new(port)
        .with_waiter(ScriptedWaiter::new().wait_error_at(0))
        .run();

    let err = AppError::from(run.result.unwrap_err());
    assert_eq!(err.exit_code(), ExitCode::Fatal);
}

#[test]
fn test_input_eof_stops_watching_input() {
    let port = MockSerialPort::new("MOCK0");
    let harness = BridgeHarness::new(port).with_options(BridgeOptions {
        timeout: Some(Duration::from_millis(5)),
        ..quiet_options()
    });
    harness.console.push_input(b"AT\r");
    harness.console.close_input();
    let run = harness.run();

    assert_eq!(run.reason(), StopReason::Timeout(Duration::from_millis(5)));
    assert_eq!(run.written, b"AT\r");
    assert_eq!(run.stats.bytes_sent, 3);

    let requests = run.waiter.requests();
    assert!(requests[0].want_input && !requests[0].input_closed);
    assert!(requests[1].want_input);
    assert!(requests[2..].iter().all(|r| r.input_closed && !r.want_input));
}

#[test]
fn test_interactive_console_never_reaches_eof() {
    let mut port = MockSerialPort::new("MOCK0");
    let mut console = ScriptedConsole::interactive();
    console.close_input();
    let mut waiter = ScriptedWaiter::new();
    let stop = StopFlag::new();

    let mut bridge = Bridge::new(quiet_options(), DisconnectMatcher::disabled());
    for _ in 0..10 {
        let step = bridge.tick(&mut port, &mut console, &mut waiter, &stop).unwrap();
        assert_eq!(step, None);
    }
    assert!(!bridge.session().input_eof());
    assert!(waiter.requests().iter().all(|r| r.want_input && !r.input_closed));
}

#[test]
fn test_char_wait_paces_transmission() {
    let port = MockSerialPort::new("MOCK0");
    let observer = port.clone();
    let harness = BridgeHarness::new(port).with_options(BridgeOptions {
        timeout: Some(Duration::from_millis(20)),
        char_wait: Duration::from_millis(3),
        ..quiet_options()
    });
    harness.console.push_input(b"ab");
    let run = harness.run();

    assert_eq!(run.written, b"ab");
    assert_eq!(observer.get_write_log(), vec![b"a".to_vec(), b"b".to_vec()]);

    let offered: Vec<bool> = run.waiter.requests()[..6]
        .iter()
        .map(|r| r.want_input)
        .collect();
    assert_eq!(offered, vec![true, false, false, false, true, false]);
}

#[test]
fn test_local_echo_with_control_pictures() {
    let port = MockSerialPort::new("MOCK0");
    let harness = BridgeHarness::new(port).with_options(BridgeOptions {
        timeout: Some(Duration::from_millis(5)),
        local_echo: true,
        render: RenderOptions {
            control_chars: true,
            ..RenderOptions::default()
        },
        ..quiet_options()
    });
    harness.console.push_input(b"a\tb\r");
    let run = harness.run();

    assert_eq!(run.written, b"a\tb\r");
    assert_eq!(run.output_string(), "a\u{2409}\tb\u{240D}");
}

#[test]
fn test_received_control_pictures() {
    let port = create_mock_port_with_chunks("MOCK0", &[b"x\r\n\x07"]);
    let run = BridgeHarness::new(port)
        .with_options(BridgeOptions {
            timeout: Some(Duration::from_millis(5)),
            render: RenderOptions {
                control_chars: true,
                ..RenderOptions::default()
            },
            ..quiet_options()
        })
        .run();

    assert_eq!(run.output_string(), "x\u{240D}\u{240A}\n\u{2407}\x07");
}

#[test]
fn test_timestamps_prefix_each_line() {
    let port = create_mock_port_with_chunks("MOCK0", &[b"ab\r\ncd\n"]);
    let run = BridgeHarness::new(port)
        .with_options(BridgeOptions {
            max_lines: Some(2),
            render: RenderOptions {
                timestamps: true,
                ..RenderOptions::default()
            },
            ..quiet_options()
        })
        .with_clock(fixed_clock)
        .run();

    assert_eq!(run.reason(), StopReason::LineLimit(2));
    assert_eq!(
        run.output_string(),
        "1700000000.25 ab\r\n1700000000.25 cd\n"
    );
}

#[test]
fn test_colors_reset_on_exit() {
    let port = create_mock_port_with_chunks("MOCK0", &[b"hi"]);
    let run = BridgeHarness::new(port)
        .with_options(BridgeOptions {
            timeout: Some(Duration::from_millis(3)),
            render: RenderOptions {
                colors: true,
                ..RenderOptions::default()
            },
            ..quiet_options()
        })
        .run();

    assert_eq!(run.output_string(), "\x1b[0;34mhi\x1b[0m");
}

#[test]
fn test_failed_color_reset_keeps_stop_reason() {
    let mut port = create_mock_port_with_chunks("MOCK0", &[b"hi"]);
    let mut console = ScriptedConsole::new();
    let observer = console.clone();
    let mut waiter = ScriptedWaiter::new();
    let stop = StopFlag::new();
    let options = BridgeOptions {
        timeout: Some(Duration::from_millis(3)),
        render: RenderOptions {
            colors: true,
            ..RenderOptions::default()
        },
        ..quiet_options()
    };
    let mut bridge = Bridge::new(options, DisconnectMatcher::disabled());

    let step = bridge.tick(&mut port, &mut console, &mut waiter, &stop).unwrap();
    assert_eq!(step, None);
    assert_eq!(observer.output_string(), "\x1b[0;34mhi");

    console.fail_next_write();
    let reason = bridge.run(&mut port, &mut console, &mut waiter, &stop).unwrap();
    assert_eq!(reason, StopReason::Timeout(Duration::from_millis(3)));
    assert_eq!(observer.output_string(), "\x1b[0;34mhi");
}

#[test]
fn test_exit_controller_funnel() {
    let port = create_mock_port_with_chunks("MOCK0", &[b"A\r\nB\r\n"]);
    let observer = port.clone();
    let console = ScriptedConsole::new();
    console.push_input(b"x");
    let console_observer = console.clone();

    let mut controller: ExitController<MockSerialPort, ScriptedConsole, Vec<u8>> =
        ExitController::with_diagnostics(Vec::new(), true, false);
    controller.attach_port(port);
    controller.attach_console(console);

    let options = BridgeOptions {
        max_lines: Some(2),
        ..quiet_options()
    };
    let mut bridge = Bridge::new(options, DisconnectMatcher::disabled());
    let (serial, console) = controller.split_mut().unwrap();
    let reason = bridge
        .run(serial, console, &mut ScriptedWaiter::new(), &StopFlag::new())
        .unwrap();

    let code = controller.conclude(&Outcome::Stopped(reason), Some(bridge.stats()));
    assert_eq!(code, ExitCode::Ok);
    assert_eq!(observer.close_count(), 1);
    assert!(!observer.is_open());
    assert_eq!(console_observer.restore_count(), 1);

    let report = String::from_utf8(controller.diagnostics().clone()).unwrap();
    assert_eq!(
        report,
        "\n[Specified number of lines received][E0]\n[TX:0, RX:5, RX:2 lines]\n"
    );

    // A second conclusion and the drop do not clean up again.
    controller.conclude(&Outcome::Stopped(reason), None);
    drop(controller);
    assert_eq!(observer.close_count(), 1);
    assert_eq!(console_observer.restore_count(), 1);
}
