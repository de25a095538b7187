//! Measurement loop tests against the simulated device, driven by a
//! virtual clock

mod sim;

use dwm1000_ranging::{
    ranging::RangingReply,
    time::Duration,
    Config, DeviceMode, LogLevel, Logger, Monitor, MonitorConfig,
};

use sim::{driver, encode, InboundFrame, MockDelay, SimHandle, TestClock};

fn ranging_tag(handle: &SimHandle) -> sim::SimDriver {
    let mut dwm1000 = driver(handle, Config::default());
    dwm1000.initialize(&mut MockDelay::new()).unwrap();
    dwm1000.set_mode(DeviceMode::Tag).unwrap();
    dwm1000.start_ranging().unwrap();
    dwm1000
}

fn reply_frame(handle: &SimHandle, time_of_flight: u64) -> InboundFrame {
    let turnaround = 100_000;
    let reply = RangingReply {
        turnaround: Duration::new(turnaround).unwrap(),
    };
    let rx_stamp = handle.system_time() + 2 * time_of_flight + turnaround;
    InboundFrame::new(encode(&reply), rx_stamp)
}

#[test]
fn reports_measurements_at_the_configured_interval() {
    let handle = SimHandle::new();
    let mut dwm1000 = ranging_tag(&handle);
    let mut logger = Logger::new(String::new(), LogLevel::Data);
    let mut clock = TestClock::with_step(0);
    let mut monitor = Monitor::new(MonitorConfig {
        ranging_interval_ms: 200,
        ..MonitorConfig::default()
    });

    handle.queue_frame(reply_frame(&handle, 533));
    let first = monitor.tick(&mut dwm1000, &mut logger, &mut clock);
    assert!(first.is_some());

    // Between intervals nothing is measured, even with data pending.
    clock.advance(10);
    handle.queue_frame(reply_frame(&handle, 533));
    assert!(monitor.tick(&mut dwm1000, &mut logger, &mut clock).is_none());

    clock.advance(190);
    assert!(monitor.tick(&mut dwm1000, &mut logger, &mut clock).is_some());

    let output = logger.free();
    let data_lines: Vec<&str> = output
        .lines()
        .filter(|line| line.starts_with("[DATA] Range"))
        .collect();
    assert_eq!(data_lines.len(), 2);
    assert!(data_lines[0].contains("Distance: 2.50m"));
    assert!(data_lines[0].contains("Quality: 100%"));
    assert!(data_lines[0].contains("RSSI: -74dBm"));

    // The session armed the receiver, so the first tick also reported the
    // transition out of Idle.
    assert!(output.contains("[DEBUG] Status change | Status: RX"));
}

#[test]
fn warns_about_low_quality_measurements() {
    let handle = SimHandle::new();
    let mut dwm1000 = ranging_tag(&handle);
    let mut logger = Logger::new(String::new(), LogLevel::Data);
    let mut clock = TestClock::with_step(0);
    let mut monitor = Monitor::new(MonitorConfig::default());

    handle.queue_frame(reply_frame(&handle, 533).with_weak_first_path());
    monitor.tick(&mut dwm1000, &mut logger, &mut clock);

    let output = logger.free();
    assert!(output.contains("[WARN] Low signal quality | Quality: 0.0%"));
}

#[test]
fn reports_failed_measurements_with_the_device_status() {
    let handle = SimHandle::new();
    let mut dwm1000 = ranging_tag(&handle);
    let mut logger = Logger::new(String::new(), LogLevel::Data);
    let mut clock = TestClock::new();
    let mut monitor = Monitor::new(MonitorConfig::default());

    // No reply is scripted; the exchange times out.
    assert!(monitor.tick(&mut dwm1000, &mut logger, &mut clock).is_none());

    let output = logger.free();
    assert!(output.contains("[ERROR] Ranging measurement failed! | Status: ERROR"));
    assert!(output.contains("[DEBUG] Status change | Status: ERROR"));
}

#[test]
fn suppressed_severities_stay_off_the_diagnostic_channel() {
    let handle = SimHandle::new();
    let mut dwm1000 = ranging_tag(&handle);
    let mut logger = Logger::new(String::new(), LogLevel::Warn);
    let mut clock = TestClock::with_step(0);
    let mut monitor = Monitor::new(MonitorConfig::default());

    handle.queue_frame(reply_frame(&handle, 533));
    let result = monitor.tick(&mut dwm1000, &mut logger, &mut clock);

    // The measurement still happens; only the reporting is filtered.
    assert!(result.is_some());
    assert_eq!(logger.free(), "");
}
