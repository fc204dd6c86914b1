// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Connection state machine, retry discipline, and reconnect identity.
// Author: Lukas Bower

mod support;

use std::time::Duration;

use heliolink::wire::errno;
use heliolink::{Link, LinkError};
use support::{MockDevice, MockDriver};

const SERIAL: [u32; 4] = [0xD4, 0xD3, 0xD2, 0xD1];

#[test]
fn connect_classifies_an_os_peer() {
    let (driver, _) = MockDriver::single(
        "usb/2000/0001/0/SN-A",
        MockDevice::os("helio-dev", SERIAL),
    );
    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");
    assert!(link.is_connected());
    assert!(!link.is_bootloader());
    assert_eq!(link.sys_info().name, "helio-dev");
    assert_eq!(
        link.serial_number().to_string(),
        "000000D1000000D2000000D3000000D4"
    );
}

#[test]
fn connect_to_a_bootloader_synthesizes_identity() {
    let (driver, _) = MockDriver::single(
        "usb/2000/0001/0/SN-A",
        MockDevice::bootloader(0x0300, 0x4100_0001, SERIAL),
    );
    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");
    assert!(link.is_bootloader());
    assert_eq!(link.sys_info().name, "bootloader");
    assert_eq!(link.sys_info().hardware_id, 0x4100_0001);
    assert_eq!(link.bootloader_attrs().version, 0x0300);
}

#[test]
fn connect_to_a_second_path_while_bound_is_invalid() {
    let mut driver = MockDriver::new();
    driver.register("usb/2000/0001/0/SN-A", MockDevice::os("a", [1, 1, 1, 1]));
    driver.register("usb/2000/0001/0/SN-B", MockDevice::os("b", [2, 2, 2, 2]));
    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");

    let error = link
        .connect("usb/2000/0001/0/SN-B", false)
        .expect_err("second path must fail");
    assert!(matches!(error, LinkError::InvalidArgument { .. }));
    assert_eq!(error.errno(), errno::EINVAL);
    // the original connection is untouched
    assert!(link.is_connected());
    assert_eq!(link.path(), "usb/2000/0001/0/SN-A");
}

#[test]
fn disconnect_is_idempotent() {
    let (driver, _) = MockDriver::single(
        "usb/2000/0001/0/SN-A",
        MockDevice::os("helio-dev", SERIAL),
    );
    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");
    link.disconnect().expect("disconnect");
    link.disconnect().expect("disconnect again");
    assert!(!link.is_connected());
}

#[test]
fn retriable_opcodes_survive_two_protocol_errors() {
    let (driver, device) = MockDriver::single(
        "usb/2000/0001/0/SN-A",
        MockDevice::os("helio-dev", SERIAL),
    );
    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");

    device.borrow_mut().protocol_error_budget = 2;
    let stat = link.fs().get_info("/app").expect("stat retries through");
    assert!(stat.is_directory());
}

#[test]
fn three_protocol_errors_exhaust_the_retry_budget() {
    let (driver, device) = MockDriver::single(
        "usb/2000/0001/0/SN-A",
        MockDevice::os("helio-dev", SERIAL),
    );
    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");

    device.borrow_mut().protocol_error_budget = 3;
    let error = link.fs().get_info("/app").expect_err("retries exhausted");
    assert!(matches!(error, LinkError::Transport { .. }));
}

#[test]
fn device_errors_are_not_retried() {
    let (driver, device) = MockDriver::single(
        "usb/2000/0001/0/SN-A",
        MockDevice::os("helio-dev", SERIAL),
    );
    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");

    let error = link.fs().get_info("/nope").expect_err("missing path");
    match error {
        LinkError::Device { errno: code, .. } => assert_eq!(code, errno::ENOENT),
        other => panic!("unexpected error {other:?}"),
    }
    // a device error consumes exactly one request
    assert_eq!(device.borrow().protocol_error_budget, 0);
}

#[test]
fn reconnect_follows_the_device_to_a_new_path() {
    let mut driver = MockDriver::new();
    let first = driver.register("usb/2000/0001/0/SN-A", MockDevice::os("helio-dev", SERIAL));
    driver.register("usb/2000/0001/1/SN-A", MockDevice::os("helio-dev", SERIAL));

    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");
    let serial_before = link.serial_number();

    // the device re-enumerates on a different interface
    first.borrow_mut().alive = false;
    link.reconnect(2, Duration::from_millis(10)).expect("reconnect");
    assert_eq!(link.path(), "usb/2000/0001/1/SN-A");
    assert_eq!(link.serial_number(), serial_before);
}

#[test]
fn reconnect_rejects_an_identity_mismatch() {
    let mut driver = MockDriver::new();
    let first = driver.register("usb/2000/0001/0/SN-A", MockDevice::os("helio-dev", SERIAL));
    driver.register(
        "usb/2000/0001/0/SN-B",
        MockDevice::os("impostor", [9, 9, 9, 9]),
    );

    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");
    let serial_before = link.serial_number();

    first.borrow_mut().alive = false;
    let error = link
        .reconnect(2, Duration::from_millis(10))
        .expect_err("wrong serial must not satisfy reconnect");
    assert_eq!(error.errno(), errno::EBADF);
    // the last-known identity survives for error reporting
    assert_eq!(link.serial_number(), serial_before);
    assert!(!link.is_connected());
}

#[test]
fn reset_swallows_the_expected_transport_error() {
    let (driver, device) = MockDriver::single(
        "usb/2000/0001/0/SN-A",
        MockDevice::os("helio-dev", SERIAL),
    );
    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");

    link.reset().expect("reset must not surface the lost reply");
    assert!(!link.is_connected());
    assert!(!device.borrow().alive);
}

#[test]
fn os_only_operations_reject_bootloader_mode() {
    let (driver, _) = MockDriver::single(
        "usb/2000/0001/0/SN-A",
        MockDevice::bootloader(0x0400, 0x4100_0001, SERIAL),
    );
    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");

    let error = link.run_app("/app/flash/blinky").expect_err("wrong mode");
    assert!(matches!(error, LinkError::WrongMode { .. }));
    assert_eq!(error.errno(), errno::EIO);

    let error = link.format("/home").expect_err("wrong mode");
    assert!(matches!(error, LinkError::WrongMode { .. }));
}

#[test]
fn operations_without_a_connection_report_ebadf() {
    let (driver, _) = MockDriver::single(
        "usb/2000/0001/0/SN-A",
        MockDevice::os("helio-dev", SERIAL),
    );
    let mut link = Link::new(driver);
    let error = link.reset().expect_err("not connected");
    assert_eq!(error.errno(), errno::EBADF);
}

#[test]
fn run_app_and_format_reach_the_device() {
    let (driver, device) = MockDriver::single(
        "usb/2000/0001/0/SN-A",
        MockDevice::os("helio-dev", SERIAL),
    );
    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");

    link.run_app("/app/flash/blinky").expect("exec");
    link.format("/home").expect("mkfs");
    let device = device.borrow();
    assert_eq!(device.exec_calls, vec!["/app/flash/blinky".to_string()]);
    assert_eq!(device.mkfs_calls, vec!["/home".to_string()]);
}

#[test]
fn time_round_trips_through_the_device() {
    let (driver, _) = MockDriver::single(
        "usb/2000/0001/0/SN-A",
        MockDevice::os("helio-dev", SERIAL),
    );
    let mut link = Link::new(driver);
    link.connect("usb/2000/0001/0/SN-A", false).expect("connect");

    let mut time = heliolink::wire::LinkTime::default();
    time.year = 126;
    time.mon = 7;
    time.mday = 2;
    time.hour = 13;
    link.set_time(&time).expect("set time");
    assert_eq!(link.get_time().expect("get time"), time);
}
