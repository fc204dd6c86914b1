// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Task table enumeration and /dev/sys identity queries.
// Author: Lukas Bower

mod support;

use heliolink::sys::Sys;
use heliolink::task::TaskManager;
use heliolink::wire::{make_fixed_str, TaskAttr};
use heliolink::Link;
use support::{MockDevice, MockDriver};

const PATH: &str = "usb/2000/0001/0/SN-A";

fn task(name: &str, pid: u32, enabled: bool) -> TaskAttr {
    let mut attr = TaskAttr::request(0);
    attr.pid = pid;
    attr.name = make_fixed_str(name).expect("name fits");
    attr.mem_loc = 0x2000_0000;
    attr.mem_size = 8192;
    attr.malloc_loc = 0x2000_0400;
    attr.stack_ptr = 0x2000_1c00;
    attr.is_enabled = u8::from(enabled);
    attr
}

fn link_with_tasks() -> (Link<MockDriver>, std::rc::Rc<std::cell::RefCell<MockDevice>>) {
    let mut device = MockDevice::os("helio-dev", [4, 3, 2, 1]);
    device.tasks = vec![
        task("idle", 0, true),
        task("shell", 1, true),
        task("stale", 2, false),
        task("logger", 3, true),
    ];
    let (driver, device) = MockDriver::single(PATH, device);
    let mut link = Link::new(driver);
    link.connect(PATH, false).expect("connect");
    (link, device)
}

#[test]
fn enumeration_skips_disabled_slots_and_stops_at_the_table_end() {
    let (link, _) = link_with_tasks();
    let mut tasks = TaskManager::new(&link).expect("open task manager");
    let listing = tasks.enumerate().expect("enumerate");
    let names: Vec<&str> = listing.iter().map(|info| info.name.as_str()).collect();
    assert_eq!(names, vec!["idle", "shell", "logger"]);
}

#[test]
fn slot_counts_distinguish_total_and_free() {
    let (link, _) = link_with_tasks();
    let mut tasks = TaskManager::new(&link).expect("open task manager");
    assert_eq!(tasks.count_total().expect("total"), 4);
    assert_eq!(tasks.count_free().expect("free"), 1);
}

#[test]
fn pid_lookup_scans_enabled_slots_only() {
    let (link, _) = link_with_tasks();
    let mut tasks = TaskManager::new(&link).expect("open task manager");
    assert_eq!(tasks.get_pid("logger").expect("lookup"), Some(3));
    assert_eq!(tasks.get_pid("stale").expect("lookup"), None);
    assert!(tasks.is_pid_running(1).expect("running"));
    assert!(!tasks.is_pid_running(2).expect("running"));
}

#[test]
fn kill_reaches_the_device() {
    let (link, device) = link_with_tasks();
    let mut tasks = TaskManager::new(&link).expect("open task manager");
    tasks.kill_pid(3, 9).expect("kill");
    assert_eq!(device.borrow().kill_calls, vec![(3, 9)]);
}

#[test]
fn sys_inspector_reads_identity_and_secret_material() {
    let (link, device) = link_with_tasks();
    device.borrow_mut().secret_key = [0x5C; 32];
    let mut sys = Sys::new(&link).expect("open /dev/sys");

    let info = sys.get_info().expect("sys info");
    assert_eq!(info.name, "helio-dev");
    assert!(info.is_valid());
    assert_eq!(
        sys.get_serial_number().expect("serial").to_string(),
        "00000001000000020000000300000004"
    );
    assert_eq!(sys.get_id().expect("id"), "io.helio.dev");
    assert_eq!(sys.get_secret_key().expect("secret"), [0x5C; 32]);
    assert!(!sys.is_authenticated().expect("auth flag"));
}
