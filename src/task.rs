// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Enumerate remote tasks and derive their memory statistics.
// Author: Lukas Bower

//! Task inspection over the `/dev/sys` task ioctl.

use serde::Serialize;

use heliolink_wire::{errno, requests, TaskAttr};

use crate::driver::DeviceDriver;
use crate::error::{LinkError, Result};
use crate::fs::{OpenMode, RemoteFile};
use crate::link::Link;

/// Snapshot of one task slot with derived statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    /// Task id.
    pub tid: u32,
    /// Owning process id.
    pub pid: u32,
    /// Task name.
    pub name: String,
    /// Accumulated scheduler timer ticks.
    pub timer: u64,
    /// Memory region start address.
    pub mem_loc: u32,
    /// Memory region size in bytes.
    pub mem_size: u32,
    /// Current heap break address.
    pub malloc_loc: u32,
    /// Current stack pointer.
    pub stack_ptr: u32,
    /// Scheduling priority.
    pub priority: u8,
    /// Priority ceiling while holding a mutex.
    pub priority_ceiling: u8,
    /// Whether the task is runnable right now.
    pub is_active: bool,
    /// Whether the task is a thread rather than a process.
    pub is_thread: bool,
    /// Whether the slot is assigned at all.
    pub is_enabled: bool,
}

impl TaskInfo {
    /// Bytes of stack in use.
    #[must_use]
    pub fn stack_size(&self) -> u32 {
        self.mem_loc
            .wrapping_add(self.mem_size)
            .wrapping_sub(self.stack_ptr)
    }

    /// Bytes of heap in use; threads share their process heap and report 0.
    #[must_use]
    pub fn heap_size(&self) -> u32 {
        if self.is_thread {
            0
        } else {
            self.malloc_loc.wrapping_sub(self.mem_loc)
        }
    }

    /// Heap-plus-stack usage as a percentage of the memory region.
    #[must_use]
    pub fn memory_utilization(&self) -> u32 {
        if self.mem_size == 0 {
            return 0;
        }
        (self.heap_size() + self.stack_size()) * 100 / self.mem_size
    }
}

impl From<&TaskAttr> for TaskInfo {
    fn from(attr: &TaskAttr) -> Self {
        Self {
            tid: attr.tid,
            pid: attr.pid,
            name: attr.name_str().to_string(),
            timer: attr.timer,
            mem_loc: attr.mem_loc,
            mem_size: attr.mem_size,
            malloc_loc: attr.malloc_loc,
            stack_ptr: attr.stack_ptr,
            priority: attr.prio,
            priority_ceiling: attr.prio_ceiling,
            is_active: attr.is_active != 0,
            is_thread: attr.is_thread != 0,
            is_enabled: attr.is_enabled != 0,
        }
    }
}

/// Inspector for the target's task table.
pub struct TaskManager<D: DeviceDriver> {
    file: RemoteFile<D>,
}

impl<D: DeviceDriver> TaskManager<D> {
    /// Open `/dev/sys` on the connected device.
    pub fn new(link: &Link<D>) -> Result<Self> {
        let file = RemoteFile::open(link, "/dev/sys", OpenMode::read_write())?;
        Ok(Self { file })
    }

    /// Fetch the slot for task `id`. Ids past the task table raise a device
    /// error with `ESRCH`.
    pub fn get_info(&mut self, id: u32) -> Result<TaskInfo> {
        let request = TaskAttr::request(id);
        let (_, reply) = self.file.ioctl(requests::SYS_GET_TASK, &request.to_bytes())?;
        let attr = TaskAttr::from_bytes(&reply)
            .map_err(|error| LinkError::from_wire("get-task", error))?;
        Ok(TaskInfo::from(&attr))
    }

    fn walk_slots(&mut self, mut visit: impl FnMut(TaskInfo) -> bool) -> Result<()> {
        let mut id = 0;
        loop {
            match self.get_info(id) {
                Ok(info) => {
                    if !visit(info) {
                        return Ok(());
                    }
                }
                // the table end is data, not a failure
                Err(LinkError::Device { errno: code, .. }) if code == errno::ESRCH => {
                    return Ok(());
                }
                Err(error) => return Err(error),
            }
            id += 1;
        }
    }

    /// Snapshot every enabled task, in slot order.
    pub fn enumerate(&mut self) -> Result<Vec<TaskInfo>> {
        let mut tasks = Vec::new();
        self.walk_slots(|info| {
            if info.is_enabled {
                tasks.push(info);
            }
            true
        })?;
        Ok(tasks)
    }

    /// Total number of task slots in the table.
    pub fn count_total(&mut self) -> Result<u32> {
        let mut count = 0;
        self.walk_slots(|_| {
            count += 1;
            true
        })?;
        Ok(count)
    }

    /// Number of unassigned task slots.
    pub fn count_free(&mut self) -> Result<u32> {
        let mut count = 0;
        self.walk_slots(|info| {
            if !info.is_enabled {
                count += 1;
            }
            true
        })?;
        Ok(count)
    }

    /// Find the pid of the enabled task named `name`.
    pub fn get_pid(&mut self, name: &str) -> Result<Option<u32>> {
        let mut found = None;
        self.walk_slots(|info| {
            if info.is_enabled && info.name == name {
                found = Some(info.pid);
                false
            } else {
                true
            }
        })?;
        Ok(found)
    }

    /// Whether any enabled task belongs to `pid`.
    pub fn is_pid_running(&mut self, pid: u32) -> Result<bool> {
        let mut running = false;
        self.walk_slots(|info| {
            if info.is_enabled && info.pid == pid {
                running = true;
                false
            } else {
                true
            }
        })?;
        Ok(running)
    }

    /// Deliver `signal` to `pid`.
    pub fn kill_pid(&mut self, pid: u32, signal: u32) -> Result<()> {
        let mut arg = Vec::with_capacity(8);
        arg.extend_from_slice(&pid.to_le_bytes());
        arg.extend_from_slice(&signal.to_le_bytes());
        self.file.ioctl(requests::SYS_KILL, &arg)?;
        Ok(())
    }
}
