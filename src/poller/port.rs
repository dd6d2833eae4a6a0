// Portable readiness-notification multiplexer.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2023 by
//     Dr. Maxim Orlovsky <orlovsky@ubideco.org>
//     Alexis Sellier <alexis@cloudhead.io>
//
// Copyright 2022-2023 UBIDECO Institute, Switzerland
// Copyright 2021 Alexis Sellier <alexis@cloudhead.io>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! illumos/Solaris event ports backend.
//!
//! File descriptor associations of an event port are one-shot: the kernel dissociates a
//! descriptor as soon as an event for it is retrieved. Callers re-arm it with
//! [`crate::Poller::modify`], which re-associates the descriptor replacing the previous record.
//! This makes every event port registration report a transition once, whatever the flags.

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, mem, ptr};

use crate::poller::{timeout_timespec, Backend};
use crate::{Interest, Readiness, ReadyEvent, UserData};

/// Extra `poll(2)` event bits merged into every association.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct PortFlags(libc::c_int);

impl PortFlags {
    /// `POLLPRI`: also report high-priority data.
    pub const PRIORITY: PortFlags = PortFlags(libc::POLLPRI as libc::c_int);
    /// `POLLRDBAND`: also report priority band data.
    pub const READ_BAND: PortFlags = PortFlags(libc::POLLRDBAND as libc::c_int);

    const ALL: libc::c_int = Self::PRIORITY.0 | Self::READ_BAND.0;

    pub const fn empty() -> Self { PortFlags(0) }

    /// Validates raw bits, rejecting the interest bits and anything unknown.
    pub const fn from_bits(bits: libc::c_int) -> Option<Self> {
        if bits & !Self::ALL != 0 {
            None
        } else {
            Some(PortFlags(bits))
        }
    }

    pub const fn bits(self) -> libc::c_int { self.0 }
}

impl std::ops::BitOr for PortFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output { PortFlags(self.0 | rhs.0) }
}

/// Ready-event record.
///
/// `portev_user` is only an opaque word handed back to the caller, never dereferenced.
#[derive(Copy, Clone)]
#[repr(transparent)]
pub struct PortEvent(libc::port_event);

unsafe impl Send for PortEvent {}

/// Event port instance.
#[derive(Debug)]
pub struct Port {
    fd: OwnedFd,
}

impl Port {
    fn associate(
        &self,
        fd: RawFd,
        interest: Interest,
        flags: PortFlags,
        data: UserData,
    ) -> io::Result<()> {
        let mut events = flags.bits();
        if interest.read {
            events |= libc::POLLIN as libc::c_int;
        }
        if interest.write {
            events |= libc::POLLOUT as libc::c_int;
        }
        let res = unsafe {
            libc::port_associate(
                self.fd.as_raw_fd(),
                libc::PORT_SOURCE_FD,
                fd as libc::uintptr_t,
                events,
                data.as_usize() as *mut libc::c_void,
            )
        };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Backend for Port {
    type Event = PortEvent;
    type Flags = PortFlags;

    const NAME: &'static str = "port";
    const MAX_CAPACITY: usize = libc::c_int::MAX as usize;
    const EDGE: PortFlags = PortFlags::empty();

    fn create(_capacity: usize) -> io::Result<Self> {
        let fd = unsafe { libc::port_create() };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Port { fd })
    }

    fn empty_event() -> Self::Event { PortEvent(unsafe { mem::zeroed() }) }

    fn attach(
        &self,
        fd: RawFd,
        interest: Interest,
        flags: PortFlags,
        data: UserData,
    ) -> io::Result<()> {
        self.associate(fd, interest, flags, data)
    }

    fn modify(
        &self,
        fd: RawFd,
        interest: Interest,
        flags: PortFlags,
        data: UserData,
    ) -> io::Result<()> {
        self.associate(fd, interest, flags, data)
    }

    fn detach(&self, fd: RawFd) -> io::Result<()> {
        let res = unsafe {
            libc::port_dissociate(self.fd.as_raw_fd(), libc::PORT_SOURCE_FD, fd as libc::uintptr_t)
        };
        if res == -1 {
            let err = io::Error::last_os_error();
            // Already dissociated by a delivered event, or never associated
            if matches!(err.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF)) {
                #[cfg(feature = "log")]
                log::trace!(target: Self::NAME, "Nothing to detach for {fd}: {err}");
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    fn wait(&self, events: &mut [Self::Event], timeout: Option<Duration>) -> io::Result<usize> {
        let mut ts = timeout.map(timeout_timespec);
        let max = events.len().min(Self::MAX_CAPACITY) as libc::c_uint;
        let mut nget: libc::c_uint = 1;
        let res = unsafe {
            libc::port_getn(
                self.fd.as_raw_fd(),
                events.as_mut_ptr() as *mut libc::port_event,
                max,
                &mut nget,
                ts.as_mut().map_or(ptr::null_mut(), |ts| ts as *mut _),
            )
        };
        if res == 0 {
            return Ok(nget as usize);
        }

        let err = io::Error::last_os_error();
        let retrieved = (nget as usize).min(events.len());
        match err.raw_os_error() {
            Some(libc::EINTR) | Some(libc::EAGAIN) | Some(libc::ETIME) => {
                #[cfg(feature = "log")]
                log::trace!(target: Self::NAME,
                    "Wait interrupted ({err}) after retrieving {retrieved} event(s)");
                Ok(retrieved)
            }
            _ if retrieved > 0 => {
                #[cfg(feature = "log")]
                log::warn!(target: Self::NAME,
                    "Wait failed ({err}) after retrieving {retrieved} event(s); delivering them");
                Ok(retrieved)
            }
            _ => Err(err),
        }
    }

    fn decode(event: &Self::Event) -> ReadyEvent {
        let ev = &event.0;
        let raw = ev.portev_events;
        let mut bits = 0u8;
        if raw & (libc::POLLIN | libc::POLLPRI | libc::POLLRDBAND) as libc::c_int != 0 {
            bits |= Readiness::READABLE;
        }
        if raw & libc::POLLOUT as libc::c_int != 0 {
            bits |= Readiness::WRITABLE;
        }
        if raw & libc::POLLHUP as libc::c_int != 0 {
            bits |= Readiness::HUNG_UP;
        }
        ReadyEvent {
            data: UserData::from(ev.portev_user as usize),
            readiness: Readiness::new(bits, raw as u32),
        }
    }
}
