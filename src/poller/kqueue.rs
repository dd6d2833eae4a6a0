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

//! BSD `kqueue(2)` backend.
//!
//! Kqueue keeps an independent filter per direction. Attaching adds one filter per requested
//! direction; modifying adds every requested filter and deletes every other one. All changes for a
//! call go in a single change list, each with a receipt, so a failure is attributed to its entry.
//! The kernel drops filters of a descriptor once it gets closed.

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, mem, ptr};

use crate::interest::Direction;
use crate::poller::{timeout_timespec, Backend};
use crate::{Interest, Readiness, ReadyEvent, UserData};

/// Extra `kevent` flags merged into every filter added by the poller.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct KqueueFlags(u16);

impl KqueueFlags {
    /// `EV_CLEAR`: reset filter state once retrieved, i.e. edge-triggered reporting.
    pub const CLEAR: KqueueFlags = KqueueFlags(libc::EV_CLEAR as u16);
    /// `EV_ONESHOT`: delete the filter after its first event.
    pub const ONESHOT: KqueueFlags = KqueueFlags(libc::EV_ONESHOT as u16);
    /// `EV_DISPATCH`: disable the filter after each event until it is modified again.
    pub const DISPATCH: KqueueFlags = KqueueFlags(libc::EV_DISPATCH as u16);

    const ALL: u16 = Self::CLEAR.0 | Self::ONESHOT.0 | Self::DISPATCH.0;

    pub const fn empty() -> Self { KqueueFlags(0) }

    /// Validates raw bits, rejecting action flags like `EV_ADD` or `EV_DELETE`.
    pub const fn from_bits(bits: u16) -> Option<Self> {
        if bits & !Self::ALL != 0 {
            None
        } else {
            Some(KqueueFlags(bits))
        }
    }

    pub const fn bits(self) -> u16 { self.0 }

    pub const fn contains(self, other: KqueueFlags) -> bool { self.0 & other.0 == other.0 }
}

impl std::ops::BitOr for KqueueFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output { KqueueFlags(self.0 | rhs.0) }
}

/// Ready-event record.
///
/// The `udata` pointer inside is only an opaque word handed back to the caller, never
/// dereferenced, so moving it across threads is fine.
#[derive(Copy, Clone)]
#[repr(transparent)]
pub struct KEvent(libc::kevent);

unsafe impl Send for KEvent {}

/// Kqueue instance.
#[derive(Debug)]
pub struct Kqueue {
    fd: OwnedFd,
}

fn filter(dir: Direction) -> i16 {
    match dir {
        Direction::Read => libc::EVFILT_READ,
        Direction::Write => libc::EVFILT_WRITE,
    }
}

fn change(fd: RawFd, dir: Direction, flags: u16, data: UserData) -> libc::kevent {
    let mut ev: libc::kevent = unsafe { mem::zeroed() };
    ev.ident = fd as libc::uintptr_t;
    ev.filter = filter(dir);
    ev.flags = flags | libc::EV_RECEIPT;
    ev.udata = data.as_usize() as _;
    ev
}

impl Kqueue {
    /// Submits the change list, checking the receipt of every entry.
    ///
    /// Receipts for deletions failing with one of `ignore` codes are not treated as errors.
    fn submit(&self, changes: &[libc::kevent], ignore: &[libc::c_int]) -> io::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut receipts: [libc::kevent; 2] = unsafe { mem::zeroed() };
        let res = unsafe {
            libc::kevent(
                self.fd.as_raw_fd(),
                changes.as_ptr(),
                changes.len() as _,
                receipts.as_mut_ptr(),
                receipts.len() as _,
                ptr::null(),
            )
        };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }
        for receipt in &receipts[..res as usize] {
            if receipt.flags & libc::EV_ERROR == 0 || receipt.data == 0 {
                continue;
            }
            let code = receipt.data as libc::c_int;
            let is_delete = changes
                .iter()
                .any(|c| c.filter == receipt.filter && c.flags & libc::EV_DELETE != 0);
            if is_delete && ignore.contains(&code) {
                #[cfg(feature = "log")]
                log::trace!(target: Self::NAME, "Ignoring receipt error {code} for deleted filter");
                continue;
            }
            return Err(io::Error::from_raw_os_error(code));
        }
        Ok(())
    }
}

impl Backend for Kqueue {
    type Event = KEvent;
    type Flags = KqueueFlags;

    const NAME: &'static str = "kqueue";
    const MAX_CAPACITY: usize = libc::c_int::MAX as usize;
    const EDGE: KqueueFlags = KqueueFlags::CLEAR;

    fn create(_capacity: usize) -> io::Result<Self> {
        let fd = unsafe { libc::kqueue() };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Kqueue { fd })
    }

    fn empty_event() -> Self::Event { KEvent(unsafe { mem::zeroed() }) }

    fn attach(
        &self,
        fd: RawFd,
        interest: Interest,
        flags: KqueueFlags,
        data: UserData,
    ) -> io::Result<()> {
        // Nothing exists yet, so unrequested directions get no entry at all
        let changes = interest
            .map(|dir| change(fd, dir, libc::EV_ADD | flags.bits(), data))
            .collect::<Vec<_>>();
        self.submit(&changes, &[])
    }

    fn modify(
        &self,
        fd: RawFd,
        interest: Interest,
        flags: KqueueFlags,
        data: UserData,
    ) -> io::Result<()> {
        let changes = interest
            .directions()
            .map(|(dir, wanted)| {
                if wanted {
                    change(fd, dir, libc::EV_ADD | flags.bits(), data)
                } else {
                    change(fd, dir, libc::EV_DELETE, data)
                }
            })
            .collect::<Vec<_>>();
        self.submit(&changes, &[libc::ENOENT])
    }

    fn detach(&self, fd: RawFd) -> io::Result<()> {
        let changes = [Direction::Read, Direction::Write]
            .map(|dir| change(fd, dir, libc::EV_DELETE, UserData::default()));
        // Closing a descriptor already deletes its filters
        self.submit(&changes, &[libc::ENOENT, libc::EBADF])
    }

    fn wait(&self, events: &mut [Self::Event], timeout: Option<Duration>) -> io::Result<usize> {
        let ts = timeout.map(timeout_timespec);
        let max = events.len().min(Self::MAX_CAPACITY) as libc::c_int;
        let res = unsafe {
            libc::kevent(
                self.fd.as_raw_fd(),
                ptr::null(),
                0,
                events.as_mut_ptr() as *mut libc::kevent,
                max,
                ts.as_ref().map_or(ptr::null(), |ts| ts as *const _),
            )
        };
        if res == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                #[cfg(feature = "log")]
                log::trace!(target: Self::NAME, "Wait interrupted with no events retrieved");
                return Ok(0);
            }
            return Err(err);
        }
        Ok(res as usize)
    }

    fn decode(event: &Self::Event) -> ReadyEvent {
        let ev = &event.0;
        let mut bits = match ev.filter {
            libc::EVFILT_READ => Readiness::READABLE,
            libc::EVFILT_WRITE => Readiness::WRITABLE,
            _ => 0,
        };
        // End-of-file may arrive on either filter; both mean the peer went away
        if ev.flags & libc::EV_EOF != 0 {
            bits |= Readiness::HUNG_UP;
        }
        let raw = (ev.flags as u32) << 16 | (ev.filter as u16 as u32);
        ReadyEvent {
            data: UserData::from(ev.udata as usize),
            readiness: Readiness::new(bits, raw),
        }
    }
}
