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

//! Linux `epoll(7)` backend.
//!
//! Epoll keeps a single combined interest record per descriptor, so [`Epoll::modify`] simply
//! replaces it. Registrations are dropped by the kernel once the last reference to the open file
//! description is closed.

use std::ops::{BitOr, BitOrAssign};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, mem};

use crate::poller::{timeout_millis, Backend};
use crate::{Interest, Readiness, ReadyEvent, UserData};

/// Extra `epoll_ctl` flags merged into every registration.
///
/// Only bits which select the triggering discipline or wake-up behaviour are accepted; interest
/// bits are always derived from [`Interest`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct EpollFlags(u32);

impl EpollFlags {
    /// `EPOLLET`: report each readiness transition once.
    pub const EDGE_TRIGGERED: EpollFlags = EpollFlags(libc::EPOLLET as u32);
    /// `EPOLLONESHOT`: disarm the descriptor after one event until it is modified again.
    pub const ONESHOT: EpollFlags = EpollFlags(libc::EPOLLONESHOT as u32);
    /// `EPOLLPRI`: also report urgent (out-of-band) data.
    pub const PRIORITY: EpollFlags = EpollFlags(libc::EPOLLPRI as u32);
    /// `EPOLLWAKEUP`: keep the system from suspending while the event is being handled.
    pub const WAKEUP: EpollFlags = EpollFlags(libc::EPOLLWAKEUP as u32);

    const ALL: u32 = Self::EDGE_TRIGGERED.0 | Self::ONESHOT.0 | Self::PRIORITY.0 | Self::WAKEUP.0;

    pub const fn empty() -> Self { EpollFlags(0) }

    /// Validates raw bits, rejecting anything besides the known extra flags.
    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ALL != 0 {
            None
        } else {
            Some(EpollFlags(bits))
        }
    }

    pub const fn bits(self) -> u32 { self.0 }

    pub const fn contains(self, other: EpollFlags) -> bool { self.0 & other.0 == other.0 }
}

impl BitOr for EpollFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output { EpollFlags(self.0 | rhs.0) }
}

impl BitOrAssign for EpollFlags {
    fn bitor_assign(&mut self, rhs: Self) { self.0 |= rhs.0 }
}

/// Epoll instance.
#[derive(Debug)]
pub struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    fn ctl(&self, op: libc::c_int, fd: RawFd, event: Option<libc::epoll_event>) -> io::Result<()> {
        let mut event = event;
        let ptr = event.as_mut().map_or(std::ptr::null_mut(), |ev| ev as *mut _);
        if unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, ptr) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn event(interest: Interest, flags: EpollFlags, data: UserData) -> libc::epoll_event {
        let mut events = flags.bits();
        if interest.read {
            // Peer half-close is folded into the hang-up bit, just like on kqueue
            events |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
        }
        if interest.write {
            events |= libc::EPOLLOUT as u32;
        }
        libc::epoll_event {
            events,
            u64: data.as_usize() as u64,
        }
    }
}

impl Backend for Epoll {
    type Event = libc::epoll_event;
    type Flags = EpollFlags;

    const NAME: &'static str = "epoll";
    // Kernel caps `maxevents` at `INT_MAX / sizeof(struct epoll_event)`
    const MAX_CAPACITY: usize = libc::c_int::MAX as usize / mem::size_of::<libc::epoll_event>();
    const EDGE: EpollFlags = EpollFlags::EDGE_TRIGGERED;

    fn create(_capacity: usize) -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Epoll { fd })
    }

    fn empty_event() -> Self::Event { libc::epoll_event { events: 0, u64: 0 } }

    fn attach(
        &self,
        fd: RawFd,
        interest: Interest,
        flags: EpollFlags,
        data: UserData,
    ) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, Some(Self::event(interest, flags, data)))
    }

    fn modify(
        &self,
        fd: RawFd,
        interest: Interest,
        flags: EpollFlags,
        data: UserData,
    ) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, Some(Self::event(interest, flags, data)))
    }

    fn detach(&self, fd: RawFd) -> io::Result<()> {
        match self.ctl(libc::EPOLL_CTL_DEL, fd, None) {
            // Not registered, or already closed by its owner and thus removed by the kernel
            Err(err) if matches!(err.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF)) => {
                #[cfg(feature = "log")]
                log::trace!(target: Self::NAME, "Nothing to detach for {fd}: {err}");
                Ok(())
            }
            res => res,
        }
    }

    fn wait(&self, events: &mut [Self::Event], timeout: Option<Duration>) -> io::Result<usize> {
        let max = events.len().min(Self::MAX_CAPACITY) as libc::c_int;
        let res = unsafe {
            libc::epoll_wait(self.fd.as_raw_fd(), events.as_mut_ptr(), max, timeout_millis(timeout))
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
        let raw = event.events;
        let mut bits = 0u8;
        if raw & (libc::EPOLLIN | libc::EPOLLPRI) as u32 != 0 {
            bits |= Readiness::READABLE;
        }
        if raw & libc::EPOLLOUT as u32 != 0 {
            bits |= Readiness::WRITABLE;
        }
        if raw & (libc::EPOLLHUP | libc::EPOLLRDHUP) as u32 != 0 {
            bits |= Readiness::HUNG_UP;
        }
        ReadyEvent {
            data: UserData::from(event.u64 as usize),
            readiness: Readiness::new(bits, raw),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use super::*;
    use crate::{Config, InitError, Poller, RegistrationError};

    #[test]
    fn flags_validation() {
        assert_eq!(EpollFlags::from_bits(0), Some(EpollFlags::empty()));
        assert_eq!(
            EpollFlags::from_bits(libc::EPOLLET as u32 | libc::EPOLLONESHOT as u32),
            Some(EpollFlags::EDGE_TRIGGERED | EpollFlags::ONESHOT)
        );
        assert_eq!(EpollFlags::from_bits(libc::EPOLLIN as u32), None);
        assert_eq!(EpollFlags::from_bits(libc::EPOLLOUT as u32 | libc::EPOLLET as u32), None);

        let mut flags = EpollFlags::PRIORITY;
        flags |= EpollFlags::WAKEUP;
        assert!(flags.contains(EpollFlags::WAKEUP));
        assert!(!flags.contains(EpollFlags::EDGE_TRIGGERED));
    }

    #[test]
    fn extra_flags_merged() {
        let event = Epoll::event(Interest::READABLE, EpollFlags::EDGE_TRIGGERED, UserData::from(5));
        let events = event.events;
        assert_eq!(
            events,
            (libc::EPOLLIN | libc::EPOLLRDHUP) as u32 | libc::EPOLLET as u32
        );
        let data = event.u64;
        assert_eq!(data, 5);

        let event = Epoll::event(Interest::WRITABLE, EpollFlags::empty(), UserData::from(6));
        let events = event.events;
        assert_eq!(events, libc::EPOLLOUT as u32);
    }

    #[test]
    fn decode_folds_half_close() {
        let event = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLRDHUP) as u32,
            u64: 11,
        };
        let ready = Epoll::decode(&event);
        assert_eq!(ready.data, UserData::from(11));
        assert!(ready.readiness.is_readable());
        assert!(ready.readiness.is_hung_up());
        assert!(!ready.readiness.is_writable());

        let event = libc::epoll_event {
            events: (libc::EPOLLERR | libc::EPOLLOUT) as u32,
            u64: 12,
        };
        let ready = Epoll::decode(&event);
        assert!(ready.readiness.is_writable());
        assert_eq!(ready.readiness.raw() & libc::EPOLLERR as u32, libc::EPOLLERR as u32);
    }

    #[test]
    fn capacity_bounded_by_kernel_limit() {
        let limit = Epoll::MAX_CAPACITY;
        assert!(limit * mem::size_of::<libc::epoll_event>() <= libc::c_int::MAX as usize);
        assert!(matches!(
            Poller::<Epoll>::new(Config::new(limit + 1)),
            Err(InitError::InvalidCapacity(n)) if n == limit + 1
        ));
    }

    #[test]
    fn attach_twice_fails() {
        let poller = Poller::<Epoll>::new(Config::new(2)).unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap();
        let err = poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap_err();
        assert!(matches!(err, RegistrationError::Attach(..)));
        assert_eq!(err.raw_os_error(), Some(libc::EEXIST));
    }

    #[test]
    fn modify_unknown_fails() {
        let poller = Poller::<Epoll>::new(Config::new(2)).unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let err = poller.modify(&a, Interest::READABLE, UserData::from(1)).unwrap_err();
        assert!(matches!(err, RegistrationError::Modify(fd, _) if fd == a.as_raw_fd()));
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn oneshot_requires_rearm() {
        let mut poller = Poller::<Epoll>::new(
            Config::new(2).with_timeout(Some(Duration::ZERO)).with_flags(EpollFlags::ONESHOT),
        )
        .unwrap();
        let (a, mut b) = UnixStream::pair().unwrap();
        poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap();
        b.write_all(b"data").unwrap();

        assert_eq!(poller.wait().unwrap(), 1);
        assert_eq!(poller.wait().unwrap(), 0);

        poller.modify(&a, Interest::READABLE, UserData::from(2)).unwrap();
        assert_eq!(poller.wait().unwrap(), 1);
        assert_eq!(poller.event(0).unwrap().data, UserData::from(2));
    }
}
