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

//! Poller and the backend capability set it is built on.
//!
//! Exactly one backend is compiled in per target platform and exported as [`Sys`]:
//!
//! | Platform                                   | Backend            | Extra flags        |
//! |--------------------------------------------|--------------------|--------------------|
//! | Linux, Android                             | [`epoll::Epoll`]   | [`epoll::EpollFlags`] |
//! | macOS, iOS, FreeBSD, DragonFly             | [`kqueue::Kqueue`] | [`kqueue::KqueueFlags`] |
//! | illumos, Solaris                           | [`port::Port`]     | [`port::PortFlags`]  |

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
pub mod kqueue;
#[cfg(any(target_os = "illumos", target_os = "solaris"))]
pub mod port;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::Epoll as Sys;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
pub use kqueue::Kqueue as Sys;
#[cfg(any(target_os = "illumos", target_os = "solaris"))]
pub use port::Port as Sys;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "illumos",
    target_os = "solaris"
)))]
compile_error!("ioevent has no readiness backend for this target platform");

use std::fmt::Debug;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::{self, InitError, PollError, RegistrationError};
use crate::{Interest, ReadyEvent, UserData};

/// Capability set every platform readiness facility has to provide.
///
/// Implementations own the OS handle (closing it on drop) and translate between the canonical
/// [`Interest`]/[`crate::Readiness`] vocabulary and the native encoding. They keep no
/// registration state of their own: registrations live in the kernel.
pub trait Backend: Send + Sync + Sized + 'static {
    /// Native ready-event record filled by the kernel.
    type Event: Copy + Send;

    /// Backend-specific flags merged into every registration.
    type Flags: Copy + Eq + Default + Debug + Send + Sync;

    /// Name of the backend, also used as the logging target.
    const NAME: &'static str;

    /// Largest ready batch the OS call is able to return at once.
    const MAX_CAPACITY: usize;

    /// Flags making the backend report each readiness transition once.
    const EDGE: Self::Flags;

    /// Creates OS handle. The capacity is a sizing hint only.
    fn create(capacity: usize) -> io::Result<Self>;

    /// Placeholder value used to pre-fill the ready-event buffer.
    fn empty_event() -> Self::Event;

    /// Registers a descriptor which is not yet known to the backend.
    fn attach(&self, fd: RawFd, interest: Interest, flags: Self::Flags, data: UserData)
        -> io::Result<()>;

    /// Replaces interest and user data of an already registered descriptor.
    fn modify(&self, fd: RawFd, interest: Interest, flags: Self::Flags, data: UserData)
        -> io::Result<()>;

    /// Drops any interest in the descriptor. Must succeed if there is nothing to drop.
    fn detach(&self, fd: RawFd) -> io::Result<()>;

    /// Blocks until at least one event is ready or the timeout elapses, filling `events` from
    /// the start. Returns the number of filled slots; transient interruptions map to the number of
    /// events already retrieved (possibly zero).
    fn wait(&self, events: &mut [Self::Event], timeout: Option<Duration>) -> io::Result<usize>;

    /// Translates a filled slot into the canonical vocabulary.
    fn decode(event: &Self::Event) -> ReadyEvent;
}

/// Poller configuration.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Config<F> {
    /// Maximum number of ready events reported by a single wait call.
    pub capacity: usize,
    /// Maximum time a single wait call blocks; zero polls without blocking and `None` blocks
    /// until some descriptor gets ready.
    pub timeout: Option<Duration>,
    /// Backend flags merged into every registration.
    pub flags: F,
}

impl<F: Default> Default for Config<F> {
    fn default() -> Self {
        Config {
            capacity: 64,
            timeout: Some(Duration::from_secs(1)),
            flags: F::default(),
        }
    }
}

impl<F: Default> Config<F> {
    pub fn new(capacity: usize) -> Self {
        Config {
            capacity,
            ..Config::default()
        }
    }
}

impl<F> Config<F> {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_flags(mut self, flags: F) -> Self {
        self.flags = flags;
        self
    }
}

/// Readiness multiplexer owning the backend handle and the ready-event buffer.
///
/// A poller is meant to be driven by a single reactor thread: [`Poller::wait`] borrows it
/// mutably. Other threads may still change registrations through a [`Registrar`].
pub struct Poller<B: Backend = Sys> {
    backend: Option<Arc<B>>,
    events: Box<[B::Event]>,
    ready: usize,
    capacity: usize,
    timeout: Option<Duration>,
    flags: B::Flags,
}

impl<B: Backend> Poller<B> {
    /// Creates the backend handle and allocates the ready-event buffer.
    ///
    /// # Error
    ///
    /// Errors if the capacity is zero or too large for the backend, if the OS refuses to create
    /// the handle, or if the buffer can't be allocated. In the last case the already created
    /// handle is closed before returning.
    pub fn new(config: Config<B::Flags>) -> Result<Self, InitError> {
        let Config {
            capacity,
            timeout,
            flags,
        } = config;
        if capacity == 0 || capacity > B::MAX_CAPACITY {
            return Err(InitError::InvalidCapacity(capacity));
        }

        let backend = B::create(capacity)?;

        let mut events: Vec<B::Event> = Vec::new();
        events.try_reserve_exact(capacity).map_err(|_| InitError::OutOfMemory(capacity))?;
        events.resize(capacity, B::empty_event());

        #[cfg(feature = "log")]
        log::debug!(target: B::NAME,
            "Poller created with capacity {capacity}, timeout {timeout:?}, flags {flags:?}");

        Ok(Poller {
            backend: Some(Arc::new(backend)),
            events: events.into_boxed_slice(),
            ready: 0,
            capacity,
            timeout,
            flags,
        })
    }

    /// Creates a poller from individual configuration parameters.
    pub fn with(
        capacity: usize,
        timeout: Option<Duration>,
        flags: B::Flags,
    ) -> Result<Self, InitError> {
        Poller::new(Config {
            capacity,
            timeout,
            flags,
        })
    }

    pub fn capacity(&self) -> usize { self.capacity }

    pub fn timeout(&self) -> Option<Duration> { self.timeout }

    pub fn flags(&self) -> B::Flags { self.flags }

    /// Whether [`Poller::teardown`] has already released the poller resources.
    pub fn is_closed(&self) -> bool { self.backend.is_none() }

    /// Returns a handle allowing other threads to change registrations.
    pub fn registrar(&self) -> Registrar<B> {
        Registrar {
            backend: self.backend.as_ref().map(Arc::downgrade).unwrap_or_default(),
            flags: self.flags,
        }
    }

    /// Starts watching `fd` for the requested directions, attaching `data` to every event
    /// reported for it.
    pub fn attach(
        &self,
        fd: &impl AsRawFd,
        interest: Interest,
        data: UserData,
    ) -> Result<(), RegistrationError> {
        let fd = fd.as_raw_fd();
        attach(self.backend.as_deref(), fd, interest, self.flags, data)
    }

    /// Replaces the watched directions and the attached data of a registered `fd`.
    pub fn modify(
        &self,
        fd: &impl AsRawFd,
        interest: Interest,
        data: UserData,
    ) -> Result<(), RegistrationError> {
        let fd = fd.as_raw_fd();
        modify(self.backend.as_deref(), fd, interest, self.flags, data)
    }

    /// Stops watching `fd`.
    ///
    /// Always safe to call: detaching a descriptor which is not registered, or which was already
    /// closed by its owner, succeeds without doing anything.
    pub fn detach(&self, fd: &impl AsRawFd) -> Result<(), RegistrationError> {
        detach(self.backend.as_deref(), fd.as_raw_fd())
    }

    /// Blocks the calling thread until some registered descriptor is ready or the configured
    /// timeout elapses.
    ///
    /// Returns the number of ready slots, never exceeding the capacity. Events which did not fit
    /// stay pending for the next call. Slots of the previous batch are invalidated.
    pub fn wait(&mut self) -> Result<usize, PollError> {
        self.ready = 0;
        let backend = self.backend.as_deref().ok_or_else(error::closed)?;

        #[cfg(feature = "log")]
        log::trace!(target: B::NAME, "Waiting for up to {} event(s) with timeout {:?}",
            self.capacity, self.timeout);

        let count = backend.wait(&mut self.events, self.timeout).map_err(|err| {
            #[cfg(feature = "log")]
            log::error!(target: B::NAME, "Error during polling: {err}");
            PollError::from(err)
        })?;
        self.ready = count.min(self.capacity);

        #[cfg(feature = "log")]
        log::trace!(target: B::NAME, "Poll resulted in {} ready event(s)", self.ready);

        Ok(self.ready)
    }

    /// Number of slots filled by the last [`Poller::wait`] call.
    pub fn len(&self) -> usize { self.ready }

    pub fn is_empty(&self) -> bool { self.ready == 0 }

    /// Decodes the ready slot with the given index from the last batch.
    pub fn event(&self, index: usize) -> Option<ReadyEvent> {
        self.events[..self.ready].get(index).map(B::decode)
    }

    /// Iterates over all ready slots from the last batch.
    pub fn events(&self) -> impl Iterator<Item = ReadyEvent> + '_ {
        self.events[..self.ready].iter().map(B::decode)
    }

    /// Closes the backend handle and releases the ready-event buffer.
    ///
    /// If a [`Registrar`] call is in flight at that moment, the handle is closed only once that
    /// call returns, i.e. possibly after this method returns. Registrar calls made afterwards fail
    /// with `EBADF`. Repeated calls do nothing.
    pub fn teardown(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };

        #[cfg(feature = "log")]
        log::debug!(target: B::NAME, "Tearing down poller");

        // Registrars hold only weak references, so this closes the handle unless one of them is
        // in the middle of a registration call; then the handle closes once that call returns.
        drop(backend);
        self.events = Box::default();
        self.ready = 0;
    }
}

impl<B: Backend> Drop for Poller<B> {
    fn drop(&mut self) { self.teardown() }
}

/// Cloneable handle for changing registrations of a [`Poller`] from other threads.
///
/// Changes submitted while the reactor thread is blocked in [`Poller::wait`] are guaranteed to be
/// observed starting from the next wait call. Once the poller is torn down all operations fail
/// with `EBADF`.
pub struct Registrar<B: Backend = Sys> {
    backend: Weak<B>,
    flags: B::Flags,
}

impl<B: Backend> Clone for Registrar<B> {
    fn clone(&self) -> Self {
        Registrar {
            backend: self.backend.clone(),
            flags: self.flags,
        }
    }
}

impl<B: Backend> Registrar<B> {
    /// See [`Poller::attach`].
    pub fn attach(
        &self,
        fd: &impl AsRawFd,
        interest: Interest,
        data: UserData,
    ) -> Result<(), RegistrationError> {
        let backend = self.backend.upgrade();
        attach(backend.as_deref(), fd.as_raw_fd(), interest, self.flags, data)
    }

    /// See [`Poller::modify`].
    pub fn modify(
        &self,
        fd: &impl AsRawFd,
        interest: Interest,
        data: UserData,
    ) -> Result<(), RegistrationError> {
        let backend = self.backend.upgrade();
        modify(backend.as_deref(), fd.as_raw_fd(), interest, self.flags, data)
    }

    /// See [`Poller::detach`].
    pub fn detach(&self, fd: &impl AsRawFd) -> Result<(), RegistrationError> {
        let backend = self.backend.upgrade();
        detach(backend.as_deref(), fd.as_raw_fd())
    }
}

fn attach<B: Backend>(
    backend: Option<&B>,
    fd: RawFd,
    interest: Interest,
    flags: B::Flags,
    data: UserData,
) -> Result<(), RegistrationError> {
    #[cfg(feature = "log")]
    log::trace!(target: B::NAME, "Attaching {fd} with interest `{interest}` and data {data:#x}");

    backend
        .ok_or_else(error::closed)
        .and_then(|backend| backend.attach(fd, interest, flags, data))
        .map_err(|err| RegistrationError::Attach(fd, err))
}

fn modify<B: Backend>(
    backend: Option<&B>,
    fd: RawFd,
    interest: Interest,
    flags: B::Flags,
    data: UserData,
) -> Result<(), RegistrationError> {
    #[cfg(feature = "log")]
    log::trace!(target: B::NAME, "Setting interest `{interest}` and data {data:#x} on {fd}");

    backend
        .ok_or_else(error::closed)
        .and_then(|backend| backend.modify(fd, interest, flags, data))
        .map_err(|err| RegistrationError::Modify(fd, err))
}

fn detach<B: Backend>(backend: Option<&B>, fd: RawFd) -> Result<(), RegistrationError> {
    #[cfg(feature = "log")]
    log::trace!(target: B::NAME, "Detaching {fd}");

    backend
        .ok_or_else(error::closed)
        .and_then(|backend| backend.detach(fd))
        .map_err(|err| RegistrationError::Detach(fd, err))
}

/// Rounds a timeout up to whole milliseconds, clamped to what a C `int` holds.
///
/// `None` maps to `-1`, the "block indefinitely" value of millisecond-based OS calls.
#[allow(dead_code)] // not every backend takes millisecond timeouts
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    let Some(timeout) = timeout else {
        return -1;
    };
    let millis = timeout.as_millis() + u128::from(timeout.subsec_nanos() % 1_000_000 != 0);
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

/// Converts a timeout to the `timespec` taken by nanosecond-based OS calls.
#[allow(dead_code)] // not every backend takes timespec timeouts
pub(crate) fn timeout_timespec(timeout: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as _,
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::net::UnixStream;
    use std::time::Instant;
    use std::{mem, ptr, thread};

    use super::*;
    use crate::Readiness;

    const SECOND: Option<Duration> = Some(Duration::from_secs(1));

    fn poller(capacity: usize, timeout: Option<Duration>) -> Poller {
        Poller::new(Config::new(capacity).with_timeout(timeout)).unwrap()
    }

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn config_validation() {
        assert!(matches!(Poller::<Sys>::new(Config::new(0)), Err(InitError::InvalidCapacity(0))));
        let too_big = Sys::MAX_CAPACITY + 1;
        assert!(matches!(
            Poller::<Sys>::new(Config::new(too_big)),
            Err(InitError::InvalidCapacity(n)) if n == too_big
        ));

        let poller = poller(3, Some(Duration::ZERO));
        assert_eq!(poller.capacity(), 3);
        assert_eq!(poller.timeout(), Some(Duration::ZERO));
        assert_eq!(poller.flags(), Default::default());
        assert!(poller.is_empty());
        assert_eq!(poller.event(0), None);
    }

    #[test]
    fn timeout_conversion() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_millis(1500))), 1500);
        assert_eq!(timeout_millis(Some(Duration::from_secs(u64::MAX))), libc::c_int::MAX);

        let ts = timeout_timespec(Duration::from_millis(2500));
        assert_eq!(ts.tv_sec, 2);
        assert_eq!(ts.tv_nsec, 500_000_000);
    }

    #[test]
    fn readable_loopback() {
        let mut poller = poller(8, SECOND);
        let (a, mut b) = pair();
        poller.attach(&a, Interest::READABLE, UserData::from(0xA5)).unwrap();

        b.write_all(&[1]).unwrap();
        assert_eq!(poller.wait().unwrap(), 1);
        let event = poller.event(0).unwrap();
        assert_eq!(event.data, UserData::from(0xA5));
        assert!(event.readiness.is_readable());
        assert!(!event.readiness.is_hung_up());
        assert_eq!(poller.events().count(), 1);
    }

    #[test]
    fn readable_tcp_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut poller = poller(4, SECOND);
        poller.attach(&server, Interest::READABLE, UserData::from(7)).unwrap();
        client.write_all(b"x").unwrap();

        assert_eq!(poller.wait().unwrap(), 1);
        let event = poller.event(0).unwrap();
        assert_eq!(event.data, UserData::from(7));
        assert!(event.readiness.is_readable());
    }

    #[test]
    fn nothing_ready_nonblocking() {
        let mut poller = poller(4, Some(Duration::ZERO));
        let (a, _b) = pair();
        poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap();

        let start = Instant::now();
        assert_eq!(poller.wait().unwrap(), 0);
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(poller.event(0), None);
    }

    #[test]
    fn positive_timeout_elapses() {
        let mut poller = poller(4, Some(Duration::from_millis(50)));
        let (a, _b) = pair();
        poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap();

        for _ in 0..2 {
            let start = Instant::now();
            assert_eq!(poller.wait().unwrap(), 0);
            assert!(start.elapsed() >= Duration::from_millis(40));
        }
    }

    #[test]
    fn batch_bounded_by_capacity() {
        const CAPACITY: usize = 3;
        let mut poller = poller(CAPACITY, Some(Duration::ZERO));
        let pairs = (0..8).map(|_| pair()).collect::<Vec<_>>();
        for (no, (a, _)) in pairs.iter().enumerate() {
            poller.attach(a, Interest::WRITABLE, UserData::from(no)).unwrap();
        }

        // Ready descriptors which did not fit are reported by the next call
        for _ in 0..2 {
            let count = poller.wait().unwrap();
            assert!(count <= CAPACITY);
            assert!(count > 0);
            for event in poller.events() {
                assert!(event.data.as_usize() < pairs.len());
                assert!(event.readiness.is_writable());
            }
        }
    }

    #[test]
    fn modify_adds_writable() {
        let mut poller = poller(4, Some(Duration::from_millis(100)));
        let (a, _b) = pair();
        poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap();
        assert_eq!(poller.wait().unwrap(), 0);

        poller.modify(&a, Interest::READ_WRITE, UserData::from(2)).unwrap();
        assert_eq!(poller.wait().unwrap(), 1);
        let event = poller.event(0).unwrap();
        assert_eq!(event.data, UserData::from(2));
        assert!(event.readiness.is_writable());
        assert!(!event.readiness.is_readable());
    }

    #[test]
    fn modify_drops_writable() {
        let mut poller = poller(4, Some(Duration::ZERO));
        let (a, _b) = pair();
        poller.attach(&a, Interest::READ_WRITE, UserData::from(1)).unwrap();
        assert_eq!(poller.wait().unwrap(), 1);

        poller.modify(&a, Interest::READABLE, UserData::from(1)).unwrap();
        assert_eq!(poller.wait().unwrap(), 0);

        // Same mask again changes nothing
        poller.modify(&a, Interest::READABLE, UserData::from(1)).unwrap();
        assert_eq!(poller.wait().unwrap(), 0);
    }

    #[test]
    fn detach_silences_descriptor() {
        let mut poller = poller(4, Some(Duration::ZERO));
        let (a, mut b) = pair();
        let (c, mut d) = pair();
        poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap();
        poller.attach(&c, Interest::READABLE, UserData::from(2)).unwrap();

        poller.detach(&a).unwrap();
        b.write_all(b"ping").unwrap();
        d.write_all(b"ping").unwrap();

        assert_eq!(poller.wait().unwrap(), 1);
        assert_eq!(poller.event(0).unwrap().data, UserData::from(2));
    }

    #[test]
    fn detach_is_always_safe() {
        let poller = poller(4, Some(Duration::ZERO));
        let (a, _b) = pair();
        poller.detach(&a).unwrap();

        poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap();
        poller.detach(&a).unwrap();
        poller.detach(&a).unwrap();

        poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap();
        let fd = a.as_raw_fd();
        drop(a);
        poller.detach(&fd).unwrap();
    }

    #[test]
    fn hangup_reported_once() {
        let mut poller =
            Poller::<Sys>::new(Config::new(4).with_timeout(SECOND).with_flags(Sys::EDGE)).unwrap();
        let (mut a, b) = pair();
        poller.attach(&a, Interest::READABLE, UserData::from(9)).unwrap();
        drop(b);

        assert_eq!(poller.wait().unwrap(), 1);
        let event = poller.event(0).unwrap();
        assert_eq!(event.data, UserData::from(9));
        assert!(event.readiness.is_hung_up());

        let mut buf = [0u8; 8];
        assert_eq!(a.read(&mut buf).unwrap(), 0);

        poller.timeout = Some(Duration::ZERO);
        assert_eq!(poller.wait().unwrap(), 0);
    }

    #[test]
    fn teardown_twice() {
        let mut poller = poller(4, Some(Duration::ZERO));
        let (a, _b) = pair();
        poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap();

        poller.teardown();
        assert!(poller.is_closed());
        poller.teardown();
        assert!(poller.is_closed());

        assert_eq!(poller.wait().unwrap_err().raw_os_error(), Some(libc::EBADF));
        let err = poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
        assert_eq!(poller.event(0), None);
        assert_eq!(poller.events().count(), 0);
    }

    #[test]
    fn registrar_from_other_thread() {
        let mut poller = poller(4, SECOND);
        let registrar = poller.registrar();
        let (send, recv) = crossbeam_channel::bounded::<UnixStream>(1);

        let worker = thread::spawn(move || {
            let (a, mut b) = pair();
            registrar.attach(&a, Interest::READABLE, UserData::from(77)).unwrap();
            b.write_all(b"hello").unwrap();
            send.send(a).unwrap();
            b
        });

        let _a = recv.recv().unwrap();
        let _b = worker.join().unwrap();
        assert_eq!(poller.wait().unwrap(), 1);
        let event = poller.event(0).unwrap();
        assert_eq!(event.data, UserData::from(77));
        assert!(event.readiness.is_readable());
    }

    #[test]
    fn signal_interrupts_wait() {
        extern "C" fn ignore(_: libc::c_int) {}

        // No SA_RESTART: the blocked wait must see EINTR
        unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = ignore as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            assert_eq!(libc::sigaction(libc::SIGUSR1, &action, ptr::null_mut()), 0);
        }

        let (tid_send, tid_recv) = crossbeam_channel::bounded::<usize>(1);
        let (done_send, done_recv) = crossbeam_channel::bounded(1);
        let worker = thread::spawn(move || {
            let mut poller = poller(4, Some(Duration::from_secs(5)));
            let (a, _b) = pair();
            poller.attach(&a, Interest::READABLE, UserData::from(1)).unwrap();
            tid_send.send(unsafe { libc::pthread_self() } as usize).unwrap();

            let start = Instant::now();
            let res = poller.wait().map_err(|err| err.raw_os_error());
            done_send.send((res, start.elapsed())).unwrap();
        });

        let tid = tid_recv.recv().unwrap() as libc::pthread_t;
        // Signal repeatedly in case the first one lands before the thread blocks
        let (res, elapsed) = loop {
            assert_eq!(unsafe { libc::pthread_kill(tid, libc::SIGUSR1) }, 0);
            if let Ok(outcome) = done_recv.recv_timeout(Duration::from_millis(100)) {
                break outcome;
            }
        };
        worker.join().unwrap();

        assert_eq!(res, Ok(0));
        assert!(elapsed < Duration::from_secs(4));
    }

    #[test]
    fn registrar_after_teardown() {
        let mut poller = poller(4, SECOND);
        let registrar = poller.registrar();
        poller.teardown();

        let (a, _b) = pair();
        let err = registrar.attach(&a, Interest::READABLE, UserData::default()).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
        let err = registrar.clone().detach(&a).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
        assert!(poller.registrar().modify(&a, Interest::NONE, UserData::default()).is_err());
    }

    #[test]
    fn readiness_matches_direction() {
        let mut poller = poller(4, SECOND);
        let (a, mut b) = pair();
        poller.attach(&a, Interest::READ_WRITE, UserData::from(3)).unwrap();
        b.write_all(&[1, 2, 3]).unwrap();

        // Per-direction backends may split readiness across two slots
        let mut seen = Interest::NONE;
        let count = poller.wait().unwrap();
        assert!((1..=2).contains(&count));
        for event in poller.events() {
            assert_eq!(event.data, UserData::from(3));
            assert_eq!(event.readiness.bits() & Readiness::HUNG_UP, 0);
            seen |= event.readiness.directions();
        }
        assert_eq!(seen, Interest::READ_WRITE);
    }
}
