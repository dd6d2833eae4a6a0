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

use std::io;
use std::os::unix::io::RawFd;

/// Errors preventing a [`crate::Poller`] from being constructed.
///
/// No resources are held by the caller after any of these errors.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum InitError {
    /// ready-event buffer capacity {0} is out of the range supported by the backend.
    InvalidCapacity(usize),

    /// not enough memory to allocate a ready-event buffer for {0} entries.
    OutOfMemory(usize),

    /// unable to create poll handle. Details: {0}
    #[from]
    Os(io::Error),
}

impl InitError {
    /// Returns the originating OS error code, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            InitError::InvalidCapacity(_) => Some(libc::EINVAL),
            InitError::OutOfMemory(_) => Some(libc::ENOMEM),
            InitError::Os(err) => err.raw_os_error(),
        }
    }
}

/// Failure of a registration change for a single descriptor.
///
/// Never retried by the poller; callers usually drop the affected connection.
#[derive(Debug, Display, Error)]
#[display(doc_comments)]
pub enum RegistrationError {
    /// unable to attach descriptor {0} to the poller. Details: {1}
    Attach(RawFd, io::Error),

    /// unable to modify interest of descriptor {0}. Details: {1}
    Modify(RawFd, io::Error),

    /// unable to detach descriptor {0} from the poller. Details: {1}
    Detach(RawFd, io::Error),
}

impl RegistrationError {
    /// Descriptor whose registration failed.
    pub fn fd(&self) -> RawFd {
        match self {
            RegistrationError::Attach(fd, _)
            | RegistrationError::Modify(fd, _)
            | RegistrationError::Detach(fd, _) => *fd,
        }
    }

    pub fn io_error(&self) -> &io::Error {
        match self {
            RegistrationError::Attach(_, err)
            | RegistrationError::Modify(_, err)
            | RegistrationError::Detach(_, err) => err,
        }
    }

    pub fn raw_os_error(&self) -> Option<i32> { self.io_error().raw_os_error() }
}

/// Hard failure of a wait call which produced no ready events.
///
/// Transient interruptions are never reported through this type.
#[derive(Debug, Display, Error)]
#[display("polling for ready descriptors has failed. Details: {0}")]
pub struct PollError(io::Error);

impl PollError {
    pub fn io_error(&self) -> &io::Error { &self.0 }

    pub fn raw_os_error(&self) -> Option<i32> { self.0.raw_os_error() }
}

impl From<io::Error> for PollError {
    fn from(err: io::Error) -> Self { PollError(err) }
}

/// Any error returned by the poller API.
#[derive(Debug, Display, Error, From)]
pub enum Error {
    #[display(inner)]
    #[from]
    Init(InitError),

    #[display(inner)]
    #[from]
    Registration(RegistrationError),

    #[display(inner)]
    #[from]
    Poll(PollError),
}

impl Error {
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Init(err) => err.raw_os_error(),
            Error::Registration(err) => err.raw_os_error(),
            Error::Poll(err) => err.raw_os_error(),
        }
    }
}

/// Error returned for any operation on a poller which has already been torn down.
pub(crate) fn closed() -> io::Error { io::Error::from_raw_os_error(libc::EBADF) }
