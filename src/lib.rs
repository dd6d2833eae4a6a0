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

#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    //missing_docs
)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Readiness multiplexer ([`Poller`]) lets a connection loop block on many file descriptors at
//! once and wake up only when some of them become readable or writable.
//!
//! A single interface covers three OS facilities which disagree on almost everything: epoll
//! (one combined interest record per descriptor), kqueue (independent per-direction filters) and
//! event ports (one-shot associations with counted batch retrieval). One of them is selected at
//! build time for the target platform and exported as [`Sys`].
//!
//! ```no_run
//! use std::os::unix::net::UnixStream;
//! use std::time::Duration;
//!
//! use ioevent::{Config, Interest, Poller, UserData};
//!
//! let (conn, _peer) = UnixStream::pair()?;
//! let mut poller: Poller = Poller::new(Config::new(64).with_timeout(Some(Duration::from_secs(1))))?;
//! poller.attach(&conn, Interest::READABLE, UserData::from(0))?;
//!
//! loop {
//!     poller.wait()?;
//!     for event in poller.events() {
//!         if event.readiness.is_hung_up() {
//!             // drop the connection with index `event.data`
//!         }
//!     }
//! }
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! The poller never owns, reads, writes or closes the descriptors it watches: it only reports
//! whether they are ready.

#[macro_use]
extern crate amplify;

mod error;
mod interest;
pub mod poller;

pub use error::{Error, InitError, PollError, RegistrationError};
pub use interest::{Direction, Interest, Readiness, ReadyEvent, UserData};
pub use poller::{Backend, Config, Poller, Registrar, Sys};
