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

//! Canonical readiness vocabulary shared by all backends.
//!
//! Platform-native bit encodings never leave the backend modules: callers speak only in terms of
//! [`Interest`] when registering descriptors and [`Readiness`] when decoding ready slots.

use std::fmt::{self, Display, Formatter};
use std::ops;

/// Single I/O direction a descriptor may be watched for.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Direction {
    Read,
    Write,
}

/// Set of directions a caller wants to be notified about for a descriptor.
///
/// Requesting the same direction twice is the same as requesting it once.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
pub struct Interest {
    /// Notify when the descriptor has data to read.
    pub read: bool,
    /// Notify when the descriptor can accept a write without blocking.
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    pub const READABLE: Interest = Interest {
        read: true,
        write: false,
    };

    pub const WRITABLE: Interest = Interest {
        read: false,
        write: true,
    };

    pub const READ_WRITE: Interest = Interest {
        read: true,
        write: true,
    };

    pub fn is_none(self) -> bool { !self.read && !self.write }
    pub fn is_read_only(self) -> bool { self.read && !self.write }
    pub fn is_write_only(self) -> bool { !self.read && self.write }
    pub fn is_read_write(self) -> bool { self.read && self.write }

    /// Checks whether the given direction is requested.
    pub fn contains(self, dir: Direction) -> bool {
        match dir {
            Direction::Read => self.read,
            Direction::Write => self.write,
        }
    }

    /// Iterates over both directions, pairing each with whether it is requested.
    ///
    /// Used by backends which keep an independent kernel record per direction and thus must
    /// explicitly arm or disarm each of them.
    pub fn directions(self) -> impl Iterator<Item = (Direction, bool)> {
        [Direction::Read, Direction::Write].into_iter().map(move |dir| (dir, self.contains(dir)))
    }
}

impl ops::BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self {
            read: self.read || rhs.read,
            write: self.write || rhs.write,
        }
    }
}

impl ops::BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Self) { *self = *self | rhs }
}

impl ops::Not for Interest {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self {
            read: !self.read,
            write: !self.write,
        }
    }
}

impl From<Direction> for Interest {
    fn from(dir: Direction) -> Self {
        match dir {
            Direction::Read => Interest::READABLE,
            Direction::Write => Interest::WRITABLE,
        }
    }
}

/// Yields requested directions, consuming them; write goes first.
impl Iterator for Interest {
    type Item = Direction;

    fn next(&mut self) -> Option<Self::Item> {
        if self.write {
            self.write = false;
            Some(Direction::Write)
        } else if self.read {
            self.read = false;
            Some(Direction::Read)
        } else {
            None
        }
    }
}

impl Display for Interest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("none")
        } else if self.is_read_write() {
            f.write_str("read-write")
        } else if self.read {
            f.write_str("read")
        } else {
            f.write_str("write")
        }
    }
}

/// Opaque word attached to a registration and handed back verbatim with every ready slot for
/// that descriptor.
///
/// The poller never dereferences or copies whatever the word refers to; it is usually an index
/// into the caller's connection table or a pointer to the caller's per-connection state.
#[derive(Wrapper, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default, From)]
#[wrapper(Display, LowerHex, UpperHex)]
pub struct UserData(usize);

impl UserData {
    /// Wraps a caller-owned pointer. The pointee is neither accessed nor kept alive.
    pub fn from_ptr<T>(ptr: *const T) -> Self { UserData(ptr as usize) }

    /// Recovers the pointer previously wrapped with [`UserData::from_ptr`].
    pub fn as_ptr<T>(self) -> *const T { self.0 as *const T }

    pub fn as_usize(self) -> usize { self.0 }
}

/// Canonical readiness reported for a ready slot.
///
/// Besides the three canonical bits it carries the raw backend-native bits the slot was decoded
/// from, for callers needing platform detail (for instance `EPOLLERR`).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Readiness {
    bits: u8,
    raw: u32,
}

impl Readiness {
    pub const READABLE: u8 = 0b001;
    pub const WRITABLE: u8 = 0b010;
    /// Peer closed the connection or its write half, whatever way the backend signals it.
    pub const HUNG_UP: u8 = 0b100;

    pub fn new(bits: u8, raw: u32) -> Self {
        Readiness {
            bits: bits & (Self::READABLE | Self::WRITABLE | Self::HUNG_UP),
            raw,
        }
    }

    pub fn bits(self) -> u8 { self.bits }
    pub fn raw(self) -> u32 { self.raw }

    pub fn is_readable(self) -> bool { self.bits & Self::READABLE != 0 }
    pub fn is_writable(self) -> bool { self.bits & Self::WRITABLE != 0 }
    pub fn is_hung_up(self) -> bool { self.bits & Self::HUNG_UP != 0 }
    pub fn is_empty(self) -> bool { self.bits == 0 }

    /// Directions reported ready, ignoring the hang-up bit.
    pub fn directions(self) -> Interest {
        Interest {
            read: self.is_readable(),
            write: self.is_writable(),
        }
    }
}

impl Display for Readiness {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none ({:#x})", self.raw);
        }
        let mut sep = "";
        for (bit, name) in
            [(Self::READABLE, "read"), (Self::WRITABLE, "write"), (Self::HUNG_UP, "hangup")]
        {
            if self.bits & bit != 0 {
                write!(f, "{sep}{name}")?;
                sep = "|";
            }
        }
        write!(f, " ({:#x})", self.raw)
    }
}

/// One decoded slot of a ready batch.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ReadyEvent {
    pub data: UserData,
    pub readiness: Readiness,
}
