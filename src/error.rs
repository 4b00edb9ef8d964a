/*
 * Created on Tue Jul 28 2026
 *
 * This file is part of corestack, a foundational systems-toolbox library
 * providing mergeable priority queues, compressed tries, and adaptive
 * pooling/logging infrastructure for higher-level services.
 *
 * Copyright (c) 2026, The corestack developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Error taxonomy shared by every module in this crate.
//!
//! Kept deliberately small: a bare kind plus an optional detail string.
//! A richer shape tracking which subsystem raised an error across a
//! multi-stage pipeline would be overkill for a crate this size.

use std::borrow::Cow;
use std::fmt;

/// The closed set of ways an operation in this crate can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The container or back-end was empty when a value was required.
    Empty,
    /// An index, key, or configuration value fell outside its legal range.
    OutOfRange,
    /// An internal invariant would have been violated by the requested
    /// operation, or a configuration value failed validation.
    Invariant,
    /// The target resource is already owned by another in-flight operation.
    InUse,
    /// A configured capacity or rate limit was reached.
    Limit,
    /// The underlying OS or runtime reported a failure (I/O, thread
    /// spawn, `libc` call).
    System,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::OutOfRange => "out of range",
            Self::Invariant => "invariant violated",
            Self::InUse => "in use",
            Self::Limit => "limit reached",
            Self::System => "system error",
        };
        f.write_str(s)
    }
}

/// The error type returned by every fallible operation in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    detail: Option<Cow<'static, str>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: ErrorKind, detail: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(d) => write!(f, "{}: {}", self.kind, d),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_detail() {
        let e = Error::new(ErrorKind::Empty);
        assert_eq!(e.to_string(), "empty");
    }

    #[test]
    fn display_with_detail() {
        let e = Error::with_detail(ErrorKind::Limit, "pool exhausted");
        assert_eq!(e.to_string(), "limit reached: pool exhausted");
    }

    #[test]
    fn from_kind() {
        let e: Error = ErrorKind::InUse.into();
        assert_eq!(e.kind(), ErrorKind::InUse);
    }
}
