// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by DSD-Nexus.
#[derive(Debug)]
pub enum Error {
    /// An invalid argument was passed to an operation.
    InvalidArg(&'static str),
    /// The requested path, area, or track does not exist.
    NotFound,
    /// The byte source is not an SACD image.
    NotSacd,
    /// The container or stream contained malformed data.
    Malformed(&'static str),
    /// An IO error occurred while reading or writing the underlying stream.
    Io(io::Error),
    /// A write was attempted on a non-writable region.
    Access,
    /// The operation was cancelled before it completed.
    Cancelled,
    /// A bounded resource pool is full.
    Busy,
    /// A DST frame could not be decoded. Poisons the originating file handle.
    DecodeFailed(&'static str),
    /// The end of the addressable region was reached.
    Eof,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::InvalidArg(msg) => write!(f, "invalid argument: {}", msg),
            Error::NotFound => write!(f, "not found"),
            Error::NotSacd => write!(f, "not an sacd image"),
            Error::Malformed(msg) => write!(f, "malformed data: {}", msg),
            Error::Io(ref err) => write!(f, "io error: {}", err),
            Error::Access => write!(f, "access denied"),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::Busy => write!(f, "resource busy"),
            Error::DecodeFailed(msg) => write!(f, "dst decode failed: {}", msg),
            Error::Eof => write!(f, "end of file"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::Eof,
            io::ErrorKind::NotFound => Error::NotFound,
            io::ErrorKind::PermissionDenied => Error::Access,
            _ => Error::Io(err),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create an invalid argument error.
pub fn invalid_arg_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::InvalidArg(msg))
}

/// Convenience function to create a not-found error.
pub fn not_found_error<T>() -> Result<T> {
    Err(Error::NotFound)
}

/// Convenience function to create a not-SACD error.
pub fn not_sacd_error<T>() -> Result<T> {
    Err(Error::NotSacd)
}

/// Convenience function to create a malformed data error.
pub fn malformed_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::Malformed(msg))
}

/// Convenience function to create an access-denied error.
pub fn access_error<T>() -> Result<T> {
    Err(Error::Access)
}

/// Convenience function to create a cancelled error.
pub fn cancelled_error<T>() -> Result<T> {
    Err(Error::Cancelled)
}

/// Convenience function to create a decode-failed error.
pub fn decode_failed_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::DecodeFailed(msg))
}

/// Convenience function to create an end-of-file error.
pub fn eof_error<T>() -> Result<T> {
    Err(Error::Eof)
}
