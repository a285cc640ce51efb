// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DSD-Nexus core library.
//!
//! `nexus-core` provides the shared foundation of the DSD-Nexus toolkit: the
//! common error type, positional byte sources, and the constants of the DSD
//! audio family that every other crate builds on.

pub mod dsd;
pub mod errors;
pub mod io;
