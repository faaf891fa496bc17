//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

//! The MQTT 3.1 / 3.1.1 wire format.
//!
//! Parsers operate on byte slices and borrow their input; the fixed header
//! uses streaming parsers so callers can detect that a packet is not yet
//! complete, packet bodies use complete parsers and must consume exactly
//! the remaining length announced by the header.

pub mod v3;
