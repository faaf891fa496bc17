//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

pub mod connect_return;
pub mod errors;
pub mod header;
pub mod identifier;
pub mod integers;
pub mod packet;
pub mod qos;
pub mod strings;
pub mod subscription;
pub mod version;
pub mod will;
pub mod write;

pub type WireResult<'input, T> = nom::IResult<&'input [u8], T, errors::WireError<'input>>;
