// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Address types used by the neighbor cache.
//!
//! Both the network-layer and the link-layer address are opaque byte strings
//! as far as NUD is concerned; interpreting them is the resolver's business.

use core::fmt::{self, Debug, Display, Formatter};

/// An opaque network-layer address identifying a neighbor.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Address(Vec<u8>);

impl Address {
    /// Constructs an address from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw bytes of the address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl<const N: usize> From<[u8; N]> for Address {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&[u8]> for Address {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_octets(f, &self.0)
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// An opaque link-layer address.
///
/// An empty link address stands for "unknown": entries in the Incomplete
/// state hold one, and a reachability probe carrying an empty link address is
/// a multicast solicitation.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LinkAddress(Vec<u8>);

impl LinkAddress {
    /// Constructs a link address from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The unknown link address.
    pub const fn unknown() -> Self {
        Self(Vec::new())
    }

    /// The raw bytes of the link address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true if no link address is known.
    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[u8; N]> for LinkAddress {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&[u8]> for LinkAddress {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Display for LinkAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "(unknown)")
        } else {
            write_octets(f, &self.0)
        }
    }
}

impl Debug for LinkAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "LinkAddress({})", self)
    }
}

fn write_octets(f: &mut Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for (i, b) in bytes.iter().enumerate() {
        if i != 0 {
            write!(f, ":")?;
        }
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_is_colon_separated_hex() {
        let addr = Address::from([0x0a, 0x00, 0xff]);
        assert_eq!(addr.to_string(), "0a:00:ff");
    }

    #[test]
    fn unknown_link_address() {
        assert!(LinkAddress::unknown().is_unknown());
        assert!(!LinkAddress::from([1]).is_unknown());
        assert_eq!(LinkAddress::unknown().to_string(), "(unknown)");
    }
}
