//! Bluetooth device addresses.

use macaddr::MacAddr6;
use std::{
    convert::TryInto,
    fmt::{self, Debug, Display, Formatter},
    ops::{Deref, DerefMut},
    str::FromStr,
};

/// A 48-bit Bluetooth device address, printed as colon-separated upper hex.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address(pub [u8; 6]);

impl Address {
    /// Creates a new address with the given bytes.
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// `00:00:00:00:00:00`.
    pub const fn any() -> Self {
        Self([0; 6])
    }

    /// True if this address is a Resolvable Private Address candidate, i.e.
    /// the top two bits of the most significant byte are `01`.
    ///
    /// Bluetooth addresses are conventionally written and stored most-significant-byte
    /// first, so that is `self.0[0]`.
    pub fn is_resolvable_private(&self) -> bool {
        (self.0[0] & 0xC0) == 0x40
    }
}

impl Deref for Address {
    type Target = [u8; 6];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Address {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl From<MacAddr6> for Address {
    fn from(addr: MacAddr6) -> Self {
        Self(addr.into_array())
    }
}

impl From<Address> for MacAddr6 {
    fn from(addr: Address) -> Self {
        addr.0.into()
    }
}

impl From<[u8; 6]> for Address {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<Address> for [u8; 6] {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

/// Error returned when parsing an [`Address`] from a string fails.
#[derive(Debug, Clone)]
pub struct InvalidAddress(pub String);

impl fmt::Display for InvalidAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "invalid Bluetooth address: {}", &self.0)
    }
}

impl std::error::Error for InvalidAddress {}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> std::result::Result<Self, InvalidAddress> {
        let fields = s
            .split(':')
            .map(|s| u8::from_str_radix(s, 16).map_err(|_| InvalidAddress(s.to_string())))
            .collect::<std::result::Result<Vec<_>, InvalidAddress>>()?;
        Ok(Self(fields.try_into().map_err(|_| InvalidAddress(s.to_string()))?))
    }
}

/// Bluetooth device address type, as reported alongside an advertising event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, strum::Display, strum::EnumString)]
#[repr(u8)]
pub enum AddressType {
    /// Public (IEEE-assigned) address.
    #[strum(serialize = "public")]
    Public = 0x00,
    /// Random address (static or resolvable/non-resolvable private).
    #[strum(serialize = "random")]
    Random = 0x01,
}

impl Default for AddressType {
    fn default() -> Self {
        Self::Public
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display() {
        let a: Address = "4A:A0:D4:FF:C8:57".parse().unwrap();
        assert_eq!(a.to_string(), "4A:A0:D4:FF:C8:57");
    }

    #[test]
    fn rejects_malformed_string() {
        assert!("not-an-address".parse::<Address>().is_err());
        assert!("4A:A0:D4:FF:C8".parse::<Address>().is_err());
    }

    #[test]
    fn resolvable_private_bit_pattern() {
        // top two bits of the MSB must be 01
        assert!(Address::new([0x40, 0, 0, 0, 0, 0]).is_resolvable_private());
        assert!(Address::new([0x7F, 0, 0, 0, 0, 0]).is_resolvable_private());
        assert!(!Address::new([0x00, 0, 0, 0, 0, 0]).is_resolvable_private());
        assert!(!Address::new([0xC0, 0, 0, 0, 0, 0]).is_resolvable_private());
    }
}
