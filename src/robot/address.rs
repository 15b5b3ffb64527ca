//! Bluetooth address validation.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Manufacturer prefix every supported robot address starts with.
pub const VENDOR_PREFIX: &str = "00066";

const ADDRESS_DIGITS: usize = 12;

/// Reasons an address is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The address does not have twelve hex digits.
    #[error("address must have 12 hex digits, found {0}")]
    Length(usize),
    /// The address contains a character that is neither hex nor a separator.
    #[error("invalid character {0:?} in address")]
    Character(char),
    /// The address does not belong to a supported robot.
    #[error("address {0} does not start with 00066")]
    Vendor(String),
}

/// A validated robot address, stored as twelve upper-case hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RobotAddress(String);

impl RobotAddress {
    /// Parse an address, accepting `:` or `-` between digit pairs.
    ///
    /// # Errors
    /// Returns [`AddressError`] if the address is malformed or foreign.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let mut digits = String::with_capacity(ADDRESS_DIGITS);
        for ch in raw.trim().chars() {
            match ch {
                ':' | '-' => {}
                c if c.is_ascii_hexdigit() => digits.push(c.to_ascii_uppercase()),
                c => return Err(AddressError::Character(c)),
            }
        }
        if digits.len() != ADDRESS_DIGITS {
            return Err(AddressError::Length(digits.len()));
        }
        if !digits.starts_with(VENDOR_PREFIX) {
            return Err(AddressError::Vendor(digits));
        }
        Ok(Self(digits))
    }

    /// Return the normalised digits.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl FromStr for RobotAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl fmt::Display for RobotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "test assertions")]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("000666112233", "000666112233")]
    #[case("00:06:66:ab:cd:ef", "000666ABCDEF")]
    #[case("00-06-66-11-22-33", "000666112233")]
    fn accepts_vendor_addresses(#[case] raw: &str, #[case] normalised: &str) {
        let address = RobotAddress::parse(raw).expect("valid");
        assert_eq!(address.as_str(), normalised);
    }

    #[rstest]
    #[case("0006661122", AddressError::Length(10))]
    #[case("00066611223344", AddressError::Length(14))]
    #[case("00066611223G", AddressError::Character('G'))]
    #[case("001122334455", AddressError::Vendor("001122334455".to_owned()))]
    fn rejects_bad_addresses(#[case] raw: &str, #[case] expected: AddressError) {
        assert_eq!(RobotAddress::parse(raw), Err(expected));
    }
}
