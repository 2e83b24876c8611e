//! Client-claimed identity used as the routing key.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::AddressError;

/// Opaque address a client supplies when it connects.
///
/// Not authenticated. Stored verbatim: two addresses are the same routing key
/// only if they are byte-for-byte equal.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: impl Into<String>) -> Result<Self, AddressError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(AddressError::Empty);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Address {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(matches!(Address::parse(""), Err(AddressError::Empty)));
        assert!(matches!(Address::parse("   "), Err(AddressError::Empty)));
    }

    #[test]
    fn keeps_value_verbatim() {
        let addr = Address::parse(" Alice ").unwrap();
        assert_eq!(addr.as_str(), " Alice ");
        assert_ne!(addr, Address::parse("alice").unwrap());
    }

    #[test]
    fn deserialize_validates() {
        let ok: Address = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(ok.as_str(), "bob");
        assert!(serde_json::from_str::<Address>("\"\"").is_err());
    }

    #[test]
    fn serializes_as_string() {
        let addr = Address::parse("carol").unwrap();
        assert_eq!(serde_json::to_string(&addr).unwrap(), "\"carol\"");
    }
}
