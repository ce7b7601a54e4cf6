//! Byte-string newtypes for macaroon identifiers and signatures
//!
//! Identifiers key the bound-discharge map and participate in every MAC
//! computation, so they must compare by byte value rather than by reference
//! or text interpretation. Signatures are byte strings as well: the MAC
//! realization emits Base64 text (stored as its ASCII bytes), while the
//! binding transform emits a raw digest.

use std::fmt;

/// Public identifier of a macaroon or caveat, compared by byte value
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    inner: Vec<u8>,
}

impl Identifier {
    /// Create a new Identifier from raw bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { inner: bytes }
    }

    /// Get the raw bytes of the identifier
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    /// Consume the identifier, returning its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.inner
    }

    /// Convert the identifier to a hex string for display/storage
    pub fn to_hex(&self) -> String {
        hex::encode(&self.inner)
    }

    /// Create an Identifier from a hex string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(hex_str).map(Self::new)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.inner))
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", String::from_utf8_lossy(&self.inner))
    }
}

impl From<Vec<u8>> for Identifier {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Identifier {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Identifier {
    fn from(bytes: &[u8; N]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl From<&str> for Identifier {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes().to_vec())
    }
}

impl From<String> for Identifier {
    fn from(text: String) -> Self {
        Self::new(text.into_bytes())
    }
}

/// Chained-MAC signature of a macaroon
///
/// The value is opaque to callers; it is only ever produced by a
/// [`CryptoProvider`](crate::crypto::CryptoProvider) and compared for
/// equality during verification.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    inner: Vec<u8>,
}

impl Signature {
    /// Create a new Signature from raw bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { inner: bytes }
    }

    /// Get the raw bytes of the signature
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    /// Convert the signature to a hex string for display/storage
    pub fn to_hex(&self) -> String {
        hex::encode(&self.inner)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl From<Vec<u8>> for Signature {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_hex_conversion() {
        let bytes = vec![0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
        let identifier = Identifier::new(bytes.clone());

        assert_eq!(identifier.to_hex(), "0123456789abcdef");

        let from_hex = Identifier::from_hex("0123456789abcdef").unwrap();
        assert_eq!(from_hex.as_bytes(), &bytes[..]);
        assert_eq!(identifier, from_hex);
    }

    #[test]
    fn test_identifier_compares_by_value() {
        let one = Identifier::from("order-31415");
        let two = Identifier::from("order-31415".as_bytes());
        let other = Identifier::from("order-27182");

        assert_eq!(one, two);
        assert_ne!(one, other);
    }

    #[test]
    fn test_identifier_display_is_lossy_text() {
        let identifier = Identifier::from("order-31415");
        assert_eq!(identifier.to_string(), "order-31415");
    }

    #[test]
    fn test_signature_display_is_hex() {
        let signature = Signature::new(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(signature.to_string(), "deadbeef");
        assert_eq!(signature.to_hex(), "deadbeef");
    }
}
