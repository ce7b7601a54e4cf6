//! # Canele Core
//!
//! Core primitives shared across the canele macaroon crates.
//!
//! This crate provides the building blocks the credential algebra in
//! `canele-macaroon` is assembled from:
//!
//! - Byte-string newtypes for identifiers and signatures
//! - The cryptographic provider abstraction and its standard realization
//! - Common error types

pub mod bytes;
pub mod crypto;
pub mod error;

pub use bytes::{Identifier, Signature};
pub use crypto::{CryptoProvider, HmacAesProvider, CIPHER_IV_SIZE, CIPHER_KEY_SIZE};
pub use error::MacaroonError;
