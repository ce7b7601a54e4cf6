//! # Canele Macaroon
//!
//! Contextual macaroon credentials: decentralized bearer tokens that support
//! attenuation via caveats and delegation via discharge macaroons.
//!
//! A macaroon is an identifier and an ordered caveat list under a chained
//! keyed-MAC signature rooted in a shared secret. Holders can only ever
//! narrow a credential: appending a caveat re-chains the signature, so the
//! token is append-only and tamper-evident. First-party caveats are checked
//! locally against a [`VerificationContext`]; third-party caveats are
//! obligations discharged by separate macaroons, cryptographically bound to
//! the primary credential before a request.
//!
//! Verification returns the **set of contexts** in which the credential
//! holds. Alternative discharges may leave different constraints behind, so
//! the verifier explores all of them and unions the survivors; an empty set
//! means the credential does not verify.
//!
//! ## Example
//!
//! ```rust
//! use canele_macaroon::{
//!     HmacAesProvider, Macaroon, RangeCaveat, ThirdPartyCaveat, VerificationContext,
//! };
//!
//! let provider = HmacAesProvider;
//!
//! // The target service mints the credential and attenuates it.
//! let mut macaroon = Macaroon::mint(&provider, "secret", "order-31415", ["https://target.example"]);
//! macaroon.append_first_party(&provider, RangeCaveat::new("TIME", 0, 100)?);
//! macaroon.append_third_party(
//!     &provider,
//!     ThirdPartyCaveat::new("root-key", "auth-proof".as_bytes(), ["https://auth.example"]),
//! )?;
//!
//! // The third party issues a discharge under the root key; the holder
//! // binds it to the credential before presenting both.
//! let discharge = Macaroon::mint(&provider, "root-key", "auth-proof", ["https://auth.example"]);
//! macaroon.bind_discharge(&provider, &discharge)?;
//!
//! // The target replays the chain and collects the surviving contexts.
//! let contexts = macaroon.verify(&provider, "secret", VerificationContext::new());
//! assert_eq!(contexts.len(), 1);
//! # Ok::<(), canele_macaroon::MacaroonError>(())
//! ```

pub mod caveat;
pub mod context;
pub mod macaroon;
pub mod verify;

pub use caveat::{
    Caveat, FirstPartyCaveat, MembershipCaveat, OpaqueCaveat, Predicate, RangeCaveat,
    ThirdPartyCaveat, MEMBER_SEPARATOR,
};
pub use context::VerificationContext;
pub use macaroon::Macaroon;
pub use verify::MacaroonVerifier;

// Re-export commonly needed types from core
pub use canele_core::{CryptoProvider, HmacAesProvider, Identifier, MacaroonError, Signature};
