use thiserror::Error;

/// Detailed error type for canele macaroon operations with specific failure information
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacaroonError {
    // ===== Construction Errors =====
    /// A range caveat or range constraint was built with inverted bounds
    #[error("invalid range: lower bound {lower} is greater than upper bound {upper}")]
    InvalidRangeBounds { lower: i64, upper: i64 },

    /// A membership element contains the reserved element separator
    #[error("membership element '{element}' contains the reserved ', ' sequence")]
    ReservedMemberSequence { element: String },

    /// The discharge being bound already carries bound discharges of its own
    #[error(
        "discharge macaroon already carries bound discharges; bind them to the primary macaroon instead"
    )]
    DischargeAlreadyBound,

    /// A structural caveat identifier could not be parsed back
    #[error("caveat identifier '{identifier}' does not match the expected {expected} encoding")]
    MalformedCaveatIdentifier {
        identifier: String,
        expected: &'static str,
    },

    // ===== Context Narrowing Errors =====
    // Recoverable: the verifier backtracks on these instead of surfacing them.
    /// A membership constraint would widen the already established set
    #[error("membership constraint '{uuid}' already exists and the new members are not a subset of it")]
    MembershipNotSubset { uuid: String },

    /// A range constraint does not overlap the already established range
    #[error("range constraint '{uuid}' already exists and does not overlap the new range")]
    DisjointRanges { uuid: String },

    // ===== Crypto Errors =====
    /// The symmetric cipher was handed an empty key
    #[error("cipher key must not be empty")]
    EmptyCipherKey,

    /// Symmetric decryption failed
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    // ===== Predicate Errors =====
    /// An application-supplied caveat predicate rejected the context
    #[error("caveat predicate rejected: {reason}")]
    PredicateFailed { reason: String },
}

impl MacaroonError {
    // ===== Helper Methods for Common Error Checks =====

    /// Check if this error reports a violated construction precondition
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            MacaroonError::InvalidRangeBounds { .. }
                | MacaroonError::ReservedMemberSequence { .. }
                | MacaroonError::DischargeAlreadyBound
                | MacaroonError::MalformedCaveatIdentifier { .. }
        )
    }

    /// Check if this error is a recoverable context-narrowing conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            MacaroonError::MembershipNotSubset { .. } | MacaroonError::DisjointRanges { .. }
        )
    }

    /// Check if this error came out of the cryptographic provider
    pub fn is_crypto_failure(&self) -> bool {
        matches!(
            self,
            MacaroonError::EmptyCipherKey | MacaroonError::DecryptionFailed { .. }
        )
    }

    // ===== Constructor Helper Methods =====

    /// Create a decryption failure with the given reason
    pub fn decryption_failed<S: Into<String>>(reason: S) -> Self {
        MacaroonError::DecryptionFailed {
            reason: reason.into(),
        }
    }

    /// Create a predicate rejection with the given reason
    pub fn predicate_failed<S: Into<String>>(reason: S) -> Self {
        MacaroonError::PredicateFailed {
            reason: reason.into(),
        }
    }
}
