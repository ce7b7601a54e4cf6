//! The verification engine: a backtracking proof search over caveats and
//! discharge alternatives
//!
//! Verification replays the MAC chain from the shared secret, checks every
//! caveat in append order, and for each third-party caveat explores the bound
//! discharges until one of them closes under the binding transform with a
//! non-empty context set. Different discharges may leave different
//! constraints behind, so the result is the full set of contexts in which
//! the credential holds; an empty set means it does not verify, and no
//! further diagnostic is safe to emit.
//!
//! Caveat failures never escape the search. Context conflicts and crypto
//! failures inside a branch simply fail that branch; the engine backtracks
//! and tries the remaining alternatives.

use std::collections::{HashSet, VecDeque};

use tracing::trace;

use canele_core::{CryptoProvider, Identifier, Signature};

use crate::caveat::Caveat;
use crate::context::VerificationContext;
use crate::macaroon::Macaroon;

/// One bound discharge, named by the caveat identifier it discharges and its
/// position among the alternatives bound under that identifier.
type DischargeRef = (Identifier, usize);

/// Builder for verifying a macaroon with a configurable starting context
///
/// # Example
/// ```rust
/// use canele_macaroon::{HmacAesProvider, Macaroon, MacaroonVerifier, VerificationContext};
///
/// let provider = HmacAesProvider;
/// let macaroon = Macaroon::mint(&provider, "secret", "order-31415", ["https://target.example"]);
///
/// let contexts = MacaroonVerifier::new(&macaroon, &provider, "secret")
///     .with_context(VerificationContext::new())
///     .verify();
/// assert!(!contexts.is_empty());
/// ```
pub struct MacaroonVerifier<'a, P> {
    macaroon: &'a Macaroon,
    provider: &'a P,
    secret: String,
    context: VerificationContext,
}

impl<'a, P: CryptoProvider> MacaroonVerifier<'a, P> {
    /// Creates a verifier for `macaroon` under `secret`, starting from an
    /// empty context
    pub fn new(macaroon: &'a Macaroon, provider: &'a P, secret: impl Into<String>) -> Self {
        Self {
            macaroon,
            provider,
            secret: secret.into(),
            context: VerificationContext::new(),
        }
    }

    /// Replaces the starting context
    ///
    /// The context is cloned into every branch of the search; the caller's
    /// copy is never modified.
    pub fn with_context(mut self, context: VerificationContext) -> Self {
        self.context = context;
        self
    }

    /// Runs the proof search
    ///
    /// Returns every context in which the macaroon is valid. Contexts are
    /// unordered across discharge alternatives; a caller depending on a
    /// particular winner must constrain further.
    pub fn verify(self) -> HashSet<VerificationContext> {
        let root_frame = Frame {
            owner: Owner::Primary,
            signature: self
                .provider
                .mac(self.secret.as_bytes(), self.macaroon.identifier().as_bytes()),
            remaining: self.macaroon.caveats().to_vec().into(),
        };
        let contexts = HashSet::from([self.context.clone()]);
        let mut invalid = HashSet::new();
        self.search(vec![root_frame], &HashSet::new(), &mut invalid, contexts)
    }

    /// One branch of the proof search.
    ///
    /// `stack` replays the MAC chain frame by frame; `verified` holds the
    /// discharges already consumed on this branch (identical third-party
    /// obligations are not re-proved); `invalid` memoizes discharges that
    /// failed and is threaded mutably along the branch spine but copied into
    /// sub-branches, so a rejection in one alternative prunes its siblings
    /// without leaking out of the enclosing branch.
    fn search(
        &self,
        mut stack: Vec<Frame<'a>>,
        verified: &HashSet<DischargeRef>,
        invalid: &mut HashSet<DischargeRef>,
        mut contexts: HashSet<VerificationContext>,
    ) -> HashSet<VerificationContext> {
        loop {
            // No surviving context means no caveat can rescue the branch.
            if contexts.is_empty() {
                return contexts;
            }

            // Step the top frame. Third-party caveats fall through to the
            // discharge exploration below once the frame borrow is released.
            let (caveat, root_key) = {
                let frame = match stack.last_mut() {
                    Some(frame) => frame,
                    None => return contexts,
                };
                match frame.remaining.pop_front() {
                    None => {
                        let closed = match frame.owner {
                            Owner::Primary => frame.signature == *self.macaroon.signature(),
                            Owner::Discharge(discharge) => {
                                self.provider.bind(&frame.signature) == *discharge.signature()
                            }
                        };
                        if !closed {
                            trace!("signature closure mismatch");
                            return HashSet::new();
                        }
                        stack.pop();
                        continue;
                    }
                    Some(Caveat::FirstParty(caveat)) => {
                        contexts = contexts
                            .into_iter()
                            .filter_map(|mut context| {
                                match caveat.evaluate(self.macaroon, &mut context) {
                                    Ok(()) => Some(context),
                                    Err(_) => None,
                                }
                            })
                            .collect();
                        frame.signature = self
                            .provider
                            .mac(frame.signature.as_bytes(), caveat.identifier().as_bytes());
                        continue;
                    }
                    Some(Caveat::ThirdParty(caveat)) => {
                        let root_key = match self.provider.decrypt(
                            frame.signature.as_bytes(),
                            caveat.root_or_verification_key(),
                        ) {
                            Ok(root_key) => root_key,
                            Err(error) => {
                                trace!(identifier = %caveat.identifier(), %error,
                                    "verification key did not decrypt");
                                return HashSet::new();
                            }
                        };
                        frame.signature = self
                            .provider
                            .mac(frame.signature.as_bytes(), &caveat.mac_payload());
                        (caveat, root_key)
                    }
                }
            };

            let alternatives = self.macaroon.bound_discharges(caveat.identifier());
            let candidates: Vec<(usize, &'a Macaroon)> = alternatives
                .iter()
                .enumerate()
                .filter(|(index, _)| !invalid.contains(&(caveat.identifier().clone(), *index)))
                .collect();

            // An identical obligation already discharged on this branch needs
            // no second proof; the contexts cannot narrow any further.
            if candidates
                .iter()
                .any(|(index, _)| verified.contains(&(caveat.identifier().clone(), *index)))
            {
                continue;
            }
            if candidates.is_empty() {
                trace!(identifier = %caveat.identifier(), "no usable discharge for third-party caveat");
                return HashSet::new();
            }

            // Try every remaining alternative; each gets its own copy of the
            // stack, the contexts and the memo sets, and the branch result is
            // the union of whatever the alternatives leave standing.
            let mut union = HashSet::new();
            for (index, discharge) in candidates {
                let mut branch_stack = stack.clone();
                branch_stack.push(Frame {
                    owner: Owner::Discharge(discharge),
                    signature: self
                        .provider
                        .mac(root_key.as_bytes(), discharge.identifier().as_bytes()),
                    remaining: discharge.caveats().to_vec().into(),
                });
                let mut branch_verified = verified.clone();
                branch_verified.insert((caveat.identifier().clone(), index));
                let mut branch_invalid = invalid.clone();

                let branch = self.search(
                    branch_stack,
                    &branch_verified,
                    &mut branch_invalid,
                    contexts.clone(),
                );
                if branch.is_empty() {
                    // A discharge that fails here also fails in any equally or
                    // more narrowed context later on this branch.
                    invalid.insert((caveat.identifier().clone(), index));
                } else {
                    union.extend(branch);
                }
            }
            return union;
        }
    }
}

/// One frame of the replay stack: a macaroon being consumed, the signature
/// recomputed so far, and the caveats still to check.
#[derive(Clone)]
struct Frame<'a> {
    owner: Owner<'a>,
    signature: Signature,
    remaining: VecDeque<Caveat>,
}

#[derive(Clone, Copy)]
enum Owner<'a> {
    Primary,
    Discharge(&'a Macaroon),
}
