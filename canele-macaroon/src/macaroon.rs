//! The macaroon credential: mint, attenuate, bind, query
//!
//! A macaroon is an identifier plus an ordered caveat list under a chained
//! MAC signature rooted in a shared secret. Every append re-chains the
//! signature, so the credential is append-only and tamper-evident. Discharge
//! macaroons for third-party caveats are bound to a primary macaroon before a
//! request; binding rewrites their signature through a one-way transform so
//! they cannot be replayed against another credential.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tracing::debug;

use canele_core::{CryptoProvider, Identifier, MacaroonError, Signature};

use crate::caveat::{Caveat, FirstPartyCaveat, MembershipCaveat, RangeCaveat, ThirdPartyCaveat};
use crate::context::VerificationContext;
use crate::verify::MacaroonVerifier;

/// A contextual bearer credential
///
/// Equality and hashing are structural over every field, including the
/// advisory location hints; two macaroons minted identically but bound to
/// different discharge sets compare unequal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Macaroon {
    identifier: Identifier,
    location_hints: BTreeSet<String>,
    caveats: Vec<Caveat>,
    signature: Signature,
    bound: BTreeMap<Identifier, Vec<Macaroon>>,
}

impl Macaroon {
    /// Mint a fresh macaroon under `secret`
    ///
    /// The secret never travels with the credential; it is required again at
    /// verification time. Location hints are advisory and never enter the
    /// signature chain.
    ///
    /// # Example
    /// ```rust
    /// use canele_macaroon::{HmacAesProvider, Macaroon, VerificationContext};
    ///
    /// let provider = HmacAesProvider;
    /// let macaroon = Macaroon::mint(&provider, "secret", "order-31415", ["https://target.example"]);
    /// let contexts = macaroon.verify(&provider, "secret", VerificationContext::new());
    /// assert_eq!(contexts.len(), 1);
    /// ```
    pub fn mint<P: CryptoProvider>(
        provider: &P,
        secret: &str,
        identifier: impl Into<Identifier>,
        locations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let identifier = identifier.into();
        let signature = provider.mac(secret.as_bytes(), identifier.as_bytes());
        debug!(identifier = %identifier, "minted macaroon");
        Self {
            identifier,
            location_hints: locations.into_iter().map(Into::into).collect(),
            caveats: Vec::new(),
            signature,
            bound: BTreeMap::new(),
        }
    }

    /// The public identifier
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// The current chained signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The caveats, in append order
    pub fn caveats(&self) -> &[Caveat] {
        &self.caveats
    }

    /// Advisory hints to the locations able to verify this macaroon
    pub fn location_hints(&self) -> &BTreeSet<String> {
        &self.location_hints
    }

    /// The discharges bound under `identifier`, in bind order
    pub fn bound_discharges(&self, identifier: &Identifier) -> &[Macaroon] {
        self.bound.get(identifier).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any discharge macaroon has been bound
    pub fn has_bound_discharges(&self) -> bool {
        !self.bound.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }

    /// Append a first-party caveat, re-chaining the signature
    ///
    /// Returns the appended caveat. Must not run concurrently with a
    /// verification of the same macaroon.
    pub fn append_first_party<P: CryptoProvider>(
        &mut self,
        provider: &P,
        caveat: impl Into<FirstPartyCaveat>,
    ) -> &FirstPartyCaveat {
        let caveat = caveat.into();
        self.signature = provider.mac(self.signature.as_bytes(), caveat.identifier().as_bytes());
        self.caveats.push(Caveat::FirstParty(caveat));
        match self.caveats.last() {
            Some(Caveat::FirstParty(appended)) => appended,
            _ => unreachable!("a first-party caveat was just appended"),
        }
    }

    /// Append a third-party caveat, wrapping its root key and re-chaining
    /// the signature
    ///
    /// The caveat's root key is replaced with the verification key (the root
    /// key encrypted under the current signature) before the signature is
    /// advanced over the verification key and identifier.
    ///
    /// # Errors
    /// Any failure from the provider's encryption.
    pub fn append_third_party<P: CryptoProvider>(
        &mut self,
        provider: &P,
        mut caveat: ThirdPartyCaveat,
    ) -> Result<&ThirdPartyCaveat, MacaroonError> {
        let verification_key =
            provider.encrypt(self.signature.as_bytes(), caveat.root_or_verification_key())?;
        caveat.set_root_or_verification_key(verification_key);
        self.signature = provider.mac(self.signature.as_bytes(), &caveat.mac_payload());
        self.caveats.push(Caveat::ThirdParty(caveat));
        match self.caveats.last() {
            Some(Caveat::ThirdParty(appended)) => Ok(appended),
            _ => unreachable!("a third-party caveat was just appended"),
        }
    }

    /// Bind a discharge macaroon to this macaroon, as preparation for a
    /// request
    ///
    /// The discharge is copied; its signature is rewritten through the
    /// provider's one-way binding transform, tying it to this credential.
    /// Binding the same discharge twice is a no-op.
    ///
    /// # Errors
    /// `DischargeAlreadyBound` if the discharge itself carries bound
    /// discharges; those must be bound to this macaroon instead.
    pub fn bind_discharge<P: CryptoProvider>(
        &mut self,
        provider: &P,
        discharge: &Macaroon,
    ) -> Result<(), MacaroonError> {
        if discharge.has_bound_discharges() {
            return Err(MacaroonError::DischargeAlreadyBound);
        }
        let mut bound = discharge.clone();
        bound.signature = provider.bind(&bound.signature);
        debug!(identifier = %bound.identifier, "bound discharge macaroon");

        let alternatives = self.bound.entry(bound.identifier.clone()).or_default();
        if !alternatives.contains(&bound) {
            alternatives.push(bound);
        }
        Ok(())
    }

    /// The third-party caveats whose location hints intersect `locations`
    /// and which have no bound discharge yet
    ///
    /// Useful to a caller assembling the discharge requests for a pending
    /// credential.
    pub fn third_party_caveats_for(&self, locations: &BTreeSet<String>) -> Vec<&ThirdPartyCaveat> {
        self.caveats
            .iter()
            .filter_map(|caveat| match caveat {
                Caveat::ThirdParty(third_party) => Some(third_party),
                Caveat::FirstParty(_) => None,
            })
            .filter(|third_party| {
                third_party
                    .locations()
                    .iter()
                    .any(|location| locations.contains(location))
            })
            .filter(|third_party| self.bound_discharges(third_party.identifier()).is_empty())
            .collect()
    }

    /// Verify this macaroon under `secret`, starting from `context`
    ///
    /// Returns every context in which the credential holds; an empty set
    /// means it does not verify. See [`MacaroonVerifier`] for the search
    /// semantics.
    pub fn verify<P: CryptoProvider>(
        &self,
        provider: &P,
        secret: &str,
        context: VerificationContext,
    ) -> HashSet<VerificationContext> {
        MacaroonVerifier::new(self, provider, secret)
            .with_context(context)
            .verify()
    }

    /// Mint a macaroon restating `context` as structural caveats
    ///
    /// The secret and identifier are freshly generated alphanumeric strings
    /// of the requested lengths; the secret is returned alongside the
    /// macaroon. Membership constraints are appended first, then ranges,
    /// each group in UUID order.
    ///
    /// # Errors
    /// Construction errors from the restated caveats (e.g. a membership
    /// element containing `", "`).
    pub fn wrap_context<P: CryptoProvider>(
        provider: &P,
        context: &VerificationContext,
        secret_length: usize,
        identifier_length: usize,
        locations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<(String, Macaroon), MacaroonError> {
        let secret = random_alphanumeric(secret_length);
        let identifier = Identifier::from(random_alphanumeric(identifier_length));
        let mut macaroon = Self::mint(provider, &secret, identifier, locations);

        for (uuid, members) in context.copy_of_memberships() {
            macaroon.append_first_party(provider, MembershipCaveat::new(&uuid, members)?);
        }
        for (uuid, (lower, upper)) in context.copy_of_ranges() {
            macaroon.append_first_party(provider, RangeCaveat::new(&uuid, lower, upper)?);
        }
        Ok((secret, macaroon))
    }
}

fn random_alphanumeric(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use canele_core::HmacAesProvider;

    fn locations(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn test_mint_sets_the_chain_root() {
        let provider = HmacAesProvider;
        let macaroon = Macaroon::mint(&provider, "secret", "order-31415", ["h"]);

        assert_eq!(
            *macaroon.signature(),
            provider.mac(b"secret", b"order-31415")
        );
        assert!(macaroon.caveats().is_empty());
        assert!(!macaroon.has_bound_discharges());
        assert_eq!(macaroon.location_hints(), &locations(&["h"]));
    }

    #[test]
    fn test_appends_rechain_the_signature() {
        let provider = HmacAesProvider;
        let mut macaroon = Macaroon::mint(&provider, "secret", "m", ["h"]);
        let after_mint = macaroon.signature().clone();

        let appended = macaroon
            .append_first_party(&provider, RangeCaveat::new("TIME", 0, 100).unwrap())
            .identifier()
            .clone();
        assert_eq!(
            *macaroon.signature(),
            provider.mac(after_mint.as_bytes(), appended.as_bytes())
        );
        assert_eq!(macaroon.caveats().len(), 1);
    }

    #[test]
    fn test_third_party_append_wraps_the_root_key() {
        let provider = HmacAesProvider;
        let mut macaroon = Macaroon::mint(&provider, "secret", "m", ["h"]);
        let before_append = macaroon.signature().clone();

        let appended = macaroon
            .append_third_party(&provider, ThirdPartyCaveat::new("root-key", "t".as_bytes(), ["d"]))
            .unwrap();
        assert_ne!(
            appended.root_or_verification_key(),
            b"root-key",
            "the plaintext root key must not remain in the caveat"
        );

        let recovered = provider
            .decrypt(before_append.as_bytes(), appended.root_or_verification_key())
            .unwrap();
        assert_eq!(recovered, "root-key");
    }

    #[test]
    fn test_bind_rejects_nested_discharges() {
        let provider = HmacAesProvider;
        let mut primary = Macaroon::mint(&provider, "secret", "m", ["h"]);
        let mut outer = Macaroon::mint(&provider, "s2", "d2", ["h"]);
        let inner = Macaroon::mint(&provider, "s3", "d3", ["h"]);

        outer.bind_discharge(&provider, &inner).unwrap();
        assert_eq!(
            primary.bind_discharge(&provider, &outer),
            Err(MacaroonError::DischargeAlreadyBound)
        );
    }

    #[test]
    fn test_bind_transforms_the_discharge_signature() {
        let provider = HmacAesProvider;
        let mut primary = Macaroon::mint(&provider, "secret", "m", ["h"]);
        let discharge = Macaroon::mint(&provider, "root", "t", ["d"]);

        primary.bind_discharge(&provider, &discharge).unwrap();
        let bound = &primary.bound_discharges(discharge.identifier())[0];
        assert_eq!(*bound.signature(), provider.bind(discharge.signature()));

        // rebinding the same discharge is a no-op
        primary.bind_discharge(&provider, &discharge).unwrap();
        assert_eq!(primary.bound_discharges(discharge.identifier()).len(), 1);
    }

    #[test]
    fn test_clone_equality() {
        let provider = HmacAesProvider;
        let mut macaroon = Macaroon::mint(&provider, "secret", "m", ["h"]);
        macaroon.append_first_party(
            &provider,
            MembershipCaveat::new("ACCESS", locations(&["read"])).unwrap(),
        );
        macaroon.append_first_party(&provider, RangeCaveat::new("TIME", 0, 100).unwrap());
        macaroon
            .append_third_party(&provider, ThirdPartyCaveat::new("root", "t".as_bytes(), ["d"]))
            .unwrap();

        assert_eq!(macaroon.clone(), macaroon);
    }

    #[test]
    fn test_equality_covers_location_hints() {
        let provider = HmacAesProvider;
        let one = Macaroon::mint(&provider, "secret", "m", ["h1"]);
        let two = Macaroon::mint(&provider, "secret", "m", ["h2"]);
        assert_ne!(one, two, "location hints participate in equality");
    }

    #[test]
    fn test_third_party_caveats_for_skips_discharged_and_foreign_locations() {
        let provider = HmacAesProvider;
        let mut macaroon = Macaroon::mint(&provider, "secret", "m", ["h"]);
        macaroon.append_first_party(
            &provider,
            MembershipCaveat::new("ACCESS", locations(&["read"])).unwrap(),
        );
        let pending = macaroon
            .append_third_party(
                &provider,
                ThirdPartyCaveat::new("k1", "t1".as_bytes(), ["locOne", "locTwo"]),
            )
            .unwrap()
            .clone();
        macaroon
            .append_third_party(
                &provider,
                ThirdPartyCaveat::new("k2", "t2".as_bytes(), ["locOne", "locTwo"]),
            )
            .unwrap();

        let discharge = Macaroon::mint(&provider, "k2", "t2", Vec::<&str>::new());
        macaroon.bind_discharge(&provider, &discharge).unwrap();

        let found = macaroon.third_party_caveats_for(&locations(&["locTwo", "locThree"]));
        assert_eq!(found.len(), 1);
        assert_eq!(*found[0], pending);

        let found = macaroon.third_party_caveats_for(&locations(&["locFour"]));
        assert!(found.is_empty());
    }

    #[test]
    fn test_wrap_context_restates_the_constraints() {
        let provider = HmacAesProvider;

        let mut context = VerificationContext::new();
        let (secret, wrapped) =
            Macaroon::wrap_context(&provider, &context, 32, 32, Vec::<&str>::new()).unwrap();
        let equivalent = Macaroon::mint(&provider, &secret, wrapped.identifier().clone(), Vec::<&str>::new());
        assert_eq!(equivalent, wrapped);

        context
            .add_membership("ACCESS", locations(&["read", "write"]))
            .unwrap();
        context.add_range("TIME", -100, 100).unwrap();
        let (secret, wrapped) =
            Macaroon::wrap_context(&provider, &context, 32, 32, Vec::<&str>::new()).unwrap();

        let mut equivalent =
            Macaroon::mint(&provider, &secret, wrapped.identifier().clone(), Vec::<&str>::new());
        equivalent.append_first_party(
            &provider,
            MembershipCaveat::new("ACCESS", locations(&["read", "write"])).unwrap(),
        );
        equivalent.append_first_party(&provider, RangeCaveat::new("TIME", -100, 100).unwrap());
        assert_eq!(equivalent, wrapped);

        // and the wrapped macaroon verifies back into the same constraints
        let results = wrapped.verify(&provider, &secret, VerificationContext::new());
        assert_eq!(results.len(), 1);
        assert_eq!(results.into_iter().next().unwrap(), context);
    }
}
