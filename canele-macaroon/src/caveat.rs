//! Caveat model: the attenuations a macaroon carries
//!
//! Caveats form a closed sum: first-party caveats are checked locally against
//! a [`VerificationContext`], third-party caveats are obligations discharged
//! by a separate bound macaroon. Two structural first-party kinds (ranges and
//! memberships) encode their parameters into the caveat identifier itself;
//! the identifier is the authoritative representation and feeds the MAC
//! chain, so its encoding is byte-exact:
//!
//! - range: `<uuid> ∈ [<lower>, <upper>]`
//! - membership: `<uuid> ∈ [<member>, <member>, …]`
//!
//! Applications may attach opaque first-party caveats carrying their own
//! predicate; the predicate travels as a shared function value, so cloning a
//! caveat preserves its semantics.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use regex::Regex;

use canele_core::{Identifier, MacaroonError};

use crate::context::VerificationContext;
use crate::macaroon::Macaroon;

/// Element separator inside membership identifiers; members must not contain it
pub const MEMBER_SEPARATOR: &str = ", ";

/// Predicate capability carried by an opaque first-party caveat
///
/// Receives the primary macaroon under verification (not necessarily the one
/// holding the caveat) and the branch's context, which it may narrow. A
/// returned error fails the caveat in that context; the verifier backtracks.
pub type Predicate =
    Arc<dyn Fn(&Macaroon, &mut VerificationContext) -> Result<(), MacaroonError> + Send + Sync>;

/// Any caveat attached to a macaroon
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Caveat {
    /// Checked locally against the verification context
    FirstParty(FirstPartyCaveat),
    /// Discharged by a bound discharge macaroon
    ThirdParty(ThirdPartyCaveat),
}

impl Caveat {
    /// The caveat identifier, as it enters the MAC chain
    pub fn identifier(&self) -> &Identifier {
        match self {
            Caveat::FirstParty(caveat) => caveat.identifier(),
            Caveat::ThirdParty(caveat) => caveat.identifier(),
        }
    }
}

impl From<FirstPartyCaveat> for Caveat {
    fn from(caveat: FirstPartyCaveat) -> Self {
        Caveat::FirstParty(caveat)
    }
}

impl From<ThirdPartyCaveat> for Caveat {
    fn from(caveat: ThirdPartyCaveat) -> Self {
        Caveat::ThirdParty(caveat)
    }
}

/// A locally checkable caveat
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FirstPartyCaveat {
    /// Application-defined predicate over an opaque identifier
    Opaque(OpaqueCaveat),
    /// Structural range constraint
    Range(RangeCaveat),
    /// Structural membership constraint
    Membership(MembershipCaveat),
}

impl FirstPartyCaveat {
    /// The caveat identifier
    pub fn identifier(&self) -> &Identifier {
        match self {
            FirstPartyCaveat::Opaque(caveat) => caveat.identifier(),
            FirstPartyCaveat::Range(caveat) => caveat.identifier(),
            FirstPartyCaveat::Membership(caveat) => caveat.identifier(),
        }
    }

    /// Check the caveat against `context`, narrowing it on success
    pub(crate) fn evaluate(
        &self,
        primary: &Macaroon,
        context: &mut VerificationContext,
    ) -> Result<(), MacaroonError> {
        match self {
            FirstPartyCaveat::Opaque(caveat) => (caveat.predicate)(primary, context),
            FirstPartyCaveat::Range(caveat) => {
                let (uuid, lower, upper) = caveat.uuid_and_bounds()?;
                context.add_range(&uuid, lower, upper)
            }
            FirstPartyCaveat::Membership(caveat) => {
                let (uuid, members) = caveat.uuid_and_members()?;
                context.add_membership(&uuid, members)
            }
        }
    }
}

impl From<OpaqueCaveat> for FirstPartyCaveat {
    fn from(caveat: OpaqueCaveat) -> Self {
        FirstPartyCaveat::Opaque(caveat)
    }
}

impl From<RangeCaveat> for FirstPartyCaveat {
    fn from(caveat: RangeCaveat) -> Self {
        FirstPartyCaveat::Range(caveat)
    }
}

impl From<MembershipCaveat> for FirstPartyCaveat {
    fn from(caveat: MembershipCaveat) -> Self {
        FirstPartyCaveat::Membership(caveat)
    }
}

/// First-party caveat with an application-defined predicate
///
/// Compares, hashes and debugs by identifier alone; the predicate is carried
/// alongside and shared across clones.
#[derive(Clone)]
pub struct OpaqueCaveat {
    identifier: Identifier,
    predicate: Predicate,
}

impl OpaqueCaveat {
    /// Create an opaque caveat from an identifier and its predicate
    pub fn new<F>(identifier: impl Into<Identifier>, predicate: F) -> Self
    where
        F: Fn(&Macaroon, &mut VerificationContext) -> Result<(), MacaroonError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            identifier: identifier.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// The caveat identifier
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

impl fmt::Debug for OpaqueCaveat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueCaveat")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl PartialEq for OpaqueCaveat {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for OpaqueCaveat {}

impl Hash for OpaqueCaveat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

/// Structural range caveat: `<uuid> ∈ [<lower>, <upper>]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeCaveat {
    identifier: Identifier,
}

impl RangeCaveat {
    /// Create a range caveat over `[lower, upper]` for the dimension `uuid`
    ///
    /// # Errors
    /// `InvalidRangeBounds` if `upper < lower`
    pub fn new(uuid: &str, lower: i64, upper: i64) -> Result<Self, MacaroonError> {
        if upper < lower {
            return Err(MacaroonError::InvalidRangeBounds { lower, upper });
        }
        Ok(Self {
            identifier: Identifier::from(format!("{uuid} ∈ [{lower}, {upper}]")),
        })
    }

    /// The caveat identifier
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Parse the dimension UUID and bounds back out of the identifier
    pub fn uuid_and_bounds(&self) -> Result<(String, i64, i64), MacaroonError> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"^(.*) ∈ \[(-?\d+), (-?\d+)\]$").unwrap());

        let text = identifier_text(&self.identifier, "range")?;
        let captures = re
            .captures(text)
            .ok_or_else(|| malformed(text, "range"))?;
        let uuid = captures[1].to_string();
        let lower = captures[2]
            .parse::<i64>()
            .map_err(|_| malformed(text, "range"))?;
        let upper = captures[3]
            .parse::<i64>()
            .map_err(|_| malformed(text, "range"))?;
        Ok((uuid, lower, upper))
    }
}

/// Structural membership caveat: `<uuid> ∈ [<member>, <member>, …]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MembershipCaveat {
    identifier: Identifier,
}

impl MembershipCaveat {
    /// Create a membership caveat requiring `members` for the dimension `uuid`
    ///
    /// The identifier lists the members in sorted order.
    ///
    /// # Errors
    /// `ReservedMemberSequence` if any member contains `", "`
    pub fn new(uuid: &str, members: BTreeSet<String>) -> Result<Self, MacaroonError> {
        if let Some(element) = members.iter().find(|member| member.contains(MEMBER_SEPARATOR)) {
            return Err(MacaroonError::ReservedMemberSequence {
                element: element.clone(),
            });
        }
        let joined = members.iter().cloned().collect::<Vec<_>>().join(MEMBER_SEPARATOR);
        Ok(Self {
            identifier: Identifier::from(format!("{uuid} ∈ [{joined}]")),
        })
    }

    /// The caveat identifier
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Parse the dimension UUID and required members back out of the identifier
    pub fn uuid_and_members(&self) -> Result<(String, BTreeSet<String>), MacaroonError> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"^(.*) ∈ \[(.*)\]$").unwrap());

        let text = identifier_text(&self.identifier, "membership")?;
        let captures = re
            .captures(text)
            .ok_or_else(|| malformed(text, "membership"))?;
        let uuid = captures[1].to_string();
        let members = match &captures[2] {
            "" => BTreeSet::new(),
            listed => listed
                .split(MEMBER_SEPARATOR)
                .map(|member| member.to_string())
                .collect(),
        };
        Ok((uuid, members))
    }
}

/// Third-party caveat: an obligation discharged elsewhere
///
/// Holds the plaintext root key until the caveat is appended to a macaroon;
/// the append replaces it with the verification key (the root key encrypted
/// under the macaroon's then-current signature). Locations are advisory hints
/// to where a discharge can be obtained and never enter the MAC chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThirdPartyCaveat {
    identifier: Identifier,
    root_or_verification_key: Vec<u8>,
    locations: BTreeSet<String>,
}

impl ThirdPartyCaveat {
    /// Create a third-party caveat from its root key, identifier and
    /// discharge location hints
    pub fn new(
        root_key: impl Into<Vec<u8>>,
        identifier: impl Into<Identifier>,
        locations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            root_or_verification_key: root_key.into(),
            locations: locations.into_iter().map(Into::into).collect(),
        }
    }

    /// The caveat identifier
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// The root key before the caveat is appended, the verification key after
    pub fn root_or_verification_key(&self) -> &[u8] {
        &self.root_or_verification_key
    }

    pub(crate) fn set_root_or_verification_key(&mut self, key: Vec<u8>) {
        self.root_or_verification_key = key;
    }

    /// The discharge location hints
    pub fn locations(&self) -> &BTreeSet<String> {
        &self.locations
    }

    /// A copy of the discharge location hints
    pub fn copy_of_locations(&self) -> BTreeSet<String> {
        self.locations.clone()
    }

    /// Add a discharge location hint; returns whether it was newly added
    pub fn add_location(&mut self, location: impl Into<String>) -> bool {
        self.locations.insert(location.into())
    }

    /// Remove a discharge location hint; returns whether it was present
    pub fn remove_location(&mut self, location: &str) -> bool {
        self.locations.remove(location)
    }

    /// The bytes this caveat contributes to the MAC chain: verification key
    /// followed by identifier
    pub(crate) fn mac_payload(&self) -> Vec<u8> {
        let mut payload =
            Vec::with_capacity(self.root_or_verification_key.len() + self.identifier.as_bytes().len());
        payload.extend_from_slice(&self.root_or_verification_key);
        payload.extend_from_slice(self.identifier.as_bytes());
        payload
    }
}

fn identifier_text<'a>(
    identifier: &'a Identifier,
    expected: &'static str,
) -> Result<&'a str, MacaroonError> {
    std::str::from_utf8(identifier.as_bytes()).map_err(|_| {
        MacaroonError::MalformedCaveatIdentifier {
            identifier: identifier.to_string(),
            expected,
        }
    })
}

fn malformed(identifier: &str, expected: &'static str) -> MacaroonError {
    MacaroonError::MalformedCaveatIdentifier {
        identifier: identifier.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn test_range_identifier_encoding() {
        let caveat = RangeCaveat::new("TIME", 0, 100).unwrap();
        assert_eq!(caveat.identifier().as_bytes(), "TIME ∈ [0, 100]".as_bytes());

        let caveat = RangeCaveat::new("OFFSET", -42, -7).unwrap();
        assert_eq!(
            caveat.identifier().as_bytes(),
            "OFFSET ∈ [-42, -7]".as_bytes()
        );
    }

    #[test]
    fn test_range_parses_back() {
        let caveat = RangeCaveat::new("TIME", -100, 0).unwrap();
        assert_eq!(
            caveat.uuid_and_bounds().unwrap(),
            ("TIME".to_string(), -100, 0)
        );
    }

    #[test]
    fn test_range_rejects_inverted_bounds() {
        let err = RangeCaveat::new("TIME", 10, 5).unwrap_err();
        assert_eq!(err, MacaroonError::InvalidRangeBounds { lower: 10, upper: 5 });
    }

    #[test]
    fn test_membership_identifier_lists_sorted_members() {
        let caveat = MembershipCaveat::new("ACCESS", members(&["write", "read"])).unwrap();
        assert_eq!(
            caveat.identifier().as_bytes(),
            "ACCESS ∈ [read, write]".as_bytes()
        );
    }

    #[test]
    fn test_membership_parses_back() {
        let caveat = MembershipCaveat::new("ACCESS", members(&["r1", "r2"])).unwrap();
        assert_eq!(
            caveat.uuid_and_members().unwrap(),
            ("ACCESS".to_string(), members(&["r1", "r2"]))
        );

        let empty = MembershipCaveat::new("ACCESS", BTreeSet::new()).unwrap();
        assert_eq!(
            empty.uuid_and_members().unwrap(),
            ("ACCESS".to_string(), BTreeSet::new())
        );
    }

    #[test]
    fn test_membership_rejects_reserved_sequence() {
        let err = MembershipCaveat::new("ACCESS", members(&["a, b"])).unwrap_err();
        assert_eq!(
            err,
            MacaroonError::ReservedMemberSequence {
                element: "a, b".to_string()
            }
        );
    }

    #[test]
    fn test_opaque_caveat_compares_by_identifier() {
        let one = OpaqueCaveat::new("ip = 10.0.0.1", |_, _| Ok(()));
        let two = OpaqueCaveat::new("ip = 10.0.0.1", |_, _| {
            Err(MacaroonError::predicate_failed("never"))
        });
        let other = OpaqueCaveat::new("ip = 10.0.0.2", |_, _| Ok(()));

        assert_eq!(one, two, "predicates do not participate in equality");
        assert_ne!(one, other);
    }

    #[test]
    fn test_opaque_clone_shares_predicate() {
        let caveat = OpaqueCaveat::new("flagged", |_, context| {
            context.add_range("FLAG", 1, 1)
        });
        let clone = caveat.clone();

        let provider = canele_core::HmacAesProvider;
        let macaroon = Macaroon::mint(&provider, "s", "m", ["loc"]);
        let mut context = VerificationContext::new();
        FirstPartyCaveat::from(clone)
            .evaluate(&macaroon, &mut context)
            .unwrap();
        assert_eq!(context.range("FLAG"), Some((1, 1)));
    }

    #[test]
    fn test_third_party_equality_and_locations() {
        let one = ThirdPartyCaveat::new("root", "t".as_bytes(), ["d"]);
        let two = ThirdPartyCaveat::new("root", "t".as_bytes(), ["d"]);
        assert_eq!(one, two);

        let mut edited = one.clone();
        assert!(edited.add_location("elsewhere"));
        assert_ne!(one, edited);
        assert!(edited.remove_location("elsewhere"));
        assert_eq!(one, edited);
        assert!(!edited.remove_location("never-there"));
        assert_eq!(edited.copy_of_locations(), members(&["d"]));
    }

    #[test]
    fn test_third_party_mac_payload_concatenation() {
        let caveat = ThirdPartyCaveat::new(vec![1u8, 2, 3], "id".as_bytes(), ["d"]);
        assert_eq!(caveat.mac_payload(), vec![1u8, 2, 3, b'i', b'd']);
    }
}
