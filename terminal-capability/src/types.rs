//! Core types for terminal capability derivation.
//!
//! Attempts are the append-only observations submitted by users. Terminals
//! carry the state derived from them. Every enumerated value in an attempt is
//! read forgivingly: a value this crate does not recognize is treated as if
//! the observer had left the field blank.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::success_rate::SuccessRateAssessment;

/// A textual value that does not name any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {kind} value: {value:?}")]
pub struct ParseValueError {
    /// Which enumeration was being parsed
    pub kind: &'static str,
    /// The offending input
    pub value: String,
}

/// Shared parsing for the closed vocabularies attempts are written in.
trait Vocabulary: Sized + Copy + 'static {
    const KIND: &'static str;
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;

    /// Case-insensitive, whitespace-tolerant lookup.
    fn lookup(s: &str) -> Result<Self, ParseValueError> {
        let needle = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| ParseValueError {
                kind: Self::KIND,
                value: s.to_string(),
            })
    }
}

macro_rules! vocabulary_impls {
    ($ty:ty) => {
        impl FromStr for $ty {
            type Err = ParseValueError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty as Vocabulary>::lookup(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ParseValueError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Vocabulary::as_str(self))
            }
        }
    };
}

/// Outcome reported by the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum AttemptResult {
    /// The terminal did what was tested
    Success,
    /// The terminal did not do what was tested
    Failure,
    /// The observer could not tell
    #[default]
    Unknown,
}

impl AttemptResult {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        Vocabulary::as_str(self)
    }

    /// Map to a flag value. `Unknown` carries no flag.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Success => Some(true),
            Self::Failure => Some(false),
            Self::Unknown => None,
        }
    }
}

impl Vocabulary for AttemptResult {
    const KIND: &'static str = "result";
    const ALL: &'static [Self] = &[Self::Success, Self::Failure, Self::Unknown];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Unknown => "unknown",
        }
    }
}

vocabulary_impls!(AttemptResult);

/// How the card was presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum PaymentMethod {
    Tap,
    Insert,
    Swipe,
    ApplePay,
    GooglePay,
    Hce,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        Vocabulary::as_str(self)
    }
}

impl Vocabulary for PaymentMethod {
    const KIND: &'static str = "payment_method";
    const ALL: &'static [Self] = &[
        Self::Tap,
        Self::Insert,
        Self::Swipe,
        Self::ApplePay,
        Self::GooglePay,
        Self::Hce,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Tap => "tap",
            Self::Insert => "insert",
            Self::Swipe => "swipe",
            Self::ApplePay => "apple_pay",
            Self::GooglePay => "google_pay",
            Self::Hce => "hce",
        }
    }
}

vocabulary_impls!(PaymentMethod);

/// Cardholder verification method exercised by the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Cvm {
    /// No PIN below the contactless threshold
    NoPin,
    /// PIN entry required
    Pin,
    /// Signature required
    Signature,
}

impl Cvm {
    pub fn as_str(&self) -> &'static str {
        Vocabulary::as_str(self)
    }

    /// All verification dimensions, in display order.
    pub fn all() -> [Self; 3] {
        [Self::NoPin, Self::Pin, Self::Signature]
    }
}

impl Vocabulary for Cvm {
    const KIND: &'static str = "cvm";
    const ALL: &'static [Self] = &[Self::NoPin, Self::Pin, Self::Signature];

    fn as_str(&self) -> &'static str {
        match self {
            Self::NoPin => "no_pin",
            Self::Pin => "pin",
            Self::Signature => "signature",
        }
    }
}

vocabulary_impls!(Cvm);

/// Currency handling offered at the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum AcquiringMode {
    /// Dynamic currency conversion
    Dcc,
    /// Settlement in the local currency
    Edc,
}

impl AcquiringMode {
    pub fn as_str(&self) -> &'static str {
        Vocabulary::as_str(self)
    }
}

impl Vocabulary for AcquiringMode {
    const KIND: &'static str = "acquiring_mode";
    const ALL: &'static [Self] = &[Self::Dcc, Self::Edc];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Dcc => "DCC",
            Self::Edc => "EDC",
        }
    }
}

vocabulary_impls!(AcquiringMode);

/// Operational status of a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum DeviceStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
    Disabled,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        Vocabulary::as_str(self)
    }
}

impl Vocabulary for DeviceStatus {
    const KIND: &'static str = "device_status";
    const ALL: &'static [Self] = &[
        Self::Active,
        Self::Inactive,
        Self::Maintenance,
        Self::Disabled,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Maintenance => "maintenance",
            Self::Disabled => "disabled",
        }
    }
}

vocabulary_impls!(DeviceStatus);

/// Where in the shop the terminal sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum CheckoutLocation {
    StaffedCheckout,
    SelfCheckout,
}

impl CheckoutLocation {
    pub fn as_str(&self) -> &'static str {
        Vocabulary::as_str(self)
    }
}

impl Vocabulary for CheckoutLocation {
    const KIND: &'static str = "checkout_location";
    const ALL: &'static [Self] = &[Self::StaffedCheckout, Self::SelfCheckout];

    fn as_str(&self) -> &'static str {
        match self {
            Self::StaffedCheckout => "staffed_checkout",
            Self::SelfCheckout => "self_checkout",
        }
    }
}

vocabulary_impls!(CheckoutLocation);

/// Derived support for a verification dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    Supported,
    Unsupported,
    /// Never decisively observed
    #[default]
    Unknown,
}

/// Forgiving deserializers for crowd-submitted fields.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use std::str::FromStr;

    use super::AttemptResult;

    /// Unrecognized or non-textual values become `None`.
    pub fn value<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr,
    {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(raw
            .as_ref()
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse().ok()))
    }

    /// Unrecognized results are read as `Unknown`.
    pub fn result<'de, D>(deserializer: D) -> Result<AttemptResult, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(value(deserializer)?.unwrap_or_default())
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One user-submitted observation of a terminal.
///
/// Every dimension payload is optional and independent of the others. An
/// attempt is never mutated by derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Unique attempt ID
    #[serde(default = "new_id")]
    pub id: String,
    /// Terminal this attempt describes
    pub terminal_id: String,
    /// Observing user
    #[serde(default)]
    pub submitted_by: Option<String>,
    /// Per-terminal counter assigned by the store; advisory only
    #[serde(default)]
    pub sequence_number: u64,
    /// Observed outcome
    #[serde(default, deserialize_with = "lenient::result")]
    pub result: AttemptResult,
    /// Observer asserts the terminal genuinely rejected the behavior
    #[serde(default)]
    pub is_conclusive_failure: bool,
    #[serde(default, deserialize_with = "lenient::value")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub card_network: Option<String>,
    #[serde(default, deserialize_with = "lenient::value")]
    pub cvm: Option<Cvm>,
    #[serde(default, deserialize_with = "lenient::value")]
    pub acquiring_mode: Option<AcquiringMode>,
    #[serde(default, deserialize_with = "lenient::value")]
    pub device_status: Option<DeviceStatus>,
    #[serde(default)]
    pub acquiring_institution: Option<String>,
    #[serde(default, deserialize_with = "lenient::value")]
    pub checkout_location: Option<CheckoutLocation>,
    #[serde(default)]
    pub notes: Option<String>,
    /// When the visit happened, as reported by the observer
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    /// When the attempt was recorded
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Attempt {
    /// Create a new attempt with no dimension payloads.
    pub fn new(terminal_id: impl Into<String>, result: AttemptResult) -> Self {
        Self {
            id: new_id(),
            terminal_id: terminal_id.into(),
            submitted_by: None,
            sequence_number: 0,
            result,
            is_conclusive_failure: false,
            payment_method: None,
            card_network: None,
            cvm: None,
            acquiring_mode: None,
            device_status: None,
            acquiring_institution: None,
            checkout_location: None,
            notes: None,
            observed_at: None,
            created_at: Utc::now(),
        }
    }

    /// A successful attempt.
    pub fn success(terminal_id: impl Into<String>) -> Self {
        Self::new(terminal_id, AttemptResult::Success)
    }

    /// A failure the observer marked as conclusive.
    pub fn conclusive_failure(terminal_id: impl Into<String>) -> Self {
        Self::new(terminal_id, AttemptResult::Failure).with_conclusive_failure(true)
    }

    pub fn with_conclusive_failure(mut self, conclusive: bool) -> Self {
        self.is_conclusive_failure = conclusive;
        self
    }

    pub fn with_submitted_by(mut self, user: impl Into<String>) -> Self {
        self.submitted_by = Some(user.into());
        self
    }

    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    pub fn with_card_network(mut self, network: impl Into<String>) -> Self {
        self.card_network = Some(network.into());
        self
    }

    pub fn with_cvm(mut self, cvm: Cvm) -> Self {
        self.cvm = Some(cvm);
        self
    }

    pub fn with_acquiring_mode(mut self, mode: AcquiringMode) -> Self {
        self.acquiring_mode = Some(mode);
        self
    }

    pub fn with_device_status(mut self, status: DeviceStatus) -> Self {
        self.device_status = Some(status);
        self
    }

    pub fn with_acquiring_institution(mut self, institution: impl Into<String>) -> Self {
        self.acquiring_institution = Some(institution.into());
        self
    }

    pub fn with_checkout_location(mut self, location: CheckoutLocation) -> Self {
        self.checkout_location = Some(location);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Set when the visit happened.
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }

    /// Timestamp used for ordering: `observed_at`, else `created_at`.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.observed_at.unwrap_or(self.created_at)
    }

    /// See [`crate::evidence::is_decisive`].
    pub fn is_decisive(&self) -> bool {
        crate::evidence::is_decisive(self)
    }

    /// Card network with surrounding whitespace removed, if non-empty.
    pub fn card_network_key(&self) -> Option<&str> {
        non_blank(self.card_network.as_deref())
    }

    /// Acquiring institution with surrounding whitespace removed, if non-empty.
    pub fn acquiring_institution_value(&self) -> Option<&str> {
        non_blank(self.acquiring_institution.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Capability flags and sets derived for a terminal.
///
/// Keys this crate does not derive are kept in `other` and survive every
/// refresh untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contactless: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apple_pay: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_pay: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hce: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dcc: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edc: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquiring_institution: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::value"
    )]
    pub checkout_location: Option<CheckoutLocation>,
    /// Networks confirmed to be accepted
    #[serde(default)]
    pub card_networks: BTreeSet<String>,
    /// Acquiring modes confirmed to be offered
    #[serde(default)]
    pub acquiring_modes: BTreeSet<AcquiringMode>,
    /// Stored keys outside the derived vocabulary
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// Support for one verification method.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CvmSupport {
    /// Overall derived support
    #[serde(default)]
    pub overall: TriState,
    /// Networks confirmed to support this method
    #[serde(default)]
    pub networks: BTreeSet<String>,
}

/// Cardholder verification state for the three CVM dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Verification {
    #[serde(default)]
    pub no_pin: CvmSupport,
    #[serde(default)]
    pub pin: CvmSupport,
    #[serde(default)]
    pub signature: CvmSupport,
}

impl Verification {
    pub fn get(&self, cvm: Cvm) -> &CvmSupport {
        match cvm {
            Cvm::NoPin => &self.no_pin,
            Cvm::Pin => &self.pin,
            Cvm::Signature => &self.signature,
        }
    }

    pub fn get_mut(&mut self, cvm: Cvm) -> &mut CvmSupport {
        match cvm {
            Cvm::NoPin => &mut self.no_pin,
            Cvm::Pin => &mut self.pin,
            Cvm::Signature => &mut self.signature,
        }
    }
}

/// Who derived the terminal's state, and when.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub has_been_refreshed: bool,
    #[serde(default)]
    pub refreshed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refreshed_by: Option<String>,
    /// Number of attempts the last derivation pass read
    #[serde(default)]
    pub refreshed_attempt_count: u64,
}

impl Provenance {
    /// Provenance for a derivation pass that just ran.
    pub fn stamp(actor: impl Into<String>, attempt_count: usize, at: DateTime<Utc>) -> Self {
        Self {
            has_been_refreshed: true,
            refreshed_at: Some(at),
            refreshed_by: Some(actor.into()),
            refreshed_attempt_count: attempt_count as u64,
        }
    }
}

/// A payment terminal and its derived state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Terminal {
    /// Unique terminal ID
    pub id: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub verification: Verification,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub provenance: Provenance,
    /// Record version, bumped by the store on every write
    #[serde(default)]
    pub version: u64,
}

impl Terminal {
    /// Create a terminal with nothing derived yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: Capabilities::default(),
            verification: Verification::default(),
            status: DeviceStatus::default(),
            provenance: Provenance::default(),
            version: 0,
        }
    }

    /// Overwrite the derived fields with a snapshot.
    ///
    /// Provenance and version are left alone; they belong to the refresh
    /// pass and the store respectively.
    pub fn apply_snapshot(&mut self, snapshot: &TerminalSnapshot) {
        self.capabilities = snapshot.capabilities.clone();
        self.verification = snapshot.verification.clone();
        self.status = snapshot.status;
    }

    /// Borrow the derived portion of this record.
    pub fn derived(&self) -> DerivedState<'_> {
        DerivedState {
            capabilities: &self.capabilities,
            verification: &self.verification,
            status: self.status,
        }
    }
}

/// Output of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalSnapshot {
    pub terminal_id: String,
    pub capabilities: Capabilities,
    pub verification: Verification,
    pub status: DeviceStatus,
    /// Aggregate success-rate verdict computed in the same pass
    pub success_rate: SuccessRateAssessment,
}

impl TerminalSnapshot {
    /// Borrow the portion of the snapshot that is written to the terminal.
    pub fn derived(&self) -> DerivedState<'_> {
        DerivedState {
            capabilities: &self.capabilities,
            verification: &self.verification,
            status: self.status,
        }
    }
}

/// Borrowed view of the fields derivation owns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedState<'a> {
    pub capabilities: &'a Capabilities,
    pub verification: &'a Verification,
    pub status: DeviceStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vocabulary_parsing_is_forgiving_about_case() {
        assert_eq!(" Apple_Pay ".parse::<PaymentMethod>(), Ok(PaymentMethod::ApplePay));
        assert_eq!("dcc".parse::<AcquiringMode>(), Ok(AcquiringMode::Dcc));
        assert_eq!(
            "nfc".parse::<PaymentMethod>(),
            Err(ParseValueError {
                kind: "payment_method",
                value: "nfc".to_string(),
            })
        );
    }

    #[test]
    fn test_unrecognized_attempt_values_read_as_absent() {
        let attempt: Attempt = serde_json::from_value(json!({
            "terminal_id": "t-1",
            "result": "sucess",
            "payment_method": "nfc",
            "device_status": "broken",
            "acquiring_mode": 3,
            "cvm": "pin",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(attempt.result, AttemptResult::Unknown);
        assert_eq!(attempt.payment_method, None);
        assert_eq!(attempt.device_status, None);
        assert_eq!(attempt.acquiring_mode, None);
        assert_eq!(attempt.cvm, Some(Cvm::Pin));
        assert!(!attempt.id.is_empty());
    }

    #[test]
    fn test_effective_time_falls_back_to_created_at() {
        let attempt = Attempt::success("t-1");
        assert_eq!(attempt.effective_time(), attempt.created_at);

        let observed = attempt.created_at - chrono::Duration::days(3);
        let attempt = attempt.observed_at(observed);
        assert_eq!(attempt.effective_time(), observed);
    }

    #[test]
    fn test_blank_card_network_has_no_key() {
        let attempt = Attempt::success("t-1").with_card_network("   ");
        assert_eq!(attempt.card_network_key(), None);

        let attempt = Attempt::success("t-1").with_card_network(" visa ");
        assert_eq!(attempt.card_network_key(), Some("visa"));
    }

    #[test]
    fn test_capabilities_keep_unknown_keys() {
        let caps: Capabilities = serde_json::from_value(json!({
            "contactless": true,
            "card_networks": ["visa"],
            "acquiring_modes": ["DCC"],
            "loyalty_program": "stamps"
        }))
        .unwrap();

        assert_eq!(caps.contactless, Some(true));
        assert!(caps.acquiring_modes.contains(&AcquiringMode::Dcc));
        assert_eq!(caps.other.get("loyalty_program"), Some(&json!("stamps")));

        let back = serde_json::to_value(&caps).unwrap();
        assert_eq!(back["loyalty_program"], json!("stamps"));
        assert!(back.get("apple_pay").is_none());
    }
}
