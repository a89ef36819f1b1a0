//! Declarative reconciliation rules.
//!
//! Each derived dimension is one [`Rule`]: which terminal field it writes,
//! which attempts speak to it, whether only decisive attempts count, and what
//! happens when no attempt qualifies. [`RULES`] is the full table consumed by
//! [`crate::fold`].

use serde::Serialize;

use crate::types::{AcquiringMode, Attempt, Cvm, PaymentMethod};

/// What a dimension becomes when no attempt qualifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Keep whatever the terminal already stores.
    Preserve,
    /// Rebuild the set from scratch; no evidence means an empty set.
    ResetToEmpty,
    /// No evidence means `TriState::Unknown`.
    UnknownOnAbsent,
}

/// Terminal field a rule writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Contactless,
    ApplePay,
    GooglePay,
    Hce,
    Dcc,
    Edc,
    CardNetworks,
    AcquiringModes,
    CvmSupport(Cvm),
    CvmNetworks(Cvm),
    AcquiringInstitution,
    CheckoutLocation,
    Status,
}

/// Selects the attempts relevant to a dimension and the sub-key each one
/// speaks for.
///
/// Scalar probes use the empty sub-key, so the fold keeps a single winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    PaymentMethod(PaymentMethod),
    AcquiringMode(AcquiringMode),
    Cvm(Cvm),
    /// Keyed by card network
    AnyCardNetwork,
    /// Keyed by acquiring mode
    AnyAcquiringMode,
    /// Keyed by card network, restricted to one CVM
    CvmCardNetwork(Cvm),
    AcquiringInstitution,
    CheckoutLocation,
    DeviceStatus,
}

const SCALAR: &str = "";

impl Probe {
    /// The sub-key this attempt speaks for, or `None` if it is irrelevant.
    pub fn key(&self, attempt: &Attempt) -> Option<String> {
        let relevant = match self {
            Self::PaymentMethod(method) => attempt.payment_method == Some(*method),
            Self::AcquiringMode(mode) => attempt.acquiring_mode == Some(*mode),
            Self::Cvm(cvm) => attempt.cvm == Some(*cvm),
            Self::AnyCardNetwork => return attempt.card_network_key().map(str::to_string),
            Self::AnyAcquiringMode => {
                return attempt.acquiring_mode.map(|mode| mode.as_str().to_string())
            }
            Self::CvmCardNetwork(cvm) => {
                if attempt.cvm != Some(*cvm) {
                    return None;
                }
                return attempt.card_network_key().map(str::to_string);
            }
            Self::AcquiringInstitution => attempt.acquiring_institution_value().is_some(),
            Self::CheckoutLocation => attempt.checkout_location.is_some(),
            Self::DeviceStatus => attempt.device_status.is_some(),
        };
        relevant.then(|| SCALAR.to_string())
    }
}

/// One entry of the reconciliation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rule {
    pub dimension: Dimension,
    pub probe: Probe,
    /// Only decisive attempts may win
    pub decisive_required: bool,
    pub policy: MergePolicy,
}

impl Rule {
    /// Single-valued capability flag.
    pub const fn flag(dimension: Dimension, probe: Probe) -> Self {
        Self {
            dimension,
            probe,
            decisive_required: true,
            policy: MergePolicy::Preserve,
        }
    }

    /// Sub-key-indexed capability set.
    pub const fn set(dimension: Dimension, probe: Probe) -> Self {
        Self {
            dimension,
            probe,
            decisive_required: true,
            policy: MergePolicy::ResetToEmpty,
        }
    }

    /// Overall tri-state support for one verification method.
    pub const fn tri_state(cvm: Cvm) -> Self {
        Self {
            dimension: Dimension::CvmSupport(cvm),
            probe: Probe::Cvm(cvm),
            decisive_required: true,
            policy: MergePolicy::UnknownOnAbsent,
        }
    }

    /// Networks confirmed for one verification method.
    pub const fn cvm_networks(cvm: Cvm) -> Self {
        Self::set(Dimension::CvmNetworks(cvm), Probe::CvmCardNetwork(cvm))
    }

    /// Descriptive field or status; any result may win.
    pub const fn descriptive(dimension: Dimension, probe: Probe) -> Self {
        Self {
            dimension,
            probe,
            decisive_required: false,
            policy: MergePolicy::Preserve,
        }
    }
}

/// Every derived dimension of a terminal.
pub const RULES: &[Rule] = &[
    Rule::flag(Dimension::Contactless, Probe::PaymentMethod(PaymentMethod::Tap)),
    Rule::flag(Dimension::ApplePay, Probe::PaymentMethod(PaymentMethod::ApplePay)),
    Rule::flag(Dimension::GooglePay, Probe::PaymentMethod(PaymentMethod::GooglePay)),
    Rule::flag(Dimension::Hce, Probe::PaymentMethod(PaymentMethod::Hce)),
    Rule::flag(Dimension::Dcc, Probe::AcquiringMode(AcquiringMode::Dcc)),
    Rule::flag(Dimension::Edc, Probe::AcquiringMode(AcquiringMode::Edc)),
    Rule::set(Dimension::CardNetworks, Probe::AnyCardNetwork),
    Rule::set(Dimension::AcquiringModes, Probe::AnyAcquiringMode),
    Rule::tri_state(Cvm::NoPin),
    Rule::tri_state(Cvm::Pin),
    Rule::tri_state(Cvm::Signature),
    Rule::cvm_networks(Cvm::NoPin),
    Rule::cvm_networks(Cvm::Pin),
    Rule::cvm_networks(Cvm::Signature),
    Rule::descriptive(Dimension::AcquiringInstitution, Probe::AcquiringInstitution),
    Rule::descriptive(Dimension::CheckoutLocation, Probe::CheckoutLocation),
    Rule::descriptive(Dimension::Status, Probe::DeviceStatus),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_dimension_has_exactly_one_rule() {
        let dimensions: HashSet<Dimension> = RULES.iter().map(|r| r.dimension).collect();
        assert_eq!(dimensions.len(), RULES.len());
    }

    #[test]
    fn test_decisiveness_gates_everything_but_descriptive_fields() {
        for rule in RULES {
            let descriptive = matches!(
                rule.dimension,
                Dimension::AcquiringInstitution | Dimension::CheckoutLocation | Dimension::Status
            );
            assert_eq!(rule.decisive_required, !descriptive, "{:?}", rule.dimension);
        }
    }

    #[test]
    fn test_cvm_network_probe_needs_matching_cvm_and_network() {
        let probe = Probe::CvmCardNetwork(Cvm::Pin);

        let pin_visa = Attempt::success("t").with_cvm(Cvm::Pin).with_card_network("visa");
        let no_pin_visa = Attempt::success("t").with_cvm(Cvm::NoPin).with_card_network("visa");
        let pin_only = Attempt::success("t").with_cvm(Cvm::Pin);

        assert_eq!(probe.key(&pin_visa), Some("visa".to_string()));
        assert_eq!(probe.key(&no_pin_visa), None);
        assert_eq!(probe.key(&pin_only), None);
    }

    #[test]
    fn test_blank_institution_is_irrelevant() {
        let probe = Probe::AcquiringInstitution;
        let blank = Attempt::success("t").with_acquiring_institution("  ");
        assert_eq!(probe.key(&blank), None);
        assert_eq!(
            RULES
                .iter()
                .find(|r| r.dimension == Dimension::AcquiringInstitution)
                .map(|r| r.policy),
            Some(MergePolicy::Preserve)
        );
    }
}
