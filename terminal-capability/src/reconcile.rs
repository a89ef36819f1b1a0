//! Whole-terminal reconciliation.
//!
//! Runs every rule in [`RULES`] over the terminal's history and left-merges
//! the results over its stored state, then applies the success-rate policy.

use crate::evidence::newest_first;
use crate::fold::{resolve, Resolution};
use crate::rules::{Dimension, RULES};
use crate::success_rate::{evaluate_success_rate, SuccessRatePolicy};
use crate::types::{Attempt, DeviceStatus, Terminal, TerminalSnapshot};

/// Derive a terminal's current state from its attempts, with the default
/// success-rate policy.
pub fn reconcile_terminal(terminal: &Terminal, attempts: &[Attempt]) -> TerminalSnapshot {
    reconcile_terminal_with(terminal, attempts, &SuccessRatePolicy::default())
}

/// Derive a terminal's current state from its attempts.
///
/// Attempts that reference a different terminal are ignored. The function is
/// total: an empty history yields the stored flags and descriptive fields,
/// empty sets and `Unknown` verification.
pub fn reconcile_terminal_with(
    terminal: &Terminal,
    attempts: &[Attempt],
    policy: &SuccessRatePolicy,
) -> TerminalSnapshot {
    let ordered = newest_first(attempts.iter().filter(|a| a.terminal_id == terminal.id));

    let mut snapshot = TerminalSnapshot {
        terminal_id: terminal.id.clone(),
        capabilities: terminal.capabilities.clone(),
        verification: terminal.verification.clone(),
        status: terminal.status,
        success_rate: Default::default(),
    };

    for rule in RULES {
        apply(&mut snapshot, rule.dimension, resolve(rule, &ordered));
    }

    snapshot.success_rate = evaluate_success_rate(snapshot.status, ordered.iter().copied(), policy);
    if snapshot.success_rate.demote {
        snapshot.status = DeviceStatus::Inactive;
    }

    snapshot
}

fn apply(snapshot: &mut TerminalSnapshot, dimension: Dimension, resolution: Resolution<'_>) {
    let caps = &mut snapshot.capabilities;
    match resolution {
        Resolution::Latest(None) => {}
        Resolution::Latest(Some(attempt)) => match dimension {
            Dimension::Contactless => set_flag(&mut caps.contactless, attempt),
            Dimension::ApplePay => set_flag(&mut caps.apple_pay, attempt),
            Dimension::GooglePay => set_flag(&mut caps.google_pay, attempt),
            Dimension::Hce => set_flag(&mut caps.hce, attempt),
            Dimension::Dcc => set_flag(&mut caps.dcc, attempt),
            Dimension::Edc => set_flag(&mut caps.edc, attempt),
            Dimension::AcquiringInstitution => {
                if let Some(value) = attempt.acquiring_institution_value() {
                    caps.acquiring_institution = Some(value.to_string());
                }
            }
            Dimension::CheckoutLocation => {
                if attempt.checkout_location.is_some() {
                    caps.checkout_location = attempt.checkout_location;
                }
            }
            Dimension::Status => {
                if let Some(status) = attempt.device_status {
                    snapshot.status = status;
                }
            }
            Dimension::CardNetworks
            | Dimension::AcquiringModes
            | Dimension::CvmSupport(_)
            | Dimension::CvmNetworks(_) => {}
        },
        Resolution::Members(members) => match dimension {
            Dimension::CardNetworks => caps.card_networks = members,
            Dimension::AcquiringModes => {
                caps.acquiring_modes = members.iter().filter_map(|m| m.parse().ok()).collect();
            }
            Dimension::CvmNetworks(cvm) => snapshot.verification.get_mut(cvm).networks = members,
            _ => {}
        },
        Resolution::TriState(state) => {
            if let Dimension::CvmSupport(cvm) = dimension {
                snapshot.verification.get_mut(cvm).overall = state;
            }
        }
    }
}

fn set_flag(flag: &mut Option<bool>, attempt: &Attempt) {
    if let Some(value) = attempt.result.as_flag() {
        *flag = Some(value);
    }
}
