//! Crowd-sourced capability derivation for payment terminals.
//!
//! Users report attempts against a terminal: what they tried, which card
//! network, which verification method, whether it worked. This crate folds
//! that append-only, unordered history into the terminal's current believed
//! state:
//!
//! - **Flags** (contactless, Apple Pay, Google Pay, HCE, DCC, EDC): latest
//!   decisive attempt wins; no evidence keeps the stored value
//! - **Sets** (card networks, acquiring modes): rebuilt per sub-key on every
//!   pass; no evidence means empty
//! - **Verification** (no-PIN, PIN, signature): tri-state plus per-network
//!   support; no evidence means `Unknown`
//! - **Descriptive fields and status**: latest attempt carrying a value wins,
//!   whatever its result
//! - **Success rate**: terminals whose attempts mostly fail are demoted
//!
//! Everything here is pure and synchronous. Persistence and orchestration
//! live in `terminal-refresh`.
//!
//! # Example
//!
//! ```
//! use terminal_capability::{reconcile_terminal, Attempt, PaymentMethod, Terminal};
//!
//! let terminal = Terminal::new("terminal-1");
//! let attempts = vec![Attempt::success("terminal-1").with_payment_method(PaymentMethod::Tap)];
//!
//! let snapshot = reconcile_terminal(&terminal, &attempts);
//! assert_eq!(snapshot.capabilities.contactless, Some(true));
//! ```

pub mod evidence;
pub mod fold;
pub mod reconcile;
pub mod rules;
pub mod success_rate;
pub mod types;

// Re-export main types
pub use evidence::{is_decisive, newest_first};
pub use fold::{latest_by_key, resolve, Resolution};
pub use reconcile::{reconcile_terminal, reconcile_terminal_with};
pub use rules::{Dimension, MergePolicy, Probe, Rule, RULES};
pub use success_rate::{evaluate_success_rate, SuccessRateAssessment, SuccessRatePolicy};
pub use types::*;
