use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::QuoteError;
use crate::types::PaymentPhase;

/// Quote lifecycle: pending -> approved -> deposit_paid -> completed,
/// with cancellation allowed until money has been taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Pending,
    Approved,
    DepositPaid,
    Completed,
    Cancelled,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Pending => "pending",
            QuoteStatus::Approved => "approved",
            QuoteStatus::DepositPaid => "deposit_paid",
            QuoteStatus::Completed => "completed",
            QuoteStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        use QuoteStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Approved, DepositPaid)
                | (DepositPaid, Completed)
                | (Pending, Cancelled)
                | (Approved, Cancelled)
        )
    }

    pub fn transition(self, next: QuoteStatus) -> Result<QuoteStatus, QuoteError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(QuoteError::InvalidTransition { from: self, to: next })
        }
    }

    /// Which charge a customer owes in this status
    pub fn expected_phase(&self) -> Option<PaymentPhase> {
        match self {
            QuoteStatus::Approved => Some(PaymentPhase::Deposit),
            QuoteStatus::DepositPaid => Some(PaymentPhase::Balance),
            _ => None,
        }
    }

    /// Status reached once the given phase has been paid
    pub fn after_payment(phase: PaymentPhase) -> QuoteStatus {
        match phase {
            PaymentPhase::Deposit => QuoteStatus::DepositPaid,
            PaymentPhase::Balance => QuoteStatus::Completed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QuoteStatus::Completed | QuoteStatus::Cancelled)
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QuoteStatus::Pending),
            "approved" => Ok(QuoteStatus::Approved),
            "deposit_paid" => Ok(QuoteStatus::DepositPaid),
            "completed" => Ok(QuoteStatus::Completed),
            "cancelled" => Ok(QuoteStatus::Cancelled),
            other => Err(format!("unknown quote status '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use QuoteStatus::*;

    const ALL: [QuoteStatus; 5] = [Pending, Approved, DepositPaid, Completed, Cancelled];

    #[test]
    fn happy_path_is_linear() {
        let status = Pending.transition(Approved).unwrap();
        let status = status.transition(DepositPaid).unwrap();
        let status = status.transition(Completed).unwrap();
        assert!(status.is_terminal());
    }

    #[test]
    fn only_listed_transitions_are_allowed() {
        let allowed = [
            (Pending, Approved),
            (Approved, DepositPaid),
            (DepositPaid, Completed),
            (Pending, Cancelled),
            (Approved, Cancelled),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn cannot_skip_deposit_or_cancel_after_payment() {
        assert!(matches!(
            Approved.transition(Completed),
            Err(QuoteError::InvalidTransition { from: Approved, to: Completed })
        ));
        assert!(DepositPaid.transition(Cancelled).is_err());
        assert!(Completed.transition(Pending).is_err());
    }

    #[test]
    fn payment_phase_follows_status() {
        assert_eq!(Approved.expected_phase(), Some(PaymentPhase::Deposit));
        assert_eq!(DepositPaid.expected_phase(), Some(PaymentPhase::Balance));
        assert_eq!(Pending.expected_phase(), None);
        assert_eq!(QuoteStatus::after_payment(PaymentPhase::Deposit), DepositPaid);
        assert_eq!(QuoteStatus::after_payment(PaymentPhase::Balance), Completed);
    }

    #[test]
    fn parses_wire_names() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<QuoteStatus>().unwrap(), status);
        }
        assert!("paid".parse::<QuoteStatus>().is_err());
    }
}
