//! Swap statuses, legal transitions and the user-facing status projection

use crate::assets::AssetRegistry;

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Swap;

/// Number of coarse progress steps shown for a swap
pub const TOTAL_STEPS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Initiated,
    InitiationReported,
    InitiationConfirmed,
    Funded,
    ConfirmCounterPartyInitiation,
    ReadyToClaim,
    WaitingForClaimConfirmations,
    WaitingForRefund,
    GetRefund,
    WaitingForRefundConfirmations,
    Refunded,
    Success,
    QuoteExpired,
}

impl SwapStatus {
    pub const ALL: [SwapStatus; 13] = [
        SwapStatus::Initiated,
        SwapStatus::InitiationReported,
        SwapStatus::InitiationConfirmed,
        SwapStatus::Funded,
        SwapStatus::ConfirmCounterPartyInitiation,
        SwapStatus::ReadyToClaim,
        SwapStatus::WaitingForClaimConfirmations,
        SwapStatus::WaitingForRefund,
        SwapStatus::GetRefund,
        SwapStatus::WaitingForRefundConfirmations,
        SwapStatus::Refunded,
        SwapStatus::Success,
        SwapStatus::QuoteExpired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Initiated => "INITIATED",
            SwapStatus::InitiationReported => "INITIATION_REPORTED",
            SwapStatus::InitiationConfirmed => "INITIATION_CONFIRMED",
            SwapStatus::Funded => "FUNDED",
            SwapStatus::ConfirmCounterPartyInitiation => "CONFIRM_COUNTER_PARTY_INITIATION",
            SwapStatus::ReadyToClaim => "READY_TO_CLAIM",
            SwapStatus::WaitingForClaimConfirmations => "WAITING_FOR_CLAIM_CONFIRMATIONS",
            SwapStatus::WaitingForRefund => "WAITING_FOR_REFUND",
            SwapStatus::GetRefund => "GET_REFUND",
            SwapStatus::WaitingForRefundConfirmations => "WAITING_FOR_REFUND_CONFIRMATIONS",
            SwapStatus::Refunded => "REFUNDED",
            SwapStatus::Success => "SUCCESS",
            SwapStatus::QuoteExpired => "QUOTE_EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::Success | SwapStatus::Refunded | SwapStatus::QuoteExpired
        )
    }

    /// Statuses whose handler only watches the chain and may be throttled
    pub fn is_polling(&self) -> bool {
        matches!(
            self,
            SwapStatus::InitiationReported
                | SwapStatus::Funded
                | SwapStatus::ConfirmCounterPartyInitiation
                | SwapStatus::WaitingForClaimConfirmations
                | SwapStatus::WaitingForRefund
                | SwapStatus::WaitingForRefundConfirmations
        )
    }

    /// Whether a handler in `self` may move the swap to `next`
    pub fn can_transition_to(&self, next: SwapStatus) -> bool {
        use SwapStatus::*;

        let refund_branch = matches!(next, GetRefund | WaitingForRefund);
        match self {
            Initiated => matches!(next, InitiationReported | WaitingForRefund),
            InitiationReported => {
                matches!(next, InitiationConfirmed | ConfirmCounterPartyInitiation) || refund_branch
            }
            InitiationConfirmed => matches!(next, Funded | QuoteExpired),
            Funded => next == ConfirmCounterPartyInitiation || refund_branch,
            ConfirmCounterPartyInitiation => next == ReadyToClaim || refund_branch,
            ReadyToClaim => next == WaitingForClaimConfirmations || refund_branch,
            WaitingForClaimConfirmations => next == Success || refund_branch,
            WaitingForRefund => next == GetRefund,
            GetRefund => next == WaitingForRefundConfirmations,
            WaitingForRefundConfirmations => next == Refunded,
            Refunded | Success | QuoteExpired => false,
        }
    }

    pub fn descriptor(&self) -> StatusDescriptor {
        use SwapStatus::*;

        let pending = FilterStatus::Pending;
        let (step, label, filter_status, notification) = match self {
            Initiated => (0, "Locking {from}", pending, None),
            InitiationReported => (0, "Locking {from}", pending, Some(NotificationKind::Initiated)),
            InitiationConfirmed => (0, "Locking {from}", pending, None),
            Funded => (1, "Locking {to}", pending, None),
            ConfirmCounterPartyInitiation => (
                1,
                "Locking {to}",
                pending,
                Some(NotificationKind::CounterPartyLocked),
            ),
            ReadyToClaim => (2, "Claiming {to}", pending, Some(NotificationKind::Claiming)),
            WaitingForClaimConfirmations => (2, "Claiming {to}", pending, None),
            WaitingForRefund => (2, "Pending Refund", pending, None),
            GetRefund => (2, "Refunding {from}", pending, None),
            WaitingForRefundConfirmations => (2, "Refunding {from}", pending, None),
            Refunded => (3, "Refunded", FilterStatus::Refunded, Some(NotificationKind::Refunded)),
            Success => (3, "Completed", FilterStatus::Completed, Some(NotificationKind::Completed)),
            QuoteExpired => (3, "Quote Expired", FilterStatus::Refunded, None),
        };

        StatusDescriptor {
            step,
            label,
            filter_status,
            notification,
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SwapStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SwapStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown swap status {}", s))
    }
}

/// Coarse status used to filter swap lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterStatus {
    Pending,
    Completed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotificationKind {
    Initiated,
    CounterPartyLocked,
    Claiming,
    Refunded,
    Completed,
}

/// A user notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

/// How a status is presented to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDescriptor {
    pub step: u8,
    label: &'static str,
    pub filter_status: FilterStatus,
    notification: Option<NotificationKind>,
}

impl StatusDescriptor {
    /// Label with asset placeholders filled in
    pub fn label(&self, swap: &Swap) -> String {
        self.label.replace("{from}", &swap.from).replace("{to}", &swap.to)
    }

    /// Message shown when a swap enters this status
    pub fn notification(&self, swap: &Swap, assets: &AssetRegistry) -> Option<Notification> {
        let message = match self.notification? {
            NotificationKind::Initiated => "Swap initiated".to_string(),
            NotificationKind::CounterPartyLocked => format!(
                "Counterparty sent {} {} to escrow",
                assets.pretty_amount(&swap.to, swap.to_amount),
                swap.to
            ),
            NotificationKind::Claiming => format!("Claiming {}", swap.to),
            NotificationKind::Refunded => format!(
                "Swap refunded, {} {} returned",
                assets.pretty_amount(&swap.from, swap.from_amount),
                swap.from
            ),
            NotificationKind::Completed => format!(
                "Swap completed, {} {} ready to use",
                assets.pretty_amount(&swap.to, swap.to_amount),
                swap.to
            ),
        };

        Some(Notification {
            title: format!("Swap {} to {}", swap.from, swap.to),
            message,
        })
    }
}
