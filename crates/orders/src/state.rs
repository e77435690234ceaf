//! Order state machine.
//!
//! Two tracks share one enum: the on-delivery track (`CREATED` …) and the
//! online-payment track (`NC_*`). No transition crosses tracks.

use serde::{Deserialize, Serialize};

use stockcart_core::DomainError;

/// How the customer pays; picks the initial state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    OnDelivery,
    Online,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::OnDelivery => "on_delivery",
            PaymentKind::Online => "online",
        }
    }
}

impl core::str::FromStr for PaymentKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_delivery" => Ok(PaymentKind::OnDelivery),
            "online" => Ok(PaymentKind::Online),
            other => Err(DomainError::validation(format!(
                "unknown payment kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Created,
    Confirmed,
    Declined,
    Shipped,
    Delivered,
    Rejected,
    NcCreated,
    NcPaid,
    NcPayError,
    NcConfirmed,
    NcDeclined,
    NcShipped,
    NcDelivered,
    NcRejected,
}

impl OrderState {
    pub const ALL: [OrderState; 14] = [
        OrderState::Created,
        OrderState::Confirmed,
        OrderState::Declined,
        OrderState::Shipped,
        OrderState::Delivered,
        OrderState::Rejected,
        OrderState::NcCreated,
        OrderState::NcPaid,
        OrderState::NcPayError,
        OrderState::NcConfirmed,
        OrderState::NcDeclined,
        OrderState::NcShipped,
        OrderState::NcDelivered,
        OrderState::NcRejected,
    ];

    pub fn initial(kind: PaymentKind) -> Self {
        match kind {
            PaymentKind::OnDelivery => OrderState::Created,
            PaymentKind::Online => OrderState::NcCreated,
        }
    }

    pub fn allowed_transitions(&self) -> &'static [OrderState] {
        use OrderState::*;
        match self {
            Created => &[Confirmed, Declined],
            Confirmed => &[Shipped],
            Shipped => &[Delivered, Rejected],
            NcCreated => &[NcPaid, NcPayError],
            NcPaid => &[NcConfirmed, NcDeclined],
            NcConfirmed => &[NcShipped],
            NcShipped => &[NcDelivered, NcRejected],
            Declined | Delivered | Rejected | NcPayError | NcDeclined | NcDelivered
            | NcRejected => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Terminal states in which the order was abandoned.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            OrderState::Declined
                | OrderState::Rejected
                | OrderState::NcPayError
                | OrderState::NcDeclined
                | OrderState::NcRejected
        )
    }

    /// Unreduced lines of orders in these states count against stock.
    ///
    /// Everything except the failure states: the online track never consumes
    /// batches, so its lines keep holding stock until the order fails.
    pub fn holds_reservation(&self) -> bool {
        !self.is_failed()
    }

    /// The one transition that consumes stock batches.
    pub fn triggers_stock_reduction(from: OrderState, to: OrderState) -> bool {
        from == OrderState::Created && to == OrderState::Confirmed
    }

    pub fn reserving() -> impl Iterator<Item = OrderState> {
        Self::ALL.into_iter().filter(OrderState::holds_reservation)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "CREATED",
            OrderState::Confirmed => "CONFIRMED",
            OrderState::Declined => "DECLINED",
            OrderState::Shipped => "SHIPPED",
            OrderState::Delivered => "DELIVERED",
            OrderState::Rejected => "REJECTED",
            OrderState::NcCreated => "NC_CREATED",
            OrderState::NcPaid => "NC_PAID",
            OrderState::NcPayError => "NC_PAY_ERROR",
            OrderState::NcConfirmed => "NC_CONFIRMED",
            OrderState::NcDeclined => "NC_DECLINED",
            OrderState::NcShipped => "NC_SHIPPED",
            OrderState::NcDelivered => "NC_DELIVERED",
            OrderState::NcRejected => "NC_REJECTED",
        }
    }
}

impl core::fmt::Display for OrderState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown order state '{s}'")))
    }
}
