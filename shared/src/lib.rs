use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod slots;

/// Confirmation lifecycle of a booking. `Pending -> Confirmed` happens exactly
/// once via the PIN handshake; `Cancelled` is set by administrative tooling
/// outside this core and is only ever read here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationState {
    Pending,
    Confirmed,
    Cancelled,
}

impl ConfirmationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationState::Pending => "Pending",
            ConfirmationState::Confirmed => "Confirmed",
            ConfirmationState::Cancelled => "Cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(ConfirmationState::Pending),
            "Confirmed" => Some(ConfirmationState::Confirmed),
            "Cancelled" => Some(ConfirmationState::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentState {
    Unpaid,
    Partial,
    Paid,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Unpaid => "Unpaid",
            PaymentState::Partial => "Partial",
            PaymentState::Paid => "Paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Unpaid" => Some(PaymentState::Unpaid),
            "Partial" => Some(PaymentState::Partial),
            "Paid" => Some(PaymentState::Paid),
            _ => None,
        }
    }

    /// Recomputes the payment state from the amounts. `Paid` iff
    /// `paid + discount == total`; `Partial` iff some but not all of the
    /// remainder has been collected; `Unpaid` otherwise.
    pub fn derive(total: &BigDecimal, paid: &BigDecimal, discount: &BigDecimal) -> Self {
        let zero = BigDecimal::from(0);
        if paid + discount == *total {
            PaymentState::Paid
        } else if *paid > zero && *paid < total - discount {
            PaymentState::Partial
        } else {
            PaymentState::Unpaid
        }
    }
}

/// What is still owed on a booking: `total - paid - discount`.
pub fn remaining_amount(total: &BigDecimal, paid: &BigDecimal, discount: &BigDecimal) -> BigDecimal {
    total - paid - discount
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipientKind {
    Customer,
    Provider,
}

impl RecipientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientKind::Customer => "Customer",
            RecipientKind::Provider => "Provider",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    BookingCreated,
    BookingConfirmed,
    NewServiceAdded,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingCreated => "BookingCreated",
            NotificationKind::BookingConfirmed => "BookingConfirmed",
            NotificationKind::NewServiceAdded => "NewServiceAdded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "BookingCreated" => Some(NotificationKind::BookingCreated),
            "BookingConfirmed" => Some(NotificationKind::BookingConfirmed),
            "NewServiceAdded" => Some(NotificationKind::NewServiceAdded),
            _ => None,
        }
    }
}

/// Outbox payload written by the ledger alongside booking mutations. The
/// dispatcher turns these into notification rows after the transaction has
/// committed, so delivery can never unwind a booking write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingEvent {
    pub booking_id: Uuid,
    pub customer_ref: String,
    pub provider_ref: String,
    pub service: String,
    pub date: NaiveDate,
    pub time: String,
}

/// Outbox payload for catalogue announcements. Nothing in this core emits it;
/// the service-listing collaborator appends these rows directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAnnouncement {
    pub service_ref: String,
    pub recipient_ref: String,
}
