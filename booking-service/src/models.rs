use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use shared::slots::{self, SlotError, DEFAULT_DURATION_MINUTES};
use shared::{ConfirmationState, PaymentState};
use uuid::Uuid;

use crate::error::ServiceError;

/// Incoming booking request as posted by the caller. Pricing is supplied by
/// the (trusted) caller; this core only checks it is internally consistent.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingDraft {
    pub customer_ref: String,
    pub provider_ref: String,
    pub service: String,
    pub style_variant: Option<String>,
    pub favorite_employee: Option<String>,
    pub date: String,
    pub time: String,
    pub duration_minutes: Option<i32>,
    pub total_amount: f64,
    pub discount_amount: Option<f64>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize)]
#[diesel(table_name = crate::schema::bookings)]
pub struct Booking {
    pub id: Uuid,
    pub customer_ref: String,
    pub provider_ref: String,
    pub service: String,
    pub style_variant: Option<String>,
    pub favorite_employee: Option<String>,
    pub date: NaiveDate,
    pub time: String,
    pub duration_minutes: i32,
    pub pin: String,
    pub confirmation_state: String,
    pub total_amount: BigDecimal,
    pub amount_paid: BigDecimal,
    pub discount_amount: BigDecimal,
    pub payment_state: String,
    pub complaint: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Validates a draft and builds the initial `Pending`/`Unpaid` record.
    /// The PIN is generated by the ledger and relayed out-of-band.
    pub fn from_draft(draft: BookingDraft, pin: String) -> Result<Self, ServiceError> {
        for (field, value) in [
            ("customer_ref", &draft.customer_ref),
            ("provider_ref", &draft.provider_ref),
            ("service", &draft.service),
            ("time", &draft.time),
        ] {
            if value.trim().is_empty() {
                return Err(ServiceError::InvalidRequest(format!(
                    "{field} must not be empty"
                )));
            }
        }

        let duration = draft
            .duration_minutes
            .unwrap_or(DEFAULT_DURATION_MINUTES as i32);
        if duration < 1 {
            return Err(ServiceError::InvalidRequest(
                "duration must be at least one minute".to_string(),
            ));
        }

        let date = normalize_date(&draft.date)?;
        slots::parse_label_start(&draft.time)?;

        let total_amount = parse_amount(draft.total_amount, "total_amount")?;
        let discount_amount = match draft.discount_amount {
            Some(value) => parse_amount(value, "discount_amount")?,
            None => BigDecimal::from(0),
        };
        if total_amount < discount_amount {
            return Err(ServiceError::InvalidRequest(
                "total_amount must not be less than discount_amount".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Booking {
            id: Uuid::new_v4(),
            customer_ref: draft.customer_ref,
            provider_ref: draft.provider_ref,
            service: draft.service,
            style_variant: draft.style_variant,
            favorite_employee: draft.favorite_employee,
            date,
            time: draft.time,
            duration_minutes: duration,
            pin,
            confirmation_state: ConfirmationState::Pending.as_str().to_string(),
            total_amount,
            amount_paid: BigDecimal::from(0),
            discount_amount,
            payment_state: PaymentState::Unpaid.as_str().to_string(),
            complaint: None,
            created_at: Some(now),
            updated_at: Some(now),
        })
    }

    pub fn confirmation_state(&self) -> ConfirmationState {
        ConfirmationState::parse(&self.confirmation_state).unwrap_or(ConfirmationState::Pending)
    }

    pub fn payment_state(&self) -> PaymentState {
        PaymentState::parse(&self.payment_state).unwrap_or(PaymentState::Unpaid)
    }

    /// PIN handshake. Exact string match, no normalization. Returns `false`
    /// when the booking was already confirmed (idempotent retry).
    pub fn confirm(&mut self, supplied_pin: &str) -> Result<bool, ServiceError> {
        match self.confirmation_state() {
            ConfirmationState::Confirmed => Ok(false),
            ConfirmationState::Cancelled => Err(ServiceError::InvalidRequest(
                "booking has been cancelled".to_string(),
            )),
            ConfirmationState::Pending => {
                if supplied_pin != self.pin {
                    return Err(ServiceError::InvalidPin);
                }
                self.confirmation_state = ConfirmationState::Confirmed.as_str().to_string();
                self.updated_at = Some(Utc::now());
                Ok(true)
            }
        }
    }

    /// Posts a payment and recomputes the payment state. The caller holds the
    /// row lock; the slot-conflict check on reaching `Paid` is the ledger's.
    pub fn apply_payment(&mut self, amount: &BigDecimal) -> Result<PaymentState, ServiceError> {
        if *amount <= BigDecimal::from(0) {
            return Err(ServiceError::InvalidAmount);
        }
        let remaining = shared::remaining_amount(
            &self.total_amount,
            &self.amount_paid,
            &self.discount_amount,
        );
        if *amount > remaining {
            return Err(ServiceError::ExceedsRemaining);
        }
        self.amount_paid = &self.amount_paid + amount;
        let state = PaymentState::derive(
            &self.total_amount,
            &self.amount_paid,
            &self.discount_amount,
        );
        self.payment_state = state.as_str().to_string();
        self.updated_at = Some(Utc::now());
        Ok(state)
    }

    /// Sets the provider's complaint. A second call silently overwrites the
    /// first; the source behaves this way and it is preserved as documented.
    pub fn set_complaint(&mut self, text: &str) -> Result<(), ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::EmptyComplaint);
        }
        self.complaint = Some(text.to_string());
        self.updated_at = Some(Utc::now());
        Ok(())
    }

    /// The `[start, start + duration)` interval this booking occupies, in
    /// minutes of day.
    pub fn occupied_interval(&self) -> Result<(u32, u32), SlotError> {
        let start = slots::parse_label_start(&self.time)?;
        Ok((start, start + self.duration_minutes as u32))
    }
}

fn parse_amount(value: f64, field: &str) -> Result<BigDecimal, ServiceError> {
    // Floats round to two decimal places at ingestion; carrying the binary
    // expansion of e.g. 0.1 would make the Paid equality unreachable.
    let amount = BigDecimal::from_f64(value)
        .ok_or_else(|| ServiceError::InvalidRequest(format!("{field} is not a valid amount")))?
        .with_scale_round(2, RoundingMode::HalfUp);
    if amount < BigDecimal::from(0) {
        return Err(ServiceError::InvalidRequest(format!(
            "{field} must not be negative"
        )));
    }
    Ok(amount)
}

/// Normalizes a caller-supplied date to a plain calendar date. RFC 3339
/// timestamps are accepted and their time-of-day discarded.
pub fn normalize_date(raw: &str) -> Result<NaiveDate, ServiceError> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(timestamp.date_naive());
    }
    Err(ServiceError::InvalidRequest(format!(
        "unparsable date: {raw:?}"
    )))
}

#[derive(Debug, Clone, Queryable, Serialize)]
#[diesel(table_name = crate::schema::notifications)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_ref: String,
    pub recipient_kind: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub booking_ref: Option<Uuid>,
    pub service_ref: Option<String>,
    pub is_read: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub recipient_ref: String,
    pub recipient_kind: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub booking_ref: Option<Uuid>,
    pub service_ref: Option<String>,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

/// A row of the read-only provider directory.
#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::provider_hours)]
pub struct ProviderHours {
    pub provider_ref: String,
    pub open_time: String,
    pub close_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> BookingDraft {
        BookingDraft {
            customer_ref: "customer-1".to_string(),
            provider_ref: "provider-1".to_string(),
            service: "HairCut".to_string(),
            style_variant: None,
            favorite_employee: None,
            date: "2024-05-01".to_string(),
            time: "09:00-10:00".to_string(),
            duration_minutes: Some(60),
            total_amount: 1000.0,
            discount_amount: Some(100.0),
        }
    }

    fn booking() -> Booking {
        Booking::from_draft(draft(), "AB12cd".to_string()).unwrap()
    }

    #[test]
    fn draft_builds_pending_unpaid_booking() {
        let booking = booking();
        assert_eq!(booking.confirmation_state(), ConfirmationState::Pending);
        assert_eq!(booking.payment_state(), PaymentState::Unpaid);
        assert_eq!(booking.amount_paid, BigDecimal::from(0));
        assert_eq!(booking.date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(booking.pin, "AB12cd");
    }

    #[test]
    fn draft_rejects_inconsistent_pricing_and_duration() {
        let mut bad = draft();
        bad.total_amount = 50.0;
        bad.discount_amount = Some(100.0);
        assert!(matches!(
            Booking::from_draft(bad, "p".to_string()),
            Err(ServiceError::InvalidRequest(_))
        ));

        let mut bad = draft();
        bad.duration_minutes = Some(0);
        assert!(matches!(
            Booking::from_draft(bad, "p".to_string()),
            Err(ServiceError::InvalidRequest(_))
        ));

        let mut bad = draft();
        bad.customer_ref = "  ".to_string();
        assert!(matches!(
            Booking::from_draft(bad, "p".to_string()),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn duration_defaults_to_sixty_minutes() {
        let mut d = draft();
        d.duration_minutes = None;
        let booking = Booking::from_draft(d, "p".to_string()).unwrap();
        assert_eq!(booking.duration_minutes, 60);
    }

    #[test]
    fn wrong_pin_leaves_booking_pending() {
        let mut booking = booking();
        assert!(matches!(
            booking.confirm("wrong"),
            Err(ServiceError::InvalidPin)
        ));
        assert_eq!(booking.confirmation_state(), ConfirmationState::Pending);
    }

    #[test]
    fn pin_match_is_exact_and_case_sensitive() {
        let mut booking = booking();
        assert!(matches!(
            booking.confirm("ab12cd"),
            Err(ServiceError::InvalidPin)
        ));
        assert!(matches!(
            booking.confirm(" AB12cd"),
            Err(ServiceError::InvalidPin)
        ));
        assert!(booking.confirm("AB12cd").unwrap());
    }

    #[test]
    fn confirm_is_idempotent_after_success() {
        let mut booking = booking();
        assert!(booking.confirm("AB12cd").unwrap());
        assert_eq!(booking.confirmation_state(), ConfirmationState::Confirmed);
        // Retry is a no-op success, even with a now-wrong PIN supplied.
        assert!(!booking.confirm("AB12cd").unwrap());
        assert!(!booking.confirm("anything").unwrap());
        assert_eq!(booking.confirmation_state(), ConfirmationState::Confirmed);
    }

    #[test]
    fn cancelled_booking_cannot_be_confirmed() {
        let mut booking = booking();
        booking.confirmation_state = ConfirmationState::Cancelled.as_str().to_string();
        assert!(matches!(
            booking.confirm("AB12cd"),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn incremental_payments_walk_the_state_machine() {
        // 1000 total, 100 discount: 600 is partial, +300 closes it, +1 fails.
        let mut booking = booking();
        assert_eq!(
            booking.apply_payment(&BigDecimal::from(600)).unwrap(),
            PaymentState::Partial
        );
        assert_eq!(booking.amount_paid, BigDecimal::from(600));
        assert_eq!(
            booking.apply_payment(&BigDecimal::from(300)).unwrap(),
            PaymentState::Paid
        );
        assert_eq!(booking.amount_paid, BigDecimal::from(900));
        assert!(matches!(
            booking.apply_payment(&BigDecimal::from(1)),
            Err(ServiceError::ExceedsRemaining)
        ));
        assert_eq!(booking.payment_state(), PaymentState::Paid);
    }

    #[test]
    fn payment_invariant_holds_after_any_successful_sequence() {
        let mut booking = booking();
        for amount in [1, 399, 200, 300] {
            booking.apply_payment(&BigDecimal::from(amount)).unwrap();
            assert!(
                &booking.amount_paid + &booking.discount_amount <= booking.total_amount,
                "paid + discount exceeded total"
            );
            assert_eq!(
                booking.payment_state(),
                PaymentState::derive(
                    &booking.total_amount,
                    &booking.amount_paid,
                    &booking.discount_amount
                )
            );
        }
        assert_eq!(booking.payment_state(), PaymentState::Paid);
    }

    #[test]
    fn non_positive_payments_are_rejected() {
        let mut booking = booking();
        assert!(matches!(
            booking.apply_payment(&BigDecimal::from(0)),
            Err(ServiceError::InvalidAmount)
        ));
        assert!(matches!(
            booking.apply_payment(&BigDecimal::from(-5)),
            Err(ServiceError::InvalidAmount)
        ));
        assert_eq!(booking.payment_state(), PaymentState::Unpaid);
    }

    #[test]
    fn overpayment_beyond_remainder_is_rejected() {
        let mut booking = booking();
        // Discount already accounts for 100 of the 1000.
        assert!(matches!(
            booking.apply_payment(&BigDecimal::from(901)),
            Err(ServiceError::ExceedsRemaining)
        ));
        assert_eq!(booking.amount_paid, BigDecimal::from(0));
    }

    #[test]
    fn fractional_pricing_rounds_at_ingestion() {
        assert_eq!(
            parse_amount(0.1, "total_amount").unwrap(),
            "0.10".parse::<BigDecimal>().unwrap()
        );
        assert_eq!(
            parse_amount(19.99, "total_amount").unwrap(),
            "19.99".parse::<BigDecimal>().unwrap()
        );
        assert!(matches!(
            parse_amount(-0.01, "discount_amount"),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn fractional_payments_can_reach_paid_exactly() {
        let mut d = draft();
        d.total_amount = 0.3;
        d.discount_amount = None;
        let mut booking = Booking::from_draft(d, "p".to_string()).unwrap();
        let dime = "0.10".parse::<BigDecimal>().unwrap();
        assert_eq!(booking.apply_payment(&dime).unwrap(), PaymentState::Partial);
        assert_eq!(booking.apply_payment(&dime).unwrap(), PaymentState::Partial);
        assert_eq!(booking.apply_payment(&dime).unwrap(), PaymentState::Paid);
        assert!(matches!(
            booking.apply_payment(&dime),
            Err(ServiceError::ExceedsRemaining)
        ));
    }

    #[test]
    fn complaint_overwrites_silently() {
        let mut booking = booking();
        assert!(matches!(
            booking.set_complaint("   "),
            Err(ServiceError::EmptyComplaint)
        ));
        booking.set_complaint("late arrival").unwrap();
        booking.set_complaint("no-show").unwrap();
        assert_eq!(booking.complaint.as_deref(), Some("no-show"));
    }

    #[test]
    fn occupied_interval_uses_label_start_and_duration() {
        let mut booking = booking();
        booking.time = "10:00-11:00".to_string();
        booking.duration_minutes = 90;
        assert_eq!(booking.occupied_interval().unwrap(), (600, 690));
    }

    #[test]
    fn normalize_date_accepts_dates_and_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(normalize_date("2024-05-01").unwrap(), expected);
        // Time-of-day and offset are discarded, not converted.
        assert_eq!(
            normalize_date("2024-05-01T23:30:00+02:00").unwrap(),
            expected
        );
        assert!(normalize_date("May 1st").is_err());
    }
}
