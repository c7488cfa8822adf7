use bigdecimal::{BigDecimal, RoundingMode};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_traits::FromPrimitive;
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use shared::slots::{self, Slot, DEFAULT_DURATION_MINUTES, DEFAULT_STEP_MINUTES};
use shared::{BookingEvent, ConfirmationState, NotificationKind, PaymentState};

use crate::error::ServiceError;
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

const PIN_LENGTH: usize = 6;

/// Payments arrive as floats; settle on two decimal places before any
/// arithmetic so the `Paid` equality check stays reachable.
fn parse_payment_amount(amount: f64) -> Result<BigDecimal, ServiceError> {
    let amount = BigDecimal::from_f64(amount)
        .ok_or(ServiceError::InvalidAmount)?
        .with_scale_round(2, RoundingMode::HalfUp);
    if amount <= BigDecimal::from(0) {
        return Err(ServiceError::InvalidAmount);
    }
    Ok(amount)
}

fn generate_pin() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PIN_LENGTH)
        .map(char::from)
        .collect()
}

fn booking_event(kind: NotificationKind, booking: &Booking) -> Result<NewOutboxEvent, ServiceError> {
    let payload = BookingEvent {
        booking_id: booking.id,
        customer_ref: booking.customer_ref.clone(),
        provider_ref: booking.provider_ref.clone(),
        service: booking.service.clone(),
        date: booking.date,
        time: booking.time.clone(),
    };
    let event_data = serde_json::to_value(&payload)
        .map_err(|e| ServiceError::Unavailable(format!("failed to encode event: {e}")))?;
    Ok(NewOutboxEvent {
        id: Uuid::new_v4(),
        aggregate_id: booking.id,
        event_type: kind.as_str().to_string(),
        event_data,
    })
}

/// Authoritative store of bookings. All writes to one booking go through a
/// `FOR UPDATE` row lock inside a single transaction, so confirmation,
/// payments and complaints on the same id never interleave.
pub struct BookingLedger {
    pool: DbPool,
}

impl BookingLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(
        &self,
    ) -> Result<diesel_async::pooled_connection::bb8::PooledConnection<'_, AsyncPgConnection>, ServiceError>
    {
        self.pool
            .get()
            .await
            .map_err(|e| ServiceError::Unavailable(e.to_string()))
    }

    /// Creates a `Pending`/`Unpaid` booking and queues the `BookingCreated`
    /// event in the same transaction. The returned booking carries the PIN;
    /// the caller relays it out-of-band for the confirmation handshake.
    pub async fn create_booking(&self, draft: BookingDraft) -> Result<Booking, ServiceError> {
        let booking = Booking::from_draft(draft, generate_pin())?;
        let event = booking_event(NotificationKind::BookingCreated, &booking)?;

        let mut conn = self.conn().await?;
        let inserted = booking.clone();
        conn.transaction::<_, ServiceError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(bookings::table)
                    .values(&inserted)
                    .execute(conn)
                    .await?;

                diesel::insert_into(outbox_events::table)
                    .values(&event)
                    .execute(conn)
                    .await?;

                Ok(())
            })
        })
        .await?;

        info!(
            "Booking {} created for {} on {} {}",
            booking.id, booking.provider_ref, booking.date, booking.time
        );
        Ok(booking)
    }

    /// PIN confirmation handshake. Idempotent once confirmed; a wrong PIN
    /// fails without touching the row. The `BookingConfirmed` event is queued
    /// only on the actual `Pending -> Confirmed` transition.
    pub async fn confirm_booking(
        &self,
        booking_id: Uuid,
        supplied_pin: String,
    ) -> Result<Booking, ServiceError> {
        let mut conn = self.conn().await?;
        let booking = conn
            .transaction::<_, ServiceError, _>(|conn| {
                Box::pin(async move {
                    let mut booking = bookings::table
                        .find(booking_id)
                        .for_update()
                        .first::<Booking>(conn)
                        .await
                        .optional()?
                        .ok_or(ServiceError::NotFound)?;

                    if booking.confirm(&supplied_pin)? {
                        diesel::update(bookings::table.find(booking_id))
                            .set((
                                bookings::confirmation_state.eq(&booking.confirmation_state),
                                bookings::updated_at.eq(booking.updated_at),
                            ))
                            .execute(conn)
                            .await?;

                        let event = booking_event(NotificationKind::BookingConfirmed, &booking)?;
                        diesel::insert_into(outbox_events::table)
                            .values(&event)
                            .execute(conn)
                            .await?;

                        info!("Booking {} confirmed", booking.id);
                    }

                    Ok(booking)
                })
            })
            .await?;

        Ok(booking)
    }

    /// Posts an incremental payment. When the payment would complete the
    /// booking, a conflicting already-`Paid` booking on the same
    /// provider/service/date/time aborts with `SlotConflict` before anything
    /// is persisted. Payments are silent: no notification is queued.
    pub async fn collect_payment(
        &self,
        booking_id: Uuid,
        amount: f64,
    ) -> Result<Booking, ServiceError> {
        let amount = parse_payment_amount(amount)?;

        let mut conn = self.conn().await?;
        let booking = conn
            .transaction::<_, ServiceError, _>(|conn| {
                Box::pin(async move {
                    let mut booking = bookings::table
                        .find(booking_id)
                        .for_update()
                        .first::<Booking>(conn)
                        .await
                        .optional()?
                        .ok_or(ServiceError::NotFound)?;

                    let new_state = booking.apply_payment(&amount)?;

                    if new_state == PaymentState::Paid {
                        // Gives the sequential caller a clean error; under a
                        // concurrent race both sides can pass this read and
                        // the bookings_paid_slot_uniq index rejects the
                        // second commit (mapped to SlotConflict in error.rs).
                        let conflict = bookings::table
                            .filter(bookings::provider_ref.eq(&booking.provider_ref))
                            .filter(bookings::service.eq(&booking.service))
                            .filter(bookings::date.eq(booking.date))
                            .filter(bookings::time.eq(&booking.time))
                            .filter(bookings::payment_state.eq(PaymentState::Paid.as_str()))
                            .filter(
                                bookings::confirmation_state
                                    .ne(ConfirmationState::Cancelled.as_str()),
                            )
                            .filter(bookings::id.ne(booking.id))
                            .select(bookings::id)
                            .first::<Uuid>(conn)
                            .await
                            .optional()?;
                        if conflict.is_some() {
                            return Err(ServiceError::SlotConflict);
                        }
                    }

                    diesel::update(bookings::table.find(booking_id))
                        .set((
                            bookings::amount_paid.eq(&booking.amount_paid),
                            bookings::payment_state.eq(&booking.payment_state),
                            bookings::updated_at.eq(booking.updated_at),
                        ))
                        .execute(conn)
                        .await?;

                    info!(
                        "Payment posted on booking {}: paid {} of {}",
                        booking.id, booking.amount_paid, booking.total_amount
                    );
                    Ok(booking)
                })
            })
            .await?;

        Ok(booking)
    }

    /// Stores the provider's complaint text. Calling it again overwrites the
    /// previous complaint; there is no one-shot lock.
    pub async fn submit_complaint(
        &self,
        booking_id: Uuid,
        text: String,
    ) -> Result<Booking, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::EmptyComplaint);
        }

        let mut conn = self.conn().await?;
        let booking = conn
            .transaction::<_, ServiceError, _>(|conn| {
                Box::pin(async move {
                    let mut booking = bookings::table
                        .find(booking_id)
                        .for_update()
                        .first::<Booking>(conn)
                        .await
                        .optional()?
                        .ok_or(ServiceError::NotFound)?;

                    booking.set_complaint(&text)?;
                    diesel::update(bookings::table.find(booking_id))
                        .set((
                            bookings::complaint.eq(&booking.complaint),
                            bookings::updated_at.eq(booking.updated_at),
                        ))
                        .execute(conn)
                        .await?;

                    Ok(booking)
                })
            })
            .await?;

        Ok(booking)
    }
}

/// Read-only view on the provider directory. Working hours are seeded by an
/// external system; this core never writes the table.
pub struct ProviderDirectory {
    pool: DbPool,
}

impl ProviderDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn working_hours(
        &self,
        provider_ref: &str,
    ) -> Result<Option<ProviderHours>, ServiceError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Unavailable(e.to_string()))?;
        let hours = provider_hours::table
            .find(provider_ref)
            .first::<ProviderHours>(&mut conn)
            .await
            .optional()?;
        Ok(hours)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityQuery {
    pub service: String,
    pub date: String,
    pub duration_minutes: Option<i32>,
    pub favorite_employee: Option<String>,
}

/// Composes the provider directory, the slot grid and the ledger to answer
/// "what can be booked now". Read-only and idempotent; deliberately not
/// serialized against concurrent booking creation (only `Paid` bookings
/// occupy slots, the payment path holds the conflict guard).
pub struct AvailabilityEngine {
    directory: ProviderDirectory,
    pool: DbPool,
}

impl AvailabilityEngine {
    pub fn new(pool: DbPool) -> Self {
        Self {
            directory: ProviderDirectory::new(pool.clone()),
            pool,
        }
    }

    pub async fn available_slots(
        &self,
        provider_ref: &str,
        query: &AvailabilityQuery,
    ) -> Result<Vec<String>, ServiceError> {
        if provider_ref.trim().is_empty() || query.service.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "provider and service must not be empty".to_string(),
            ));
        }
        let duration = query
            .duration_minutes
            .unwrap_or(DEFAULT_DURATION_MINUTES as i32);
        if duration < 1 {
            return Err(ServiceError::InvalidRequest(
                "duration must be at least one minute".to_string(),
            ));
        }
        let date = normalize_date(&query.date)?;

        let hours = self
            .directory
            .working_hours(provider_ref)
            .await?
            .ok_or(ServiceError::ProviderUnavailable)?;
        let open = slots::parse_minute_of_day(&hours.open_time)?;
        let close = slots::parse_minute_of_day(&hours.close_time)?;
        let grid = slots::slot_grid(open, close, DEFAULT_STEP_MINUTES)?;

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ServiceError::Unavailable(e.to_string()))?;
        let mut occupied_query = bookings::table
            .filter(bookings::provider_ref.eq(provider_ref))
            .filter(bookings::service.eq(&query.service))
            .filter(bookings::date.eq(date))
            .filter(bookings::payment_state.eq(PaymentState::Paid.as_str()))
            .filter(bookings::confirmation_state.ne(ConfirmationState::Cancelled.as_str()))
            .into_boxed();
        if let Some(employee) = &query.favorite_employee {
            occupied_query = occupied_query.filter(bookings::favorite_employee.eq(employee));
        }
        let paid_bookings = occupied_query.load::<Booking>(&mut conn).await?;

        let mut occupied = Vec::with_capacity(paid_bookings.len());
        for booking in &paid_bookings {
            occupied.push(booking.occupied_interval()?);
        }

        Ok(slots::free_slots(&grid, duration as u32, &occupied)
            .iter()
            .map(Slot::label)
            .collect())
    }
}

/// Read side of the notification collaborator contract. Only `is_read`
/// mutates after creation.
pub struct NotificationStore {
    pool: DbPool,
}

impl NotificationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(
        &self,
    ) -> Result<diesel_async::pooled_connection::bb8::PooledConnection<'_, AsyncPgConnection>, ServiceError>
    {
        self.pool
            .get()
            .await
            .map_err(|e| ServiceError::Unavailable(e.to_string()))
    }

    pub async fn list(&self, recipient_ref: &str) -> Result<Vec<Notification>, ServiceError> {
        let mut conn = self.conn().await?;
        let rows = notifications::table
            .filter(notifications::recipient_ref.eq(recipient_ref))
            .order(notifications::created_at.desc())
            .load::<Notification>(&mut conn)
            .await?;
        Ok(rows)
    }

    pub async fn unread_count(&self, recipient_ref: &str) -> Result<i64, ServiceError> {
        let mut conn = self.conn().await?;
        let count = notifications::table
            .filter(notifications::recipient_ref.eq(recipient_ref))
            .filter(notifications::is_read.eq(false))
            .count()
            .get_result::<i64>(&mut conn)
            .await?;
        Ok(count)
    }

    pub async fn mark_read(&self, notification_id: Uuid) -> Result<(), ServiceError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(notifications::table.find(notification_id))
            .set(notifications::is_read.eq(true))
            .execute(&mut conn)
            .await?;
        if updated == 0 {
            return Err(ServiceError::NotFound);
        }
        Ok(())
    }
}
