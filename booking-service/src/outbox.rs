use std::time::Duration;

use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use tokio::time;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared::{BookingEvent, NotificationKind, RecipientKind, ServiceAnnouncement};

use crate::models::*;
use crate::schema::*;

type DbPool = Pool<AsyncPgConnection>;

/// Delivery collaborator (outbound email in production). Failures are the
/// sink's problem: the dispatcher logs them and moves on, they never reach
/// the booking caller.
pub trait NotificationSink: Send + Sync + 'static {
    fn deliver(
        &self,
        notification: &NewNotification,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// Default sink: logs what would have been mailed out.
pub struct LogSink;

impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &NewNotification) -> anyhow::Result<()> {
        info!(
            "Delivering {} notification to {}: {}",
            notification.kind, notification.recipient_ref, notification.title
        );
        Ok(())
    }
}

/// Polls the outbox and materializes notification rows. Booking transactions
/// only append events, so booking success is durable no matter what happens
/// here.
pub struct NotificationDispatcher<S: NotificationSink> {
    pool: DbPool,
    sink: S,
    poll_interval: Duration,
}

impl<S: NotificationSink> NotificationDispatcher<S> {
    pub fn new(pool: DbPool, sink: S, poll_interval: Duration) -> Self {
        Self {
            pool,
            sink,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.poll_interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.process_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    async fn process_events(&self) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;

        let pending = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(100)
            .load::<DbOutboxEvent>(&mut conn)
            .await?;

        for event in pending {
            if let Err(e) = self.handle_event(&mut conn, &event).await {
                error!("Failed to handle outbox event {}: {}", event.id, e);
                continue;
            }

            diesel::update(outbox_events::table.find(event.id))
                .set(outbox_events::processed.eq(true))
                .execute(&mut conn)
                .await?;
        }

        Ok(())
    }

    async fn handle_event(
        &self,
        conn: &mut AsyncPgConnection,
        event: &DbOutboxEvent,
    ) -> anyhow::Result<()> {
        let Some(kind) = NotificationKind::parse(&event.event_type) else {
            warn!("Unknown outbox event type: {}", event.event_type);
            return Ok(());
        };

        match kind {
            NotificationKind::BookingCreated => {
                let payload: BookingEvent = serde_json::from_value(event.event_data.clone())?;
                for recipient in [RecipientKind::Customer, RecipientKind::Provider] {
                    let notification = render_booking_created(&payload, recipient);
                    self.insert_and_deliver(conn, notification).await?;
                }
            }
            NotificationKind::BookingConfirmed => {
                let payload: BookingEvent = serde_json::from_value(event.event_data.clone())?;
                // The customer gets a fresh notification; the provider's
                // existing BookingCreated row is retitled in place. The
                // asymmetry comes from the source system and is kept.
                let notification = render_booking_confirmed(&payload);
                self.insert_and_deliver(conn, notification).await?;

                let (title, message) = provider_confirmed_text(&payload);
                diesel::update(
                    notifications::table
                        .filter(notifications::booking_ref.eq(payload.booking_id))
                        .filter(notifications::recipient_ref.eq(&payload.provider_ref))
                        .filter(
                            notifications::kind.eq(NotificationKind::BookingCreated.as_str()),
                        ),
                )
                .set((
                    notifications::title.eq(title),
                    notifications::message.eq(message),
                ))
                .execute(conn)
                .await?;
            }
            NotificationKind::NewServiceAdded => {
                let payload: ServiceAnnouncement = serde_json::from_value(event.event_data.clone())?;
                let notification = render_service_added(&payload);
                self.insert_and_deliver(conn, notification).await?;
            }
        }

        Ok(())
    }

    async fn insert_and_deliver(
        &self,
        conn: &mut AsyncPgConnection,
        notification: NewNotification,
    ) -> anyhow::Result<()> {
        diesel::insert_into(notifications::table)
            .values(&notification)
            .execute(conn)
            .await?;

        // Fire-and-forget: a sink failure must never unwind the event.
        if let Err(e) = self.sink.deliver(&notification).await {
            warn!(
                "Sink delivery failed for notification {}: {}",
                notification.id, e
            );
        }

        Ok(())
    }
}

fn render_booking_created(event: &BookingEvent, recipient: RecipientKind) -> NewNotification {
    let (recipient_ref, title, message) = match recipient {
        RecipientKind::Customer => (
            event.customer_ref.clone(),
            "Booking requested".to_string(),
            format!(
                "Your {} booking on {} at {} has been requested and awaits confirmation.",
                event.service, event.date, event.time
            ),
        ),
        RecipientKind::Provider => (
            event.provider_ref.clone(),
            "New booking".to_string(),
            format!(
                "A new {} booking on {} at {} is awaiting your confirmation.",
                event.service, event.date, event.time
            ),
        ),
    };
    NewNotification {
        id: Uuid::new_v4(),
        recipient_ref,
        recipient_kind: recipient.as_str().to_string(),
        kind: NotificationKind::BookingCreated.as_str().to_string(),
        title,
        message,
        booking_ref: Some(event.booking_id),
        service_ref: None,
    }
}

fn render_booking_confirmed(event: &BookingEvent) -> NewNotification {
    NewNotification {
        id: Uuid::new_v4(),
        recipient_ref: event.customer_ref.clone(),
        recipient_kind: RecipientKind::Customer.as_str().to_string(),
        kind: NotificationKind::BookingConfirmed.as_str().to_string(),
        title: "Booking confirmed".to_string(),
        message: format!(
            "Your {} booking on {} at {} has been confirmed.",
            event.service, event.date, event.time
        ),
        booking_ref: Some(event.booking_id),
        service_ref: None,
    }
}

fn provider_confirmed_text(event: &BookingEvent) -> (String, String) {
    (
        "Booking confirmed".to_string(),
        format!(
            "The {} booking on {} at {} has been confirmed.",
            event.service, event.date, event.time
        ),
    )
}

fn render_service_added(event: &ServiceAnnouncement) -> NewNotification {
    NewNotification {
        id: Uuid::new_v4(),
        recipient_ref: event.recipient_ref.clone(),
        recipient_kind: RecipientKind::Customer.as_str().to_string(),
        kind: NotificationKind::NewServiceAdded.as_str().to_string(),
        title: "New service available".to_string(),
        message: format!("A new service is now available: {}.", event.service_ref),
        booking_ref: None,
        service_ref: Some(event.service_ref.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn event() -> BookingEvent {
        BookingEvent {
            booking_id: Uuid::new_v4(),
            customer_ref: "customer-1".to_string(),
            provider_ref: "provider-1".to_string(),
            service: "HairCut".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            time: "09:00-10:00".to_string(),
        }
    }

    #[test]
    fn created_event_addresses_both_parties() {
        let event = event();
        let customer = render_booking_created(&event, RecipientKind::Customer);
        let provider = render_booking_created(&event, RecipientKind::Provider);

        assert_eq!(customer.recipient_ref, "customer-1");
        assert_eq!(customer.recipient_kind, "Customer");
        assert_eq!(provider.recipient_ref, "provider-1");
        assert_eq!(provider.recipient_kind, "Provider");
        for n in [&customer, &provider] {
            assert_eq!(n.kind, "BookingCreated");
            assert_eq!(n.booking_ref, Some(event.booking_id));
            assert!(n.message.contains("09:00-10:00"));
            assert!(n.message.contains("HairCut"));
        }
    }

    #[test]
    fn confirmed_event_targets_the_customer_only() {
        let event = event();
        let notification = render_booking_confirmed(&event);
        assert_eq!(notification.recipient_ref, "customer-1");
        assert_eq!(notification.kind, "BookingConfirmed");
        assert!(notification.message.contains("confirmed"));

        let (title, message) = provider_confirmed_text(&event);
        assert_eq!(title, "Booking confirmed");
        assert!(message.contains("2024-05-01"));
    }

    #[test]
    fn service_announcement_renders_for_its_recipient() {
        let announcement = ServiceAnnouncement {
            service_ref: "Coloring".to_string(),
            recipient_ref: "customer-2".to_string(),
        };
        let notification = render_service_added(&announcement);
        assert_eq!(notification.recipient_ref, "customer-2");
        assert_eq!(notification.service_ref.as_deref(), Some("Coloring"));
        assert_eq!(notification.booking_ref, None);
    }
}
