diesel::table! {
    bookings (id) {
        id -> Uuid,
        customer_ref -> Varchar,
        provider_ref -> Varchar,
        service -> Varchar,
        style_variant -> Nullable<Varchar>,
        favorite_employee -> Nullable<Varchar>,
        date -> Date,
        time -> Varchar,
        duration_minutes -> Int4,
        pin -> Varchar,
        confirmation_state -> Varchar,
        total_amount -> Numeric,
        amount_paid -> Numeric,
        discount_amount -> Numeric,
        payment_state -> Varchar,
        complaint -> Nullable<Text>,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    notifications (id) {
        id -> Uuid,
        recipient_ref -> Varchar,
        recipient_kind -> Varchar,
        kind -> Varchar,
        title -> Varchar,
        message -> Text,
        booking_ref -> Nullable<Uuid>,
        service_ref -> Nullable<Varchar>,
        is_read -> Bool,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Nullable<Bool>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    provider_hours (provider_ref) {
        provider_ref -> Varchar,
        open_time -> Varchar,
        close_time -> Varchar,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    bookings,
    notifications,
    outbox_events,
    provider_hours,
);
