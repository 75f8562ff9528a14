diesel::table! {
    hotels (id) {
        id -> Int8,
        name -> Varchar,
        total_rooms -> Int4,
        available_rooms -> Int4,
        cost_per_night -> Numeric,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    bookings (id) {
        id -> Int8,
        hotel_id -> Int8,
        user_id -> Int8,
        num_rooms -> Int4,
        num_days -> Int4,
        check_in_date -> Date,
        check_out_date -> Date,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    payments (id) {
        id -> Uuid,
        booking_id -> Int8,
        checkout_session_id -> Varchar,
        checkout_url -> Nullable<Text>,
        amount -> Numeric,
        currency -> Varchar,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    idempotency_keys (id) {
        id -> Uuid,
        idempotency_key -> Varchar,
        user_id -> Int8,
        endpoint -> Varchar,
        request_payload -> Jsonb,
        response_payload -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(bookings -> hotels (hotel_id));
diesel::joinable!(payments -> bookings (booking_id));

diesel::allow_tables_to_appear_in_same_query!(
    hotels,
    bookings,
    payments,
    idempotency_keys,
);
