use diesel::{allow_tables_to_appear_in_same_query, table};

table! {
    donations (id) {
        id -> Text,
        project_id -> Text,
        donor_type -> Text,
        donor_id -> Text,
        amount -> BigInt,
        currency -> Text,
        is_recurring -> Bool,
        message -> Nullable<Text>,
        paused -> Bool,
        next_billing_message -> Nullable<Text>,
        external_payment_id -> Text,
        status -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted -> Bool,
    }
}

table! {
    processed_events (event_id) {
        event_id -> Text,
        processed_at -> Timestamptz,
    }
}

table! {
    donor_token_migrations (token, user_id) {
        token -> Text,
        user_id -> Text,
        migrated_count -> BigInt,
        migrated_at -> Timestamptz,
    }
}

table! {
    activity (id) {
        id -> Text,
        #[sql_name = "type"]
        kind -> Text,
        project_id -> Text,
        project_name -> Text,
        actor_name -> Nullable<Text>,
        amount -> Nullable<BigInt>,
        message -> Nullable<Text>,
        milestone -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    projects (id) {
        id -> Text,
        owner_id -> Text,
        name -> Text,
        status -> Text,
        external_account_id -> Nullable<Text>,
        monthly_target -> Nullable<BigInt>,
        owner_want_monthly -> Nullable<BigInt>,
        currency -> Text,
    }
}

table! {
    users (id) {
        id -> Text,
        display_name -> Nullable<Text>,
    }
}

allow_tables_to_appear_in_same_query!(donations, users, projects);
