table! {
    organizations (id) {
        id -> Uuid,
        name -> Text,
        slug -> Varchar,
        subdomain -> Nullable<Varchar>,
        domain -> Nullable<Text>,
        subscription_status -> Text,
        subscription_plan -> Text,
        created -> Timestamptz,
    }
}

table! {
    tenant_databases (id) {
        id -> Uuid,
        organization_id -> Uuid,
        connection_string_encrypted -> Bytea,
        status -> Text,
        last_migration_synced -> Nullable<Text>,
        created -> Timestamptz,
        updated -> Timestamptz,
    }
}

table! {
    store_settings (organization_id) {
        organization_id -> Uuid,
        store_name -> Text,
        contact_email -> Nullable<Text>,
        currency -> Varchar,
        country -> Varchar,
        updated -> Timestamptz,
    }
}

table! {
    store_themes (organization_id) {
        organization_id -> Uuid,
        primary_color -> Nullable<Varchar>,
        accent_color -> Nullable<Varchar>,
        font_family -> Nullable<Text>,
        logo_url -> Nullable<Text>,
        updated -> Timestamptz,
    }
}

table! {
    products (id) {
        id -> Uuid,
        organization_id -> Uuid,
        name -> Text,
        slug -> Varchar,
        description -> Nullable<Text>,
        price_cents -> Int8,
        currency -> Varchar,
        image_url -> Nullable<Text>,
        is_active -> Bool,
        created -> Timestamptz,
    }
}

table! {
    collections (id) {
        id -> Uuid,
        organization_id -> Uuid,
        name -> Text,
        slug -> Varchar,
        description -> Nullable<Text>,
        position -> Int4,
        is_active -> Bool,
    }
}

table! {
    collection_products (collection_id, product_id) {
        collection_id -> Uuid,
        product_id -> Uuid,
        position -> Int4,
    }
}

table! {
    email_sends (id) {
        id -> Uuid,
        organization_id -> Uuid,
        tracking_id -> Varchar,
        recipient -> Text,
        subject -> Text,
        provider_message_id -> Nullable<Text>,
        sent -> Timestamptz,
    }
}

table! {
    email_events (id) {
        id -> Uuid,
        tracking_id -> Varchar,
        event_type -> Text,
        url -> Nullable<Text>,
        created -> Timestamptz,
    }
}

table! {
    marketing_events (id) {
        id -> Uuid,
        organization_id -> Uuid,
        user_id -> Nullable<Text>,
        session_id -> Nullable<Text>,
        event_type -> Text,
        event_data -> Jsonb,
        created -> Timestamptz,
    }
}

joinable!(tenant_databases -> organizations (organization_id));
joinable!(store_settings -> organizations (organization_id));
joinable!(store_themes -> organizations (organization_id));
joinable!(products -> organizations (organization_id));
joinable!(collections -> organizations (organization_id));
joinable!(collection_products -> collections (collection_id));
joinable!(collection_products -> products (product_id));
joinable!(email_sends -> organizations (organization_id));
joinable!(marketing_events -> organizations (organization_id));

allow_tables_to_appear_in_same_query!(
    organizations,
    tenant_databases,
    store_settings,
    store_themes,
    products,
    collections,
    collection_products,
    email_sends,
    email_events,
    marketing_events,
);

/// Tables living in each tenant's own database.
pub mod tenant {
    table! {
        payment_providers (id) {
            id -> Uuid,
            provider -> Text,
            stripe_account_id -> Text,
            status -> Text,
            is_active -> Bool,
            is_primary -> Bool,
            charges_enabled -> Bool,
            payouts_enabled -> Bool,
            details_submitted -> Bool,
            platform_fee_percentage -> Float8,
            platform_fee_fixed -> Float8,
            created -> Timestamptz,
            updated -> Timestamptz,
        }
    }

    table! {
        payment_transactions (id) {
            id -> Uuid,
            order_id -> Uuid,
            provider_id -> Uuid,
            provider_transaction_id -> Text,
            amount -> Int8,
            platform_fee -> Int8,
            net_amount -> Int8,
            currency -> Varchar,
            status -> Text,
            created -> Timestamptz,
        }
    }

    table! {
        tenant_migrations (name) {
            name -> Text,
            checksum -> Text,
            executed_at -> Timestamptz,
        }
    }

    joinable!(payment_transactions -> payment_providers (provider_id));

    allow_tables_to_appear_in_same_query!(payment_providers, payment_transactions, tenant_migrations,);
}
