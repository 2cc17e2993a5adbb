use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        -- Teams (tenants)
        CREATE TABLE IF NOT EXISTS teams (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            stripe_webhook_secret BLOB,
            polymart_webhook_secret BLOB
        );

        -- Per-team validation settings (missing row = defaults)
        CREATE TABLE IF NOT EXISTS team_settings (
            team_id TEXT PRIMARY KEY REFERENCES teams(id) ON DELETE CASCADE,
            strict_customers INTEGER NOT NULL DEFAULT 0,
            strict_products INTEGER NOT NULL DEFAULT 0,
            heartbeat_timeout_minutes INTEGER NOT NULL DEFAULT 60,
            ip_limit_period TEXT NOT NULL DEFAULT 'month'
                CHECK (ip_limit_period IN ('day', 'week', 'month'))
        );

        -- Team-scoped Ed25519 key pairs (private key envelope-encrypted)
        CREATE TABLE IF NOT EXISTS key_pairs (
            team_id TEXT PRIMARY KEY REFERENCES teams(id) ON DELETE CASCADE,
            private_key BLOB NOT NULL,
            public_key TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            email TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_customers_team ON customers(team_id);
        CREATE INDEX IF NOT EXISTS idx_customers_team_email ON customers(team_id, email);

        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_products_team ON products(team_id);

        -- Licenses. license_key is the encrypted key material;
        -- license_key_lookup is the HMAC used for O(1) lookup.
        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
            license_key BLOB NOT NULL,
            license_key_lookup TEXT NOT NULL,
            suspended INTEGER NOT NULL DEFAULT 0,
            expiration_type TEXT NOT NULL CHECK (expiration_type IN ('none', 'date', 'duration')),
            expiration_start TEXT NOT NULL DEFAULT 'activation'
                CHECK (expiration_start IN ('creation', 'activation')),
            expiration_days INTEGER,
            expiration_date INTEGER,
            ip_limit INTEGER,
            seats INTEGER,
            created_at INTEGER NOT NULL,
            UNIQUE(team_id, license_key_lookup)
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_team ON licenses(team_id);

        CREATE TABLE IF NOT EXISTS license_customers (
            license_id TEXT NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
            customer_id TEXT NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
            PRIMARY KEY (license_id, customer_id)
        );
        CREATE INDEX IF NOT EXISTS idx_license_customers_customer ON license_customers(customer_id);

        CREATE TABLE IF NOT EXISTS license_products (
            license_id TEXT NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            PRIMARY KEY (license_id, product_id)
        );
        CREATE INDEX IF NOT EXISTS idx_license_products_product ON license_products(product_id);

        -- Heartbeats: one row per (license, client device), updated in place
        CREATE TABLE IF NOT EXISTS heartbeats (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
            client_identifier TEXT NOT NULL,
            last_beat_at INTEGER NOT NULL,
            ip_address TEXT,
            UNIQUE(license_id, client_identifier)
        );
        CREATE INDEX IF NOT EXISTS idx_heartbeats_license ON heartbeats(license_id);

        -- Request logs: append-only, also backs distinct-IP counting
        CREATE TABLE IF NOT EXISTS request_logs (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
            license_id TEXT REFERENCES licenses(id) ON DELETE SET NULL,
            ip_address TEXT NOT NULL,
            request_type TEXT NOT NULL CHECK (request_type IN ('verify', 'download', 'heartbeat')),
            status TEXT NOT NULL,
            status_code INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_request_logs_license_time ON request_logs(license_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_request_logs_team_time ON request_logs(team_id, created_at DESC);

        -- Webhook events (replay attack prevention)
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(provider, event_id)
        );
        "#,
    )?;
    Ok(())
}
