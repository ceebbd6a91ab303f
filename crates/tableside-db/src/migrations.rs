use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;

use tableside_common::{Error, Result};
use tracing::debug;

/// A named unit of schema change. The SQL is executed as one blob.
///
/// Migrations are applied in registry order and tracked by name in the
/// ledger table, so a name must never be reused for different SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: Cow<'static, str>,
    pub sql: Cow<'static, str>,
}

impl Migration {
    pub fn new(name: impl Into<Cow<'static, str>>, sql: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// SQL flavour a backend speaks. Built-in migrations ship one variant per
/// dialect under the same names, so a ledger means the same thing on both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

/// Ordered list of migrations. Insertion order is execution order.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Build a registry, rejecting empty or duplicate names.
    pub fn new(migrations: Vec<Migration>) -> Result<Self> {
        {
            let mut seen = HashSet::new();
            for migration in &migrations {
                if migration.name.trim().is_empty() {
                    return Err(Error::Registry("migration name cannot be empty".into()));
                }
                if !seen.insert(migration.name()) {
                    return Err(Error::Registry(format!(
                        "duplicate migration name: {}",
                        migration.name
                    )));
                }
            }
        }
        Ok(Self { migrations })
    }

    /// The restaurant schema shipped with the backend, written for `dialect`.
    pub fn builtin(dialect: Dialect) -> Self {
        let migrations = match dialect {
            Dialect::Postgres => vec![PG_INITIAL_SCHEMA, PG_OPTIMIZE_INDEXES],
            Dialect::Sqlite => vec![SQLITE_INITIAL_SCHEMA, SQLITE_OPTIMIZE_INDEXES],
        };
        Self { migrations }
    }

    /// Load every `*.sql` file in `dir`, ordered by file name. The file stem
    /// becomes the migration name.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Registry(format!("failed to read migrations dir {}: {e}", dir.display()))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
                files.push(path);
            }
        }
        files.sort();

        let mut migrations = Vec::with_capacity(files.len());
        for path in files {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    Error::Registry(format!("non UTF-8 migration file name: {}", path.display()))
                })?
                .to_string();
            let sql = std::fs::read_to_string(&path).map_err(|e| {
                Error::Registry(format!("failed to read {}: {e}", path.display()))
            })?;
            debug!(migration = %name, "loaded migration from {}", path.display());
            migrations.push(Migration::new(name, sql));
        }

        Self::new(migrations)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.migrations.iter().map(Migration::name).collect()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

pub const PG_INITIAL_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS restaurants (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    address TEXT,
    phone TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    restaurant_id BIGINT REFERENCES restaurants(id) ON DELETE SET NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    full_name TEXT,
    role TEXT NOT NULL DEFAULT 'staff' CHECK (role IN ('admin', 'manager', 'staff')),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS menu_categories (
    id BIGSERIAL PRIMARY KEY,
    restaurant_id BIGINT NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    sort_order INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS menu_items (
    id BIGSERIAL PRIMARY KEY,
    restaurant_id BIGINT NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
    category_id BIGINT REFERENCES menu_categories(id) ON DELETE SET NULL,
    name TEXT NOT NULL,
    description TEXT,
    price NUMERIC(10, 2) NOT NULL CHECK (price >= 0),
    is_available BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS dining_tables (
    id BIGSERIAL PRIMARY KEY,
    restaurant_id BIGINT NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
    label TEXT NOT NULL,
    seats INTEGER NOT NULL CHECK (seats > 0),
    UNIQUE (restaurant_id, label)
);

CREATE TABLE IF NOT EXISTS reservations (
    id BIGSERIAL PRIMARY KEY,
    restaurant_id BIGINT NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
    table_id BIGINT REFERENCES dining_tables(id) ON DELETE SET NULL,
    customer_name TEXT NOT NULL,
    customer_phone TEXT,
    party_size INTEGER NOT NULL CHECK (party_size > 0),
    reserved_for TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL DEFAULT 'booked'
        CHECK (status IN ('booked', 'seated', 'completed', 'cancelled', 'no_show')),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS orders (
    id BIGSERIAL PRIMARY KEY,
    restaurant_id BIGINT NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
    table_id BIGINT REFERENCES dining_tables(id) ON DELETE SET NULL,
    created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'preparing', 'served', 'paid', 'cancelled')),
    total NUMERIC(10, 2) NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS order_items (
    id BIGSERIAL PRIMARY KEY,
    order_id BIGINT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
    menu_item_id BIGINT NOT NULL REFERENCES menu_items(id),
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    unit_price NUMERIC(10, 2) NOT NULL,
    notes TEXT
);
";

pub const PG_OPTIMIZE_INDEXES_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_users_restaurant ON users(restaurant_id);
CREATE INDEX IF NOT EXISTS idx_menu_items_restaurant_category
    ON menu_items(restaurant_id, category_id);
CREATE INDEX IF NOT EXISTS idx_menu_items_available
    ON menu_items(restaurant_id) WHERE is_available;
CREATE INDEX IF NOT EXISTS idx_reservations_restaurant_time
    ON reservations(restaurant_id, reserved_for);
CREATE INDEX IF NOT EXISTS idx_orders_restaurant_status_created
    ON orders(restaurant_id, status, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);
CREATE INDEX IF NOT EXISTS idx_order_items_menu_item ON order_items(menu_item_id);
";

pub const SQLITE_INITIAL_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS restaurants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    address TEXT,
    phone TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_id INTEGER REFERENCES restaurants(id) ON DELETE SET NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    full_name TEXT,
    role TEXT NOT NULL DEFAULT 'staff' CHECK (role IN ('admin', 'manager', 'staff')),
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS menu_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_id INTEGER NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    sort_order INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS menu_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_id INTEGER NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
    category_id INTEGER REFERENCES menu_categories(id) ON DELETE SET NULL,
    name TEXT NOT NULL,
    description TEXT,
    price NUMERIC NOT NULL CHECK (price >= 0),
    is_available INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS dining_tables (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_id INTEGER NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
    label TEXT NOT NULL,
    seats INTEGER NOT NULL CHECK (seats > 0),
    UNIQUE (restaurant_id, label)
);

CREATE TABLE IF NOT EXISTS reservations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_id INTEGER NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
    table_id INTEGER REFERENCES dining_tables(id) ON DELETE SET NULL,
    customer_name TEXT NOT NULL,
    customer_phone TEXT,
    party_size INTEGER NOT NULL CHECK (party_size > 0),
    reserved_for TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'booked'
        CHECK (status IN ('booked', 'seated', 'completed', 'cancelled', 'no_show')),
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_id INTEGER NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
    table_id INTEGER REFERENCES dining_tables(id) ON DELETE SET NULL,
    created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'preparing', 'served', 'paid', 'cancelled')),
    total NUMERIC NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS order_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
    menu_item_id INTEGER NOT NULL REFERENCES menu_items(id),
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    unit_price NUMERIC NOT NULL,
    notes TEXT
);
";

pub const SQLITE_OPTIMIZE_INDEXES_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_users_restaurant ON users(restaurant_id);
CREATE INDEX IF NOT EXISTS idx_menu_items_restaurant_category
    ON menu_items(restaurant_id, category_id);
CREATE INDEX IF NOT EXISTS idx_menu_items_available
    ON menu_items(restaurant_id) WHERE is_available = 1;
CREATE INDEX IF NOT EXISTS idx_reservations_restaurant_time
    ON reservations(restaurant_id, reserved_for);
CREATE INDEX IF NOT EXISTS idx_orders_restaurant_status_created
    ON orders(restaurant_id, status, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);
CREATE INDEX IF NOT EXISTS idx_order_items_menu_item ON order_items(menu_item_id);
";

const INITIAL_SCHEMA_NAME: &str = "001_initial_schema";
const OPTIMIZE_INDEXES_NAME: &str = "002_optimize_indexes";

pub const PG_INITIAL_SCHEMA: Migration = Migration {
    name: Cow::Borrowed(INITIAL_SCHEMA_NAME),
    sql: Cow::Borrowed(PG_INITIAL_SCHEMA_SQL),
};

pub const PG_OPTIMIZE_INDEXES: Migration = Migration {
    name: Cow::Borrowed(OPTIMIZE_INDEXES_NAME),
    sql: Cow::Borrowed(PG_OPTIMIZE_INDEXES_SQL),
};

pub const SQLITE_INITIAL_SCHEMA: Migration = Migration {
    name: Cow::Borrowed(INITIAL_SCHEMA_NAME),
    sql: Cow::Borrowed(SQLITE_INITIAL_SCHEMA_SQL),
};

pub const SQLITE_OPTIMIZE_INDEXES: Migration = Migration {
    name: Cow::Borrowed(OPTIMIZE_INDEXES_NAME),
    sql: Cow::Borrowed(SQLITE_OPTIMIZE_INDEXES_SQL),
};
