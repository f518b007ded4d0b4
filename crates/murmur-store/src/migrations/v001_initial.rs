//! v001 -- Initial schema creation.
//!
//! A single namespaced key-value table. Namespaces look like
//! `identity:<user>`, `channel-keys:<user>` and `settings:<device>`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    namespace  TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,

    PRIMARY KEY (namespace, key)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
