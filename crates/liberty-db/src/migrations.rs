use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Schema steps, applied in order. Each entry bumps `schema_version` by one.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "initial schema",
        "
        CREATE TABLE users (
            id                  TEXT PRIMARY KEY,
            provider_id         TEXT NOT NULL UNIQUE,
            email               TEXT,
            first_name          TEXT,
            last_name           TEXT,
            profile_image_url   TEXT,
            is_admin            INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );

        CREATE TABLE sessions (
            sid         TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            sess        TEXT NOT NULL,
            expire      TEXT NOT NULL
        );

        CREATE INDEX idx_sessions_expire ON sessions(expire);

        CREATE TABLE email_subscriptions (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE grant_categories (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            description TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE grants (
            id          TEXT PRIMARY KEY,
            category_id TEXT NOT NULL REFERENCES grant_categories(id) ON DELETE CASCADE,
            title       TEXT NOT NULL,
            description TEXT NOT NULL,
            reward      TEXT,
            status      TEXT NOT NULL DEFAULT 'open',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX idx_grants_category ON grants(category_id);

        CREATE TABLE grant_applications (
            id                      TEXT PRIMARY KEY,
            grant_id                TEXT REFERENCES grants(id) ON DELETE SET NULL,
            applicant_name          TEXT NOT NULL,
            email                   TEXT NOT NULL,
            project_name            TEXT NOT NULL,
            project_description     TEXT NOT NULL,
            requested_amount        TEXT,
            website                 TEXT,
            github                  TEXT,
            status                  TEXT NOT NULL DEFAULT 'received',
            chat_token              TEXT NOT NULL UNIQUE,
            last_admin_viewed_at    TEXT,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );

        CREATE INDEX idx_applications_status ON grant_applications(status, created_at);

        CREATE TABLE chat_messages (
            id              TEXT PRIMARY KEY,
            application_id  TEXT NOT NULL REFERENCES grant_applications(id) ON DELETE CASCADE,
            sender          TEXT NOT NULL,
            body            TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX idx_chat_messages_application
            ON chat_messages(application_id, created_at);
        ",
    ),
    (
        "normalise legacy pipeline status",
        "UPDATE grant_applications SET status = 'in-review' WHERE status = 'pipeline';",
    ),
    (
        "anonymous sessions",
        "
        CREATE TABLE sessions_v3 (
            sid         TEXT PRIMARY KEY,
            user_id     TEXT REFERENCES users(id) ON DELETE CASCADE,
            sess        TEXT NOT NULL,
            expire      TEXT NOT NULL
        );
        INSERT INTO sessions_v3 (sid, user_id, sess, expire)
            SELECT sid, user_id, sess, expire FROM sessions;
        DROP TABLE sessions;
        ALTER TABLE sessions_v3 RENAME TO sessions;
        CREATE INDEX idx_sessions_expire ON sessions(expire);
        ",
    ),
];

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    for (idx, (name, sql)) in MIGRATIONS.iter().enumerate() {
        let target = idx as i64 + 1;
        if version >= target {
            continue;
        }
        info!("Running migration v{} ({})", target, name);
        conn.execute_batch(&format!(
            "BEGIN;\n{sql}\nINSERT INTO schema_version (version) VALUES ({target});\nCOMMIT;"
        ))?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rerunning_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);
    }
}
