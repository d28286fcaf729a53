use rusqlite_migration::{M, Migrations};

pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "CREATE TABLE connections (
            id                      TEXT PRIMARY KEY,
            name                    TEXT NOT NULL,
            provider_type           TEXT NOT NULL,
            auth_type               TEXT NOT NULL,
            encrypted_credentials   TEXT NOT NULL,
            cache_limit_bytes       INTEGER,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );

        CREATE TABLE sync_configs (
            id              TEXT PRIMARY KEY,
            connection_id   TEXT NOT NULL,
            name            TEXT NOT NULL,
            folder_ids_json TEXT NOT NULL DEFAULT '[]',
            filters_json    TEXT NOT NULL DEFAULT '{}',
            delete_removed  INTEGER NOT NULL DEFAULT 0,
            profile_id      TEXT,
            created_at      TEXT NOT NULL,
            FOREIGN KEY (connection_id) REFERENCES connections(id) ON DELETE CASCADE
        );

        CREATE TABLE sync_state (
            sync_config_id  TEXT PRIMARY KEY,
            delta_token     TEXT,
            last_sync_at    TEXT NOT NULL,
            FOREIGN KEY (sync_config_id) REFERENCES sync_configs(id) ON DELETE CASCADE
        );

        CREATE TABLE sync_jobs (
            id              TEXT PRIMARY KEY,
            sync_config_id  TEXT NOT NULL,
            job_type        TEXT NOT NULL,
            status          TEXT NOT NULL,
            progress_json   TEXT NOT NULL DEFAULT '{}',
            errors_json     TEXT NOT NULL DEFAULT '[]',
            created_at      TEXT NOT NULL,
            started_at      TEXT,
            finished_at     TEXT,
            FOREIGN KEY (sync_config_id) REFERENCES sync_configs(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_sync_jobs_config ON sync_jobs(sync_config_id, created_at);

        CREATE TABLE documents (
            id              TEXT PRIMARY KEY,
            file_name       TEXT NOT NULL,
            local_path      TEXT NOT NULL,
            size_bytes      INTEGER NOT NULL,
            ingested_at     TEXT NOT NULL,
            provider_type   TEXT,
            connection_id   TEXT,
            remote_id       TEXT,
            remote_path     TEXT,
            web_view_url    TEXT,
            profile_id      TEXT,
            synced_at       TEXT
        );

        CREATE INDEX idx_documents_remote ON documents(connection_id, remote_id);",
    )])
}
