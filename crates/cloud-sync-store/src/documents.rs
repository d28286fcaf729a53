use chrono::Utc;
use cloud_sync::Provenance;
use rusqlite::{OptionalExtension, Row, params};

use crate::records::DocumentRecord;
use crate::store::{StoreError, SyncStore, provider_type_at, to_i64};

const DOCUMENT_COLUMNS: &str = "id, file_name, local_path, size_bytes, ingested_at, provider_type,
    connection_id, remote_id, remote_path, web_view_url, profile_id, synced_at";

impl SyncStore {
    /// Insert a document row without provenance.
    pub fn insert_document(
        &self,
        id: &str,
        file_name: &str,
        local_path: &str,
        size_bytes: u64,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO documents (id, file_name, local_path, size_bytes, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, file_name, local_path, to_i64(size_bytes), Utc::now()],
        )?;
        Ok(())
    }

    pub fn get_document(&self, id: &str) -> Result<DocumentRecord, StoreError> {
        self.conn()?
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                [id],
                row_to_document,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                kind: "document",
                id: id.to_owned(),
            })
    }

    /// Attach provenance to a document. Other documents from the same
    /// `(connection_id, remote_id)` are deleted and returned so the caller
    /// can remove their files.
    pub fn attach_document_provenance(
        &self,
        id: &str,
        provenance: &Provenance,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let replaced = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE connection_id = ?1 AND remote_id = ?2 AND id != ?3"
            ))?;
            stmt.query_map(
                params![provenance.connection_id, provenance.remote_id, id],
                row_to_document,
            )?
            .collect::<Result<Vec<_>, _>>()?
        };

        tx.execute(
            "DELETE FROM documents WHERE connection_id = ?1 AND remote_id = ?2 AND id != ?3",
            params![provenance.connection_id, provenance.remote_id, id],
        )?;

        let changed = tx.execute(
            "UPDATE documents
             SET provider_type = ?2, connection_id = ?3, remote_id = ?4, remote_path = ?5,
                 web_view_url = ?6, profile_id = ?7, synced_at = ?8
             WHERE id = ?1",
            params![
                id,
                provenance.provider.as_str(),
                provenance.connection_id,
                provenance.remote_id,
                provenance.remote_path,
                provenance.web_view_url,
                provenance.profile_id,
                provenance.synced_at,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                kind: "document",
                id: id.to_owned(),
            });
        }

        tx.commit()?;
        Ok(replaced)
    }

    /// Delete every document from one remote file and return them.
    pub fn remove_documents_by_remote_id(
        &self,
        connection_id: &str,
        remote_id: &str,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let removed = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE connection_id = ?1 AND remote_id = ?2"
            ))?;
            stmt.query_map([connection_id, remote_id], row_to_document)?
                .collect::<Result<Vec<_>, _>>()?
        };
        tx.execute(
            "DELETE FROM documents WHERE connection_id = ?1 AND remote_id = ?2",
            [connection_id, remote_id],
        )?;

        tx.commit()?;
        Ok(removed)
    }

    pub fn known_remote_ids(&self, connection_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT remote_id FROM documents
             WHERE connection_id = ?1 AND remote_id IS NOT NULL
             ORDER BY remote_id",
        )?;
        let ids = stmt
            .query_map([connection_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Documents, optionally only those synced from one connection.
    pub fn list_documents(&self, connection_id: Option<&str>) -> Result<Vec<DocumentRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE ?1 IS NULL OR connection_id = ?1
             ORDER BY ingested_at, id"
        ))?;
        let documents = stmt
            .query_map([connection_id], row_to_document)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(documents)
    }
}

fn row_to_document(row: &Row) -> rusqlite::Result<DocumentRecord> {
    let size: i64 = row.get(3)?;
    let provider: Option<String> = row.get(5)?;

    Ok(DocumentRecord {
        id: row.get(0)?,
        file_name: row.get(1)?,
        local_path: row.get(2)?,
        size_bytes: size.max(0) as u64,
        ingested_at: row.get(4)?,
        provider_type: match provider {
            Some(_) => Some(provider_type_at(row, 5)?),
            None => None,
        },
        connection_id: row.get(6)?,
        remote_id: row.get(7)?,
        remote_path: row.get(8)?,
        web_view_url: row.get(9)?,
        profile_id: row.get(10)?,
        synced_at: row.get(11)?,
    })
}
