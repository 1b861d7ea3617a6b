use opsis_core::flow::StoreFailure;
use opsis_core::{EnrolledIdentity, Embedding, IdentityStore};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("embedding encryption failed")]
    EncryptionFailed,
    #[error("embedding decryption failed: key mismatch or corrupted data")]
    DecryptionFailed,
    #[error("invalid embedding blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("invalid embedding dimension: {got} (expected {expected})")]
    InvalidEmbeddingDim { got: usize, expected: usize },
    #[error("invalid embedding value (NaN/Inf)")]
    InvalidEmbeddingValue,
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
}

/// SQLite-backed identity storage with AES-256-GCM encrypted embeddings.
///
/// A per-installation 32-byte key is generated at first use and stored at
/// `{db_dir}/.key` (mode 0600).
#[derive(Clone)]
pub struct IdentityDb {
    conn: Connection,
    enc_key: [u8; 32],
    embedding_dim: usize,
}

impl IdentityDb {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path, embedding_dim: usize) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let enc_key = if db_path == Path::new(":memory:") {
            [0u8; 32]
        } else {
            let key_path = db_path.parent().unwrap_or(Path::new(".")).join(".key");
            load_or_generate_key(&key_path)?
        };

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS identities (
                     id TEXT PRIMARY KEY,
                     display_name TEXT NOT NULL UNIQUE,
                     embedding BLOB NOT NULL,
                     created_at TEXT NOT NULL
                 );",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            enc_key,
            embedding_dim,
        })
    }

    pub async fn insert_identity(&self, identity: &EnrolledIdentity) -> Result<(), StoreError> {
        let blob = self.encrypt_embedding(&identity.embedding.values)?;
        let id = identity.id.clone();
        let display_name = identity.display_name.clone();
        let created_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities (id, display_name, embedding, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, display_name, blob, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Option<EnrolledIdentity>, StoreError> {
        let display_name = display_name.to_string();
        let rows = self
            .fetch(
                "SELECT id, display_name, embedding FROM identities WHERE display_name = ?1",
                Some(display_name),
            )
            .await?;
        Ok(self.decrypt_rows(rows)?.into_iter().next())
    }

    /// Every enrolled identity, oldest first (the verification gallery).
    pub async fn gallery(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let rows = self
            .fetch(
                "SELECT id, display_name, embedding FROM identities ORDER BY created_at, rowid",
                None,
            )
            .await?;
        self.decrypt_rows(rows)
    }

    /// Metadata only, no embeddings.
    pub async fn list_info(&self) -> Result<Vec<IdentityInfo>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, display_name, created_at FROM identities ORDER BY created_at, rowid",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(IdentityInfo {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute("DELETE FROM identities WHERE id = ?1", [&id])?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn remove_all(&self) -> Result<usize, StoreError> {
        self.conn
            .call(|conn| Ok(conn.execute("DELETE FROM identities", [])?))
            .await
            .map_err(StoreError::from)
    }

    pub async fn count_all(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    async fn fetch(
        &self,
        sql: &'static str,
        param: Option<String>,
    ) -> Result<Vec<(String, String, Vec<u8>)>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(sql)?;
                let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, Vec<u8>)> {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                };
                let rows = match &param {
                    Some(p) => stmt.query_map([p], map)?.collect::<Result<Vec<_>, _>>()?,
                    None => stmt.query_map([], map)?.collect::<Result<Vec<_>, _>>()?,
                };
                Ok(rows)
            })
            .await
            .map_err(StoreError::from)
    }

    // Decrypt outside the connection thread.
    fn decrypt_rows(
        &self,
        rows: Vec<(String, String, Vec<u8>)>,
    ) -> Result<Vec<EnrolledIdentity>, StoreError> {
        rows.into_iter()
            .map(|(id, display_name, blob)| {
                Ok(EnrolledIdentity {
                    id,
                    display_name,
                    embedding: Embedding::new(self.decrypt_embedding(&blob)?),
                })
            })
            .collect()
    }

    // ── Encryption helpers ────────────────────────────────────────────────────

    /// Output: 12-byte random nonce || ciphertext || 16-byte GCM tag.
    fn encrypt_embedding(&self, values: &[f32]) -> Result<Vec<u8>, StoreError> {
        self.validate_embedding_values(values)?;
        let plaintext = embedding_to_bytes(values);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt_embedding(&self, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;

        let values = bytes_to_embedding(&plaintext)?;
        self.validate_embedding_values(&values)?;
        Ok(values)
    }

    fn validate_embedding_values(&self, values: &[f32]) -> Result<(), StoreError> {
        if values.len() != self.embedding_dim {
            return Err(StoreError::InvalidEmbeddingDim {
                got: values.len(),
                expected: self.embedding_dim,
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidEmbeddingValue);
        }
        Ok(())
    }
}

impl IdentityStore for IdentityDb {
    async fn insert(&self, identity: &EnrolledIdentity) -> Result<(), StoreFailure> {
        Ok(self.insert_identity(identity).await?)
    }

    async fn find_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Option<EnrolledIdentity>, StoreFailure> {
        Ok(self.get_by_display_name(display_name).await?)
    }

    async fn list(&self) -> Result<Vec<EnrolledIdentity>, StoreFailure> {
        Ok(self.gallery().await?)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreFailure> {
        Ok(self.remove(id).await?)
    }

    async fn delete_all(&self) -> Result<usize, StoreFailure> {
        Ok(self.remove_all().await?)
    }
}

// ── Key management ────────────────────────────────────────────────────────────

/// Load the encryption key from disk, or generate and persist a new one.
/// Written with mode 0600 (owner-readable only).
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    if key_path.exists() {
        let bytes = std::fs::read(key_path).map_err(StoreError::KeyIo)?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            StoreError::KeyIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "encryption key file has wrong length ({} bytes, expected 32)",
                    bytes.len()
                ),
            ))
        })?;
        tracing::debug!(path = %key_path.display(), "loaded encryption key");
        Ok(key)
    } else {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(key_path)
            .map_err(StoreError::KeyIo)?;
        f.write_all(&key).map_err(StoreError::KeyIo)?;

        tracing::info!(path = %key_path.display(), "generated new AES-256 encryption key");
        Ok(key)
    }
}

// ── Serialization helpers ─────────────────────────────────────────────────────

fn embedding_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Metadata about an enrolled identity (no embedding data).
#[derive(Debug, Clone, serde::Serialize)]
pub struct IdentityInfo {
    pub id: String,
    pub display_name: String,
    pub created_at: String,
}
