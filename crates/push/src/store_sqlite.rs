//! SQLite-backed channel store using sqlx.
//!
//! One database file per connection, opened in exclusive locking mode so a
//! second connection on the same file is refused. With an encryption key every
//! payload is sealed with the store key, bound to its channel id.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    async_trait::async_trait,
    courier_config::ConnectionConfig,
    courier_vault::{KdfParams, SealingKey, VaultError, kdf},
    secrecy::{ExposeSecret, Secret},
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode, SqlitePoolOptions},
    },
    tracing::{debug, info},
};

use crate::{Error, Result, store::ChannelStore, types::ChannelRecord};

/// Current layout of the `payload` column.
const RECORD_FORMAT: i64 = 1;

const INFO_KDF_SALT: &str = "kdf_salt";
const INFO_KDF_PARAMS: &str = "kdf_params";
const INFO_KEY_CHECK: &str = "key_check";
const INFO_OPENED_AT: &str = "opened_at";

/// Persistent channel store in a single SQLite file.
pub struct SqliteChannelStore {
    pool: SqlitePool,
    path: PathBuf,
    key: Option<SealingKey>,
}

impl SqliteChannelStore {
    /// Open the store for `config` under its data directory.
    pub async fn for_config(config: &ConnectionConfig) -> Result<Self> {
        let dir = config
            .storage
            .data_dir
            .clone()
            .unwrap_or_else(courier_config::data_dir);
        let cost = config.storage.kdf;
        Self::open(
            dir.join(config.store_file_name()),
            config.encryption_key.as_ref(),
            KdfParams {
                m_cost: cost.m_cost,
                t_cost: cost.t_cost,
                p_cost: cost.p_cost,
            },
        )
        .await
    }

    /// Open or create the store at `path`.
    ///
    /// `new_params` only apply when a new store gets encrypted; existing
    /// stores keep the parameters they were created with.
    pub async fn open(
        path: impl AsRef<Path>,
        encryption_key: Option<&Secret<String>>,
        new_params: KdfParams,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .locking_mode(SqliteLockingMode::Exclusive)
            .journal_mode(SqliteJournalMode::Delete)
            .busy_timeout(Duration::from_millis(100));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| locked_or(e, &path))?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
            pool.close().await;
            return Err(match e {
                sqlx::migrate::MigrateError::Execute(inner) => locked_or(inner, &path),
                other => other.into(),
            });
        }

        // The first write takes the exclusive lock for the pool's lifetime.
        let stamp = sqlx::query(
            "INSERT INTO store_info (key, value) VALUES (?, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(INFO_OPENED_AT)
        .execute(&pool)
        .await;
        if let Err(e) = stamp {
            pool.close().await;
            return Err(locked_or(e, &path));
        }

        let mut store = Self {
            pool,
            path,
            key: None,
        };
        if let Err(e) = store.unlock(encryption_key, new_params).await {
            store.pool.close().await;
            return Err(e);
        }

        info!(
            path = %store.path.display(),
            encrypted = store.key.is_some(),
            "channel store opened"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    async fn unlock(
        &mut self,
        encryption_key: Option<&Secret<String>>,
        new_params: KdfParams,
    ) -> Result<()> {
        let key_check = self.info(INFO_KEY_CHECK).await?;

        match (encryption_key, key_check) {
            (None, None) => Ok(()),
            (None, Some(_)) => Err(Error::storage(
                "store is encrypted but no encryption key was configured",
            )),
            (Some(passphrase), Some(check)) => {
                let salt = self
                    .info(INFO_KDF_SALT)
                    .await?
                    .ok_or_else(|| Error::storage("encrypted store is missing its salt"))?;
                let params: KdfParams = match self.info(INFO_KDF_PARAMS).await? {
                    Some(raw) => serde_json::from_str(&raw)
                        .map_err(|e| Error::storage(format!("corrupt KDF parameters: {e}")))?,
                    None => return Err(Error::storage("encrypted store is missing KDF parameters")),
                };
                let key = SealingKey::derive(
                    passphrase.expose_secret(),
                    &kdf::decode_salt(&salt)?,
                    &params,
                )?;
                key.verify_key_check(&check)?;
                self.key = Some(key);
                Ok(())
            },
            (Some(passphrase), None) => {
                let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM push_channels")
                    .fetch_one(&self.pool)
                    .await?;
                if existing > 0 {
                    return Err(Error::storage(
                        "store holds unencrypted records; refusing to enable encryption",
                    ));
                }

                let salt = kdf::generate_salt()?;
                let key = SealingKey::derive(
                    passphrase.expose_secret(),
                    &kdf::decode_salt(&salt)?,
                    &new_params,
                )?;
                let params = serde_json::to_string(&new_params)
                    .map_err(|e| Error::internal(format!("KDF parameters: {e}")))?;

                let mut tx = self.pool.begin().await?;
                for (k, v) in [
                    (INFO_KDF_SALT, salt),
                    (INFO_KDF_PARAMS, params),
                    (INFO_KEY_CHECK, key.key_check()?),
                ] {
                    sqlx::query("INSERT INTO store_info (key, value) VALUES (?, ?)")
                        .bind(k)
                        .bind(v)
                        .execute(&mut *tx)
                        .await?;
                }
                // Plain metadata from before encryption is re-written sealed.
                let plain: Vec<(String, String)> =
                    sqlx::query_as("SELECT key, value FROM push_meta WHERE sealed = 0")
                        .fetch_all(&mut *tx)
                        .await?;
                for (k, v) in plain {
                    sqlx::query("UPDATE push_meta SET sealed = 1, value = ? WHERE key = ?")
                        .bind(key.seal(v.as_bytes(), &meta_aad(&k))?)
                        .bind(&k)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;

                debug!(path = %self.path.display(), "store encryption enabled");
                self.key = Some(key);
                Ok(())
            },
        }
    }

    async fn info(&self, key: &str) -> Result<Option<String>> {
        Ok(sqlx::query_scalar("SELECT value FROM store_info WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?)
    }

    fn seal(&self, plaintext: &str, aad: &str) -> Result<(bool, String)> {
        match &self.key {
            Some(key) => Ok((true, key.seal(plaintext.as_bytes(), aad)?)),
            None => Ok((false, plaintext.to_string())),
        }
    }

    fn unseal(&self, sealed: bool, value: String, aad: &str) -> Result<String> {
        match (sealed, &self.key) {
            (false, _) => Ok(value),
            (true, Some(key)) => {
                let plain = key.open(&value, aad).map_err(|e| match e {
                    VaultError::CipherError(_) => {
                        Error::storage(format!("record {aad} failed authentication"))
                    },
                    other => other.into(),
                })?;
                String::from_utf8(plain)
                    .map_err(|_| Error::storage(format!("record {aad} is not UTF-8")))
            },
            (true, None) => Err(Error::storage(format!(
                "record {aad} is sealed but the store has no key"
            ))),
        }
    }

    fn decode_record(
        &self,
        channel_id: &str,
        format: i64,
        sealed: bool,
        payload: String,
    ) -> Result<ChannelRecord> {
        if format != RECORD_FORMAT {
            return Err(Error::storage(format!(
                "record {channel_id} has unsupported format {format}"
            )));
        }
        let json = self.unseal(sealed, payload, channel_id)?;
        let record: ChannelRecord = serde_json::from_str(&json)
            .map_err(|e| Error::storage(format!("record {channel_id} is corrupt: {e}")))?;
        if record.channel_id != channel_id {
            return Err(Error::storage(format!(
                "record {channel_id} holds channel {}",
                record.channel_id
            )));
        }
        Ok(record)
    }
}

fn meta_aad(key: &str) -> String {
    format!("meta:{key}")
}

/// Map SQLITE_BUSY / SQLITE_LOCKED to [`Error::StoreLocked`].
fn locked_or(error: sqlx::Error, path: &Path) -> Error {
    let locked = error.as_database_error().is_some_and(|db| {
        matches!(db.code().as_deref(), Some("5" | "6")) || db.message().contains("locked")
    });
    if locked {
        Error::StoreLocked {
            path: path.to_path_buf(),
        }
    } else {
        error.into()
    }
}

#[async_trait]
impl ChannelStore for SqliteChannelStore {
    async fn get(&self, channel_id: &str) -> Result<Option<ChannelRecord>> {
        let row = sqlx::query(
            "SELECT format, sealed, payload FROM push_channels WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            self.decode_record(
                channel_id,
                row.get("format"),
                row.get("sealed"),
                row.get("payload"),
            )
        })
        .transpose()
    }

    async fn put(&self, record: &ChannelRecord) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| Error::internal(format!("record {}: {e}", record.channel_id)))?;
        let (sealed, payload) = self.seal(&json, &record.channel_id)?;

        sqlx::query(
            "INSERT INTO push_channels (channel_id, format, sealed, payload) VALUES (?, ?, ?, ?)
             ON CONFLICT(channel_id) DO UPDATE SET
                 format = excluded.format,
                 sealed = excluded.sealed,
                 payload = excluded.payload,
                 updated_at = datetime('now')",
        )
        .bind(&record.channel_id)
        .bind(RECORD_FORMAT)
        .bind(sealed)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, channel_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM push_channels WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<ChannelRecord>> {
        let rows = sqlx::query(
            "SELECT channel_id, format, sealed, payload FROM push_channels ORDER BY channel_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let channel_id: String = row.get("channel_id");
            records.push(self.decode_record(
                &channel_id,
                row.get("format"),
                row.get("sealed"),
                row.get("payload"),
            )?);
        }
        Ok(records)
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(bool, String)> =
            sqlx::query_as("SELECT sealed, value FROM push_meta WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(sealed, value)| self.unseal(sealed, value, &meta_aad(key)))
            .transpose()
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let (sealed, value) = self.seal(value, &meta_aad(key))?;
        sqlx::query(
            "INSERT INTO push_meta (key, sealed, value) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET sealed = excluded.sealed, value = excluded.value",
        )
        .bind(key)
        .bind(sealed)
        .bind(&value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_meta(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM push_meta WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        debug!(path = %self.path.display(), "channel store closed");
        Ok(())
    }
}
