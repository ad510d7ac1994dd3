//! Core services: naming/integrity, the storage gateway, and the scan
//! pipeline.

pub mod naming;
pub mod scan_service;
pub mod storage_service;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::providers::{ProviderError, ProviderResult, StorageProvider};
    use async_trait::async_trait;
    use bytes::Bytes;
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// One-connection in-memory SQLite pool with the schema applied.
    /// A single connection is required: every new in-memory connection
    /// would otherwise see a fresh empty database.
    pub async fn test_pool() -> Arc<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");

        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.expect("migration");
        }

        Arc::new(pool)
    }

    /// In-memory provider implementing the same contract as the real
    /// backends, with injectable failures.
    #[derive(Default)]
    pub struct MemoryProvider {
        pub objects: Mutex<HashMap<String, (Bytes, String, bool)>>,
        pub fail_put: bool,
        pub fail_delete: bool,
    }

    impl MemoryProvider {
        pub fn failing_put() -> Self {
            Self {
                fail_put: true,
                ..Self::default()
            }
        }

        pub fn failing_delete() -> Self {
            Self {
                fail_delete: true,
                ..Self::default()
            }
        }

        pub fn stored_keys(&self) -> Vec<String> {
            self.objects.lock().unwrap().keys().cloned().collect()
        }
    }

    #[async_trait]
    impl StorageProvider for MemoryProvider {
        async fn put(
            &self,
            key: &str,
            data: Bytes,
            mime_type: &str,
            is_public: bool,
        ) -> ProviderResult<()> {
            if self.fail_put {
                return Err(ProviderError::Backend("injected put failure".into()));
            }
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (data, mime_type.to_string(), is_public));
            Ok(())
        }

        async fn get(&self, key: &str) -> ProviderResult<Bytes> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .map(|(data, _, _)| data.clone())
                .ok_or_else(|| ProviderError::NotFound {
                    key: key.to_string(),
                })
        }

        async fn delete(&self, key: &str) -> ProviderResult<()> {
            if self.fail_delete {
                return Err(ProviderError::Backend("injected delete failure".into()));
            }
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        async fn sign(&self, key: &str, ttl: Duration) -> ProviderResult<String> {
            Ok(format!(
                "https://signed.test/{key}?expires={}",
                ttl.as_secs()
            ))
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://public.test/{key}")
        }

        fn name(&self) -> &'static str {
            "memory"
        }
    }
}
