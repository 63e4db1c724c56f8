//! SurrealDB connection shared by the durable timer store and broker.

use std::sync::Arc;

use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use tracing::info;

use crate::error::Error;
use crate::result::Result;

/// Configuration for the backing store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Connection URL (e.g., "mem://", "rocksdb://data/closure", "ws://localhost:8000")
    pub url: String,
    /// Namespace to use
    pub namespace: String,
    /// Database to use
    pub database: String,
    /// Optional root credentials
    pub credentials: Option<Credentials>,
}

/// Root credentials for authentication.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl StoreConfig {
    /// Create a configuration for the given connection URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: "closure".to_string(),
            database: "closure".to_string(),
            credentials: None,
        }
    }

    /// Create an in-memory configuration for testing.
    pub fn in_memory() -> Self {
        Self::new("mem://").with_database("test")
    }

    /// Set credentials for authentication.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Cloneable handle to a connected store.
#[derive(Debug, Clone)]
pub struct Store {
    db: Arc<Surreal<Any>>,
}

impl Store {
    /// Connect to the store with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the connection, sign-in or
    /// namespace selection fails.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let db = Surreal::<Any>::init();

        db.connect(config.url.as_str())
            .await
            .map_err(|e| Error::connection(format!("{}: {e}", config.url)))?;

        if let Some(creds) = &config.credentials {
            db.signin(Root {
                username: &creds.username,
                password: &creds.password,
            })
            .await
            .map_err(|e| Error::connection(format!("sign-in failed: {e}")))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| Error::connection(format!("failed to select namespace/database: {e}")))?;

        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Store connected"
        );

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a reference to the underlying database client.
    pub fn db(&self) -> &Surreal<Any> {
        &self.db
    }

    /// Check that the store answers queries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the health query fails.
    pub async fn health_check(&self) -> Result<()> {
        self.db
            .query("INFO FOR DB")
            .await
            .map_err(|e| Error::connection(format!("health check failed: {e}")))?;
        Ok(())
    }
}
