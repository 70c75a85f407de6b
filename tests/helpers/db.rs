use std::sync::Arc;

use rolegraph::hierarchy::service::HierarchyService;
use rolegraph::storage::SqlStore;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    db_url: String,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            db_url,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Run raw SQL with foreign key enforcement switched off.
    ///
    /// The pragma is per connection and ignored inside a transaction, so this
    /// opens a dedicated single-connection pool on the same file.
    pub async fn execute_unchecked(&self, sql: &str) {
        let mut options = ConnectOptions::new(self.db_url.clone());
        options.max_connections(1).min_connections(1);
        let raw = Database::connect(options)
            .await
            .expect("Failed to open unchecked connection");
        raw.execute_unprepared("PRAGMA foreign_keys = OFF")
            .await
            .expect("Failed to disable foreign keys");
        raw.execute_unprepared(sql)
            .await
            .expect("Failed to run unchecked SQL");
        raw.close().await.expect("Failed to close unchecked connection");
    }

    pub fn store(&self) -> Arc<SqlStore> {
        Arc::new(SqlStore::new(self.connection.clone()))
    }

    /// Service over this database with the default delete policy
    pub fn service(&self) -> HierarchyService {
        HierarchyService::new(self.store())
    }
}
