//! Runtime database backend detection and the `AnyConnection` multi-backend
//! connection type.

#[cfg(feature = "postgres")]
use diesel::PgConnection;
#[cfg(feature = "sqlite")]
use diesel::SqliteConnection;

/// Which relational backend a connection URL resolves to.
///
/// Detected once at [`crate::database::Store::connect`] time and reused
/// wherever a component needs backend-specific SQL (the `FOR UPDATE SKIP
/// LOCKED` claim query in `queue.rs` being the main example).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Postgres,
    Sqlite,
}

impl BackendType {
    /// Detects the backend from a connection URL.
    ///
    /// # Panics
    /// Panics if the URL matches no enabled backend — callers that need a
    /// recoverable error should use [`crate::error::StoreError::UnsupportedUrl`]
    /// instead of calling this directly on untrusted input; `Store::connect`
    /// does exactly that.
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return BackendType::Postgres;
        }
        if url.starts_with("sqlite://")
            || url.starts_with("file:")
            || url.starts_with('/')
            || url.starts_with("./")
            || url.starts_with("../")
            || url == ":memory:"
            || url.ends_with(".db")
            || url.ends_with(".sqlite")
            || url.ends_with(".sqlite3")
        {
            return BackendType::Sqlite;
        }
        panic!(
            "unable to detect database backend from url '{}' (expected postgres://, sqlite://, or a file path)",
            url
        );
    }
}

/// Multi-connection enum wrapping both backends so the rest of the crate
/// writes one query path via Diesel's generated multi-backend DSL.
#[derive(diesel::MultiConnection)]
pub enum AnyConnection {
    #[cfg(feature = "postgres")]
    Postgres(PgConnection),
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteConnection),
}

/// Pool of [`AnyConnection`]s; deadpool-diesel's `Manager<C>` is generic
/// over any `diesel::Connection`, so a single pool type serves both
/// backends — the backend actually opened is whatever `AnyConnection`'s
/// `Connection::establish` resolves the URL to.
pub type AnyManager = deadpool_diesel::Manager<AnyConnection>;
pub type AnyPool = deadpool_diesel::Pool<AnyConnection>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_postgres_urls() {
        assert_eq!(BackendType::from_url("postgres://u:p@host/db"), BackendType::Postgres);
        assert_eq!(BackendType::from_url("postgresql://u:p@host/db"), BackendType::Postgres);
    }

    #[test]
    fn detects_sqlite_urls() {
        assert_eq!(BackendType::from_url("sqlite://test.db"), BackendType::Sqlite);
        assert_eq!(BackendType::from_url(":memory:"), BackendType::Sqlite);
        assert_eq!(BackendType::from_url("./data/orchestrator.sqlite3"), BackendType::Sqlite);
        assert_eq!(BackendType::from_url("/var/lib/pipeweave/db.sqlite"), BackendType::Sqlite);
    }

    #[test]
    #[should_panic(expected = "unable to detect database backend")]
    fn panics_on_unrecognized_scheme() {
        BackendType::from_url("mysql://host/db");
    }
}
