use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("timed out after {waited_ms:.0}ms waiting for a pooled connection")]
    Timeout { waited_ms: f64 },

    #[error("failed to acquire a pooled connection: {0}")]
    Acquire(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
}
