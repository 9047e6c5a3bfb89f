//! Postgres persistence for the discovery pipeline.
//!
//! The [`Storage`] handle owns the pool and hands out per-table stores.
//! It replaces module-level database globals: the coordinator builds
//! one and threads it through every component.

pub mod citations;
pub mod content;
pub mod error;
pub mod feed;
pub mod memory;
pub mod pages;
pub mod patches;
pub mod runs;

pub use citations::{CitationStore, ExtractionOutcome};
pub use content::{derive_summary, ContentStore};
pub use error::{Result, StoreError};
pub use feed::{EnqueueOutcome, FeedQueue};
pub use memory::{MemoryInsert, MemoryStore, NewMemory};
pub use pages::PageStore;
pub use patches::PatchStore;
pub use runs::RunStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn patches(&self) -> PatchStore {
        PatchStore::new(self.pool.clone())
    }

    pub fn pages(&self) -> PageStore {
        PageStore::new(self.pool.clone())
    }

    pub fn citations(&self) -> CitationStore {
        CitationStore::new(self.pool.clone())
    }

    pub fn content(&self) -> ContentStore {
        ContentStore::new(self.pool.clone())
    }

    pub fn feed(&self) -> FeedQueue {
        FeedQueue::new(self.pool.clone())
    }

    pub fn memories(&self) -> MemoryStore {
        MemoryStore::new(self.pool.clone())
    }

    pub fn runs(&self) -> RunStore {
        RunStore::new(self.pool.clone())
    }
}
