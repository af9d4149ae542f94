use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub mod order_repository;

pub use order_repository::{
    NewOrder, NewOrderItem, OrderFilters, OrderPage, OrderRepository, PersistedOrder,
    RepositorySettings,
};

/// Anything backed by the shared connection pool
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

/// Holds the pool handle for a concrete repository.
#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}
