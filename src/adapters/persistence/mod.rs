use sqlx::PgPool;

pub mod catalog;
pub mod entitlement_store;
pub mod subscription_event;
pub mod user_directory;

#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        PostgresPersistence { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
