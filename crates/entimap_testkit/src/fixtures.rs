//! Test fixtures: an in-memory store with the shop schema and a manager
//! wired to it.

use crate::domain::{Category, Product, ProductImage, Tag, PRODUCT_TAG};
use entimap_core::{Config, EntityManager, MemoryCache};
use entimap_storage::{MemoryStore, OnDelete, TableSchema};
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

/// Creates a store holding the shop tables.
///
/// Products reference categories (restrict) and images and tag links
/// reference products (cascade).
pub fn create_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.create_table(TableSchema::new("category"));
    store.create_table(
        TableSchema::new("product")
            .unique("sku")
            .references("category_id", "category", OnDelete::Restrict),
    );
    store.create_table(TableSchema::new("product_image").references(
        "product_id",
        "product",
        OnDelete::Cascade,
    ));
    store.create_table(TableSchema::new("tag").unique("label"));
    store.create_table(
        TableSchema::join(PRODUCT_TAG)
            .references("product_id", "product", OnDelete::Cascade)
            .references("tag_id", "tag", OnDelete::Cascade),
    );
    store
}

/// A manager over a fresh shop store.
pub struct TestShop {
    /// The manager.
    pub manager: Rc<EntityManager>,
    /// The backing store, for inspecting rows and statements.
    pub store: Arc<MemoryStore>,
    /// The cache shared by all DAOs.
    pub cache: Arc<MemoryCache>,
}

impl TestShop {
    /// Creates a shop with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a shop with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        let store = create_store();
        let cache = Arc::new(MemoryCache::new());
        let manager = EntityManager::new(store.clone(), cache.clone(), config);
        manager.register::<Category>(Arc::new(store.mapper("category")));
        manager.register::<Product>(Arc::new(store.mapper("product")));
        manager.register::<ProductImage>(Arc::new(store.mapper("product_image")));
        manager.register::<Tag>(Arc::new(store.mapper("tag")));
        Self {
            manager,
            store,
            cache,
        }
    }
}

impl Default for TestShop {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestShop {
    type Target = EntityManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// Runs a test against a fresh shop.
///
/// # Example
///
/// ```rust
/// use entimap_testkit::with_shop;
///
/// with_shop(|shop| {
///     assert_eq!(shop.unit_of_work().entities_count(), 0);
/// });
/// ```
pub fn with_shop<F, R>(f: F) -> R
where
    F: FnOnce(&TestShop) -> R,
{
    let shop = TestShop::new();
    f(&shop)
}
