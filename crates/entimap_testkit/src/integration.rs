//! End-to-end flush scenarios over the shop domain.
//!
//! Provides helpers for driving a [`TestShop`] and inspecting what reached
//! storage.

use crate::domain::{Product, PRODUCT};
use crate::fixtures::TestShop;
use entimap_core::{EntityKind, EntityRef, EntityRefExt, PersistTarget};
use entimap_storage::{Row, Value};

/// Persists a product named "Lamp" with the given SKU and price.
pub fn create_product(shop: &TestShop, sku: &str, price: i64) -> EntityRef {
    shop.persist(PersistTarget::builder(Product::builder("Lamp", sku, price)))
        .expect("Failed to persist product")
}

/// Returns the stored row of an entity, if it has an id and a row.
pub fn stored(shop: &TestShop, kind: &EntityKind, entity: &EntityRef) -> Option<Row> {
    let id = entity.entity_id()?;
    shop.store.row(kind.table(), id.as_u64())
}

/// Returns the stored price of a product.
pub fn stored_price(shop: &TestShop, product: &EntityRef) -> Option<i64> {
    stored(shop, &PRODUCT, product).and_then(|row| row.get("price").and_then(Value::as_i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::*;
    use crate::generators::{product_edit_strategy, products_strategy, ProductEdit, PropTestConfig};
    use crate::logging::init_tracing;
    use entimap_core::{
        entity_cache_key, entity_ref, query_tag, Config, CoreError, CoreResult, DomainEvent,
        Entity, EntityBuilder, EntityId, EntityManager, MODIFIED_FIELD,
    };
    use entimap_storage::{Filter, FindOptions, Statement, StorageError};
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn position(statements: &[Statement], predicate: impl Fn(&Statement) -> bool) -> usize {
        statements.iter().position(predicate).unwrap()
    }

    #[test]
    fn repository_returns_one_instance_per_id() {
        init_tracing();
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        shop.flush().unwrap();
        let id = product.entity_id().unwrap();
        shop.clear(None);

        let products = shop.get_repository::<Product>().unwrap();
        let first = products.find(id).unwrap().unwrap();
        let second = products.find(id).unwrap().unwrap();
        let by_sku = products
            .find_one_by(&Filter::eq("sku", "L-1"))
            .unwrap()
            .unwrap();

        assert!(first.same_instance(&second));
        assert!(first.same_instance(&by_sku));
        assert!(!first.same_instance(&product));
        assert_eq!(shop.unit_of_work().entities_count(), 1);
    }

    #[test]
    fn changed_member_touches_aggregate_root() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        shop.flush().unwrap();
        assert!(product.borrow().modified().is_none());
        shop.store.clear_statements();

        let image = add_image(&product, "front.png").unwrap();
        assert!(shop.unit_of_work().is_tracked(&image));
        shop.flush().unwrap();

        assert!(product.borrow().modified().is_some());
        let writes = shop.store.writes();
        assert!(writes
            .iter()
            .any(|s| matches!(s, Statement::Update { table, .. } if table == "product")));
        assert!(writes
            .iter()
            .any(|s| matches!(s, Statement::Insert { table, .. } if table == "product_image")));
        assert!(stored(&shop, &PRODUCT_IMAGE, &image).is_some());
    }

    #[test]
    fn unchanged_entities_are_not_written() {
        let shop = TestShop::new();
        create_product(&shop, "L-1", 100);
        shop.flush().unwrap();
        shop.store.clear_statements();

        shop.flush().unwrap();

        assert!(shop.store.writes().is_empty());
    }

    #[test]
    fn foreign_key_checks_bracket_updates_and_inserts() {
        let shop = TestShop::new();
        let category = shop
            .persist(PersistTarget::builder(Category::builder("Lights")))
            .unwrap();
        let category_id = category.entity_id().unwrap();
        let product = shop
            .persist(PersistTarget::builder(
                Product::builder("Lamp", "L-1", 100).category(category_id),
            ))
            .unwrap();
        let tag = shop.persist(PersistTarget::builder(Tag::builder("new"))).unwrap();
        tag_product(&product, &tag).unwrap();
        shop.store.clear_statements();

        shop.flush().unwrap();

        let statements = shop.store.statements();
        let off = position(&statements, |s| *s == Statement::SetForeignKeyChecks(false));
        let on = position(&statements, |s| *s == Statement::SetForeignKeyChecks(true));
        let insert = position(&statements, |s| matches!(s, Statement::Insert { .. }));
        let relation = position(&statements, |s| {
            matches!(s, Statement::InsertRelation { .. })
        });
        assert!(off < insert && insert < on);
        assert!(on < relation);
        assert!(shop.store.foreign_key_checks());
    }

    #[test]
    fn foreign_key_toggle_can_be_disabled() {
        let shop = TestShop::with_config(Config::new().toggle_foreign_key_checks(false));
        create_product(&shop, "L-1", 100);
        shop.store.clear_statements();

        shop.flush().unwrap();

        assert!(!shop
            .store
            .statements()
            .iter()
            .any(|s| matches!(s, Statement::SetForeignKeyChecks(_))));
    }

    #[test]
    fn relations_use_storage_assigned_ids() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        let tag = shop.persist(PersistTarget::builder(Tag::builder("sale"))).unwrap();
        assert!(tag.entity_id().is_none());
        tag_product(&product, &tag).unwrap();
        assert_eq!(shop.unit_of_work().relations_count(), 1);

        shop.flush().unwrap();

        let tag_id = tag.entity_id().unwrap();
        let links = shop.store.links(PRODUCT_TAG);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0]["tag_id"].as_u64(), Some(tag_id.as_u64()));
        assert_eq!(
            links[0]["product_id"].as_u64(),
            product.entity_id().map(EntityId::as_u64)
        );
        assert_eq!(shop.unit_of_work().relations_count(), 0);
        let tracked = shop.unit_of_work().load(tag_id, "Tag").unwrap();
        assert!(tracked.same_instance(&tag));

        untag_product(&product, &tag).unwrap();
        shop.flush().unwrap();
        assert!(shop.store.links(PRODUCT_TAG).is_empty());
    }

    #[test]
    fn duplicate_link_rolls_back_flush() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        let tag = shop.persist(PersistTarget::builder(Tag::builder("sale"))).unwrap();
        tag_product(&product, &tag).unwrap();
        shop.flush().unwrap();

        tag_product(&product, &tag).unwrap();
        let err = shop.flush().unwrap_err();

        assert!(err.is_duplicate_entry());
        assert_eq!(shop.unit_of_work().relations_count(), 1);
        assert_eq!(shop.store.links(PRODUCT_TAG).len(), 1);
    }

    #[test]
    fn failed_flush_rolls_back_and_retry_succeeds() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        shop.flush().unwrap();

        product.borrow_mut_as::<Product>().unwrap().price = 150;
        let tag = shop.persist(PersistTarget::builder(Tag::builder("sale"))).unwrap();
        shop.store.fail_on(
            |s| matches!(s, Statement::Insert { table, .. } if table == "tag"),
            StorageError::statement("disk full", None),
        );

        let err = shop.flush().unwrap_err();
        assert!(matches!(err, CoreError::Storage(StorageError::Statement { .. })));
        assert!(!shop.is_locked());
        assert!(shop.store.foreign_key_checks());
        assert_eq!(stored_price(&shop, &product), Some(100));
        assert!(product.borrow().is_changed());
        assert!(tag.borrow().metadata().state().is_new());
        assert!(tag.entity_id().is_none());
        assert!(shop.unit_of_work().is_tracked(&tag));
        assert_eq!(shop.stats().flushes_rolled_back(), 1);

        shop.flush().unwrap();
        assert_eq!(stored_price(&shop, &product), Some(150));
        assert_eq!(shop.store.rows("tag").len(), 1);
        assert!(!product.borrow().is_changed());
    }

    #[test]
    fn update_writes_only_changed_columns() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        shop.flush().unwrap();
        shop.store.clear_statements();

        product.borrow_mut_as::<Product>().unwrap().price = 120;
        shop.flush().unwrap();

        let id = product.entity_id().unwrap().as_u64();
        let changes = entimap_storage::Row::from([("price".to_string(), Value::from(120))]);
        assert_eq!(
            shop.store.writes(),
            vec![Statement::Update {
                table: "product".to_string(),
                id,
                changes,
            }]
        );
    }

    #[test]
    fn duplicate_key_during_update_restores_processed_entities() {
        let shop = TestShop::new();
        create_product(&shop, "L-1", 100);
        let second = create_product(&shop, "L-2", 100);
        let third = create_product(&shop, "L-3", 100);
        shop.flush().unwrap();

        shop.remove(&third, false).unwrap();
        second.borrow_mut_as::<Product>().unwrap().sku = "L-1".to_string();
        let err = shop.flush().unwrap_err();

        assert!(err.is_duplicate_entry());
        assert!(!shop.is_locked());
        assert!(shop.unit_of_work().is_tracked(&third));
        assert!(third.borrow().should_remove());
        assert_eq!(shop.store.rows("product").len(), 3);

        second.borrow_mut_as::<Product>().unwrap().sku = "L-4".to_string();
        shop.flush().unwrap();
        assert_eq!(shop.store.rows("product").len(), 2);
        assert!(!shop.unit_of_work().is_tracked(&third));
    }

    #[test]
    fn restricted_delete_rolls_back_until_dependents_go() {
        let shop = TestShop::new();
        let category = shop
            .persist(PersistTarget::builder(Category::builder("Lights")))
            .unwrap();
        let product = shop
            .persist(PersistTarget::builder(
                Product::builder("Lamp", "L-1", 100).category(category.entity_id().unwrap()),
            ))
            .unwrap();
        shop.flush().unwrap();

        shop.remove(&category, false).unwrap();
        let err = shop.flush().unwrap_err();
        assert!(matches!(err, CoreError::Storage(StorageError::ForeignKey { .. })));
        assert!(stored(&shop, &CATEGORY, &category).is_some());
        assert!(category.borrow().should_remove());

        shop.remove(&product, false).unwrap();
        shop.remove(&category, false).unwrap();
        shop.flush().unwrap();
        assert!(shop.store.rows("category").is_empty());
        assert!(shop.store.rows("product").is_empty());
        assert_eq!(shop.unit_of_work().entities_count(), 0);
    }

    #[test]
    fn removing_root_detaches_its_members() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        let image = add_image(&product, "front.png").unwrap();
        shop.flush().unwrap();
        let hooks = Rc::new(RefCell::new(0));
        let count = Rc::clone(&hooks);
        product
            .borrow_mut()
            .on_remove(Rc::new(move |_: &EntityRef| -> CoreResult<()> {
                *count.borrow_mut() += 1;
                Ok(())
            }));

        discontinue(&product).unwrap();
        shop.flush().unwrap();

        assert_eq!(*hooks.borrow(), 1);

        assert!(shop.store.rows("product").is_empty());
        assert!(shop.store.rows("product_image").is_empty());
        assert!(!shop.unit_of_work().is_tracked(&product));
        assert!(!shop.unit_of_work().is_tracked(&image));
    }

    #[test]
    fn removed_member_is_deleted_alone() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        let front = add_image(&product, "front.png").unwrap();
        let back = add_image(&product, "back.png").unwrap();
        shop.flush().unwrap();

        remove_image(&product, &front).unwrap();
        shop.flush().unwrap();

        assert!(stored(&shop, &PRODUCT_IMAGE, &front).is_none());
        assert!(stored(&shop, &PRODUCT_IMAGE, &back).is_some());
        assert!(shop.unit_of_work().is_tracked(&product));
    }

    #[test]
    fn new_entity_removed_before_flush_is_never_written() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        shop.remove(&product, false).unwrap();
        shop.store.clear_statements();

        shop.flush().unwrap();

        assert!(shop.store.writes().is_empty());
        assert!(!shop.unit_of_work().is_tracked(&product));
    }

    #[test]
    fn events_from_hooks_during_flush_are_lock_violations() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        let tag = shop.persist(PersistTarget::builder(Tag::builder("sale"))).unwrap();
        let outcome: Rc<RefCell<Option<CoreError>>> = Rc::new(RefCell::new(None));
        let seen = Rc::clone(&outcome);
        let hook_tag = Rc::clone(&tag);
        product
            .borrow_mut()
            .on_save(Rc::new(move |saved: &EntityRef| -> CoreResult<()> {
                *seen.borrow_mut() = tag_product(saved, &hook_tag).err();
                Ok(())
            }));

        shop.flush().unwrap();

        assert!(outcome.borrow().as_ref().is_some_and(CoreError::is_lock_violation));
        assert_eq!(shop.stats().lock_violations(), 1);
        assert!(shop.store.links(PRODUCT_TAG).is_empty());
        tag_product(&product, &tag).unwrap();
    }

    #[test]
    fn published_creation_event_persists_entity() {
        let shop = TestShop::new();
        let category = entity_ref(Category::builder("Lights").build());

        shop.publisher()
            .publish(&DomainEvent::entity_created(Rc::clone(&category)))
            .unwrap();

        assert!(category.borrow().metadata().is_initialized());
        assert!(category.entity_id().is_some());
        shop.flush().unwrap();
        assert_eq!(shop.store.rows("category").len(), 1);
    }

    #[test]
    fn reads_go_through_the_entity_cache() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        shop.flush().unwrap();
        let id = product.entity_id().unwrap();
        let key = entity_cache_key(&PRODUCT, id);
        assert!(!shop.cache.contains(&key));
        shop.clear(None);

        let products = shop.get_repository::<Product>().unwrap();
        let loaded = products.find(id).unwrap().unwrap();
        assert!(shop.cache.contains(&key));
        shop.clear(None);
        shop.store.clear_statements();
        let hits = shop.cache.hits();
        let reloaded = products.find(id).unwrap().unwrap();
        assert!(shop.cache.hits() > hits);
        assert!(shop.store.statements().is_empty());
        assert!(!reloaded.same_instance(&loaded));

        reloaded.borrow_mut_as::<Product>().unwrap().price = 120;
        shop.flush().unwrap();
        assert!(!shop.cache.contains(&key));
    }

    #[test]
    fn optimized_imports_split_inserts_into_chunks() {
        let shop = TestShop::new();
        shop.optimize_imports(2);
        for name in ["a", "b", "c", "d", "e"] {
            shop.persist(PersistTarget::builder(Category::builder(name)))
                .unwrap();
        }
        shop.store.clear_statements();

        shop.flush().unwrap();

        let inserts = shop
            .store
            .writes()
            .into_iter()
            .filter(|s| matches!(s, Statement::Insert { table, .. } if table == "category"))
            .count();
        assert_eq!(inserts, 3);
        assert_eq!(shop.store.rows("category").len(), 5);
        assert_eq!(shop.stats().inserts(), 5);
    }

    #[test]
    fn remove_all_clears_rows_and_tracking() {
        let shop = TestShop::new();
        for label in ["a", "b", "c"] {
            shop.persist(PersistTarget::builder(Tag::builder(label)))
                .unwrap();
        }
        shop.flush().unwrap();

        assert_eq!(shop.remove_all("TAG").unwrap(), 3);
        assert!(shop.store.rows("tag").is_empty());
        assert!(shop.unit_of_work().entities_by_kind("Tag").is_empty());
        assert!(shop.remove_all("Unknown").is_err());
    }

    #[test]
    fn immediate_removal_skips_the_flush() {
        let shop = TestShop::new();
        let category = shop
            .persist(PersistTarget::builder(Category::builder("Lights")))
            .unwrap();
        shop.flush().unwrap();
        let removed = Rc::new(RefCell::new(0));
        let count = Rc::clone(&removed);
        shop.on_entity_removed(Rc::new(move |_: &EntityManager, _: &EntityRef| -> CoreResult<()> {
            *count.borrow_mut() += 1;
            Ok(())
        }));

        shop.remove(&category, true).unwrap();

        assert!(shop.store.rows("category").is_empty());
        assert!(!shop.unit_of_work().is_tracked(&category));
        assert_eq!(*removed.borrow(), 1);
    }

    #[test]
    fn unique_sku_conflict_is_a_duplicate_entry() {
        let shop = TestShop::new();
        create_product(&shop, "L-1", 100);
        create_product(&shop, "L-1", 200);

        let err = shop.flush().unwrap_err();

        assert!(err.is_duplicate_entry());
        assert!(shop.store.rows("product").is_empty());
        assert_eq!(shop.unit_of_work().entities_count(), 2);
    }

    #[test]
    fn removing_root_and_member_together_deletes_both() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        let image = add_image(&product, "front.png").unwrap();
        shop.flush().unwrap();
        let member_hooks = Rc::new(RefCell::new(0));
        let count = Rc::clone(&member_hooks);
        image
            .borrow_mut()
            .on_remove(Rc::new(move |_: &EntityRef| -> CoreResult<()> {
                *count.borrow_mut() += 1;
                Ok(())
            }));
        let removed = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&removed);
        shop.on_entity_removed(Rc::new(move |_: &EntityManager, e: &EntityRef| -> CoreResult<()> {
            seen.borrow_mut().push(e.entity_kind().name());
            Ok(())
        }));
        shop.store.clear_statements();

        discontinue(&product).unwrap();
        remove_image(&product, &image).unwrap();
        shop.flush().unwrap();

        assert_eq!(*member_hooks.borrow(), 1);
        assert_eq!(*removed.borrow(), vec!["Product", "ProductImage"]);
        assert!(shop
            .store
            .writes()
            .iter()
            .any(|s| matches!(s, Statement::Delete { table, .. } if table == "product_image")));
        assert!(shop.store.rows("product").is_empty());
        assert!(shop.store.rows("product_image").is_empty());
        assert_eq!(shop.unit_of_work().entities_count(), 0);
        assert_eq!(shop.stats().deletes(), 2);
    }

    #[test]
    fn changed_member_touches_untracked_root() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        let image = add_image(&product, "front.png").unwrap();
        shop.flush().unwrap();
        let product_id = product.entity_id().unwrap();
        let image_id = image.entity_id().unwrap();
        assert_eq!(stored(&shop, &PRODUCT, &product).unwrap()[MODIFIED_FIELD], Value::Null);
        shop.clear(None);

        let images = shop.get_repository::<ProductImage>().unwrap();
        let loaded = images.find(image_id).unwrap().unwrap();
        assert!(shop.unit_of_work().load(product_id, "Product").is_none());
        loaded.borrow_mut_as::<ProductImage>().unwrap().url = "back.png".to_string();
        shop.flush().unwrap();

        let root = shop.unit_of_work().load(product_id, "Product").unwrap();
        assert!(root.borrow().modified().is_some());
        assert!(!root.borrow().is_changed());
        assert!(stored(&shop, &PRODUCT, &root).unwrap()[MODIFIED_FIELD].is_string());
        assert_eq!(
            stored(&shop, &PRODUCT_IMAGE, &loaded).unwrap()["url"],
            Value::from("back.png")
        );
    }

    #[test]
    fn relation_touches_both_endpoints() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        let tag = shop.persist(PersistTarget::builder(Tag::builder("sale"))).unwrap();
        shop.flush().unwrap();
        shop.store.clear_statements();

        tag_product(&product, &tag).unwrap();
        shop.flush().unwrap();

        assert!(product.borrow().modified().is_some());
        assert!(tag.borrow().modified().is_some());
        let writes = shop.store.writes();
        for table in ["product", "tag"] {
            assert!(
                writes
                    .iter()
                    .any(|s| matches!(s, Statement::Update { table: t, .. } if t == table)),
                "no update of {table}"
            );
        }
        assert!(stored(&shop, &TAG, &tag).unwrap()[MODIFIED_FIELD].is_string());
    }

    #[test]
    fn min_identity_applies_to_every_sequence() {
        let shop = TestShop::with_config(Config::new().min_identity(1000));
        let product = create_product(&shop, "L-1", 100);
        let tag = shop.persist(PersistTarget::builder(Tag::builder("sale"))).unwrap();
        assert_eq!(product.entity_id(), Some(EntityId::new(1000)));
        shop.flush().unwrap();

        assert_eq!(tag.entity_id(), Some(EntityId::new(1000)));
        let second = create_product(&shop, "L-2", 100);
        assert_eq!(second.entity_id(), Some(EntityId::new(1001)));
        assert_eq!(
            shop.get_repository::<Product>().unwrap().next_identity().unwrap(),
            EntityId::new(1002)
        );
    }

    #[test]
    fn stored_relations_are_readable_per_entity() {
        let shop = TestShop::new();
        let product = create_product(&shop, "L-1", 100);
        let sale = shop.persist(PersistTarget::builder(Tag::builder("sale"))).unwrap();
        let new = shop.persist(PersistTarget::builder(Tag::builder("new"))).unwrap();
        tag_product(&product, &sale).unwrap();
        tag_product(&product, &new).unwrap();
        shop.flush().unwrap();
        let product_id = product.entity_id().unwrap();

        let products = shop.get_repository::<Product>().unwrap();
        assert_eq!(
            products.relation_ids::<Tag>(PRODUCT_TAG, product_id).unwrap(),
            vec![sale.entity_id().unwrap(), new.entity_id().unwrap()]
        );
        let related = products.related::<Tag>(PRODUCT_TAG, product_id).unwrap();
        assert!(related[0].same_instance(&sale));
        assert!(related[1].same_instance(&new));
        assert!(shop
            .cache
            .contains(&format!("{}/product_id={};", query_tag(PRODUCT_TAG), product_id)));

        untag_product(&product, &sale).unwrap();
        shop.flush().unwrap();
        let rows = products.relations(PRODUCT_TAG, product_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["tag_id"].as_u64(), new.entity_id().map(EntityId::as_u64));
    }

    #[test]
    fn projections_and_bulk_updates_bypass_tracking() {
        let shop = TestShop::new();
        let lamp = create_product(&shop, "L-1", 100);
        create_product(&shop, "L-2", 100);
        create_product(&shop, "L-3", 300);
        shop.flush().unwrap();

        let products = shop.get_repository::<Product>().unwrap();
        let skus = products
            .find_field_by("sku", &Filter::eq("price", 100), &FindOptions::new())
            .unwrap();
        assert_eq!(skus, vec![Value::from("L-1"), Value::from("L-2")]);
        let fields = products
            .find_fields(lamp.entity_id().unwrap(), &["name", "price"])
            .unwrap()
            .unwrap();
        assert_eq!(fields.len(), 2);

        let changes = entimap_storage::Row::from([("price".to_string(), Value::from(90))]);
        assert_eq!(products.update_many(&Filter::eq("price", 100), changes).unwrap(), 2);
        assert_eq!(stored_price(&shop, &lamp), Some(90));
        assert_eq!(lamp.borrow_as::<Product>().unwrap().price, 100);
        let found = products
            .find_in("sku", &[Value::from("L-3"), Value::from("L-1")])
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].same_instance(&lamp));
    }

    fn apply(shop: &TestShop, product: &EntityRef, edit: &ProductEdit) {
        match edit {
            ProductEdit::Reprice(price) => product.borrow_mut_as::<Product>().unwrap().price = *price,
            ProductEdit::Rename(name) => {
                product.borrow_mut_as::<Product>().unwrap().name = name.clone();
            }
            ProductEdit::Remove => shop.remove(product, false).unwrap(),
            ProductEdit::Keep => {}
        }
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn storage_matches_tracked_state_after_flush(
            builders in products_strategy(6),
            edits in prop::collection::vec(product_edit_strategy(), 6),
        ) {
            let shop = TestShop::new();
            let products: Vec<EntityRef> = builders
                .into_iter()
                .map(|b| shop.persist(PersistTarget::builder(b)).unwrap())
                .collect();
            shop.flush().unwrap();
            prop_assert_eq!(shop.store.rows("product").len(), products.len());

            for (product, edit) in products.iter().zip(&edits) {
                apply(&shop, product, edit);
            }
            shop.flush().unwrap();

            let mut kept = 0;
            for (product, edit) in products.iter().zip(&edits) {
                let row = stored(&shop, &PRODUCT, product);
                if *edit == ProductEdit::Remove {
                    prop_assert!(row.is_none());
                    prop_assert!(!shop.unit_of_work().is_tracked(product));
                } else {
                    kept += 1;
                    let row = row.unwrap();
                    let entity = product.borrow_as::<Product>().unwrap();
                    prop_assert_eq!(row["price"].as_i64(), Some(entity.price));
                    prop_assert_eq!(row["name"].as_str(), Some(entity.name.as_str()));
                    prop_assert!(!entity.is_changed());
                }
            }
            prop_assert_eq!(shop.unit_of_work().entities_count(), kept);
            prop_assert!(!shop.is_locked());
        }
    }
}
