//! Property-based test generators using proptest.

use crate::domain::{Product, ProductBuilder};
use proptest::prelude::*;

/// Strategy for product names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,12}").expect("Invalid regex")
}

/// Strategy for prices in cents.
pub fn price_strategy() -> impl Strategy<Value = i64> {
    0i64..1_000_000
}

/// Strategy for batches of product builders with distinct SKUs.
pub fn products_strategy(max: usize) -> impl Strategy<Value = Vec<ProductBuilder>> {
    prop::collection::vec((name_strategy(), price_strategy()), 1..=max.max(1)).prop_map(|items| {
        items
            .into_iter()
            .enumerate()
            .map(|(i, (name, price))| Product::builder(&name, &format!("SKU-{i}"), price))
            .collect()
    })
}

/// One step applied to a tracked product between flushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductEdit {
    /// Changes the price.
    Reprice(i64),
    /// Changes the name.
    Rename(String),
    /// Schedules the product for removal.
    Remove,
    /// Leaves the product as is.
    Keep,
}

/// Strategy for a single edit.
pub fn product_edit_strategy() -> impl Strategy<Value = ProductEdit> {
    prop_oneof![
        price_strategy().prop_map(ProductEdit::Reprice),
        name_strategy().prop_map(ProductEdit::Rename),
        Just(ProductEdit::Remove),
        Just(ProductEdit::Keep),
    ]
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a quick config for fast iteration.
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a thorough config for CI.
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to a proptest config.
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entimap_core::EntityBuilder;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn generated_skus_are_distinct(builders in products_strategy(8)) {
            let mut skus: Vec<String> = builders
                .into_iter()
                .map(|b| b.build().sku)
                .collect();
            let total = skus.len();
            skus.sort();
            skus.dedup();
            prop_assert_eq!(skus.len(), total);
        }

        #[test]
        fn generated_prices_are_non_negative(price in price_strategy()) {
            prop_assert!(price >= 0);
        }
    }
}
