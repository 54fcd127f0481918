//! # entimap Testkit
//!
//! Test utilities for entimap.
//!
//! This crate provides:
//! - A small shop domain (categories, products with images, tags)
//! - Fixtures wiring an entity manager to an in-memory store
//! - End-to-end flush scenarios and helpers for inspecting storage
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust
//! use entimap_testkit::prelude::*;
//!
//! with_shop(|shop| {
//!     let product = shop.persist(PersistTarget::builder(Product::builder("Lamp", "L-1", 1999)))
//!         .unwrap();
//!     shop.flush().unwrap();
//!     assert_eq!(shop.store.rows("product").len(), 1);
//!     assert!(product.borrow().metadata().state().is_persisted());
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod domain;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::domain::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::logging::*;
    pub use entimap_core::{Entity, EntityRef, EntityRefExt, PersistTarget};
}

pub use domain::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use logging::*;
