//! # entimap Storage
//!
//! Row model and storage contracts for entimap.
//!
//! This crate is the lowest layer of the workspace. It knows about tables,
//! rows and join tables, but nothing about entities, identity maps or
//! change tracking.
//!
//! ## Contracts
//!
//! - [`Mapper`] - row-level access to one table (the SQL mapper seam)
//! - [`Connection`] - transaction boundary and foreign-key switch
//!
//! ## Available Backends
//!
//! - [`MemoryStore`] - an in-memory relational store with sequences, unique
//!   keys, foreign keys, join tables, transactions and a statement log
//!
//! ## Example
//!
//! ```rust
//! use entimap_storage::{Connection, Mapper, MemoryStore, Row, TableSchema, Value};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.create_table(TableSchema::new("product").unique("sku"));
//!
//! let products = store.mapper("product");
//! let mut row = Row::new();
//! row.insert("sku".into(), Value::from("A-1"));
//!
//! store.begin().unwrap();
//! let id = products.insert(row).unwrap();
//! store.commit().unwrap();
//!
//! assert!(products.find(id).unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod mapper;
mod memory;
mod query;
mod row;
mod statement;

pub use connection::Connection;
pub use error::{StorageError, StorageResult};
pub use mapper::Mapper;
pub use memory::{ForeignKey, MemoryStore, OnDelete, TableMapper, TableSchema};
pub use query::{compare_values, Filter, FindOptions, SortOrder};
pub use row::{row_id, Row, RowId, Value, ID_COLUMN};
pub use statement::Statement;
