//! # Site Catalog
//!
//! Builds one unified, filterable, sortable catalog of "sites" from several
//! directories of rule plugins written in different formats, plus an
//! optional snapshot of an external catalog.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Adapters   │──▶│  Aggregator  │──▶│ Projections  │
//! │ native/legacy│   │ filter+sort  │   │ primary/tbox │
//! │ secondary/...│   └──────┬───────┘   └──────┬───────┘
//! └──────┬───────┘          │                  │
//!        │            ┌─────┴─────┐      ┌─────┴─────┐
//!        ▼            │   batch   │      │ CLI / HTTP│
//! ┌──────────────┐    └───────────┘      └───────────┘
//! │ header cache │
//! │   (SQLite)   │
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and feature toggles |
//! | [`models`] | Plugin files, headers, entries, subscriptions |
//! | [`error`] | Errors callers must tell apart |
//! | [`batch`] | Concurrent tasks with per-task outcomes |
//! | [`traits`] | Interpreter and header store seams |
//! | [`lua_runtime`] / [`interpreter`] | Sandboxed rule evaluation |
//! | [`header_cache`] | Fingerprinted header cache |
//! | [`adapter`] | Per-format enumeration and entry building |
//! | [`alias`] / [`linked`] | Alias expansion and the linked snapshot |
//! | [`app_template`] | Sites seeded from app-template plugins |
//! | [`subscription`] / [`filter`] / [`sort`] | Per-request shaping |
//! | [`aggregate`] | The merge pipeline |
//! | [`parses`] | Parse descriptors, lives, player overlay |
//! | [`projection`] | Primary and compact documents |
//! | [`server`] | HTTP endpoints |

pub mod adapter;
pub mod aggregate;
pub mod alias;
pub mod app_template;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod header_cache;
pub mod interpreter;
pub mod linked;
pub mod lua_runtime;
pub mod migrate;
pub mod models;
pub mod parses;
pub mod projection;
pub mod server;
pub mod sort;
pub mod sources;
pub mod subscription;
pub mod traits;
