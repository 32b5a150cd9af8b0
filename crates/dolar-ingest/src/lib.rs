//! Dolar Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Two-stage pipeline that captures USD/COP quotes from Banco de la
//! República and loads them into MySQL.
//!
//! # Overview
//!
//! - **Fetcher** ([`ingest::fetcher`]): GET the API, store the response as
//!   `dolar-<unix-seconds>.json` in the raw bucket
//! - **Normalizer** ([`ingest::normalizer`]): triggered by the bucket's
//!   object-created event, recognizes the payload layout, validates each
//!   quote and upserts it into the `dolar` table
//! - **Storage** ([`storage`]) and **database** ([`db`]) sit behind traits so
//!   both stages run against in-memory backends in tests
//!
//! Both stages return a [`dolar_common::HandlerResponse`].

pub mod config;
pub mod db;
pub mod ingest;
pub mod storage;

pub use config::Config;
