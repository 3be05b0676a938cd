//! Cartkeeper cart consistency service.
//!
//! Keeps a client's cart consistent across three collaborators: the
//! relational store of record, a cache mirror of cart snapshots, and an
//! event channel fed through a transactional outbox.
//!
//! # Layout
//!
//! - [`db`] - Store-of-record gateway (`PostgreSQL` and in-memory)
//! - [`cache`] - Cart snapshot cache mirror
//! - [`services`] - Cart engine, checkout settlement, catalog lookups
//! - [`outbox`] - Event payloads, publishers and the delivery poller
//! - [`routes`] - axum HTTP surface

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod outbox;
pub mod routes;
pub mod services;
pub mod state;
