//! orbita - realtime sync core for the ORBITA lead-management dashboard
//!
//! This crate provides:
//! - A gateway to the agent backend and a PostgREST-style bulk-fetch surface
//! - Scoped realtime subscriptions over a Phoenix channel websocket
//! - Live collections that merge change events into fetched snapshots
//! - Per-page view-state stores and the navigation/session shell
//! - An operator CLI that renders those stores to the terminal

pub mod app;
pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod live;
pub mod models;
pub mod notify;
pub mod progress;
pub mod realtime;
pub mod rest;
pub mod session;
pub mod shell;
pub mod storage;
pub mod views;

pub use config::Config;
pub use error::{Error, Result};
