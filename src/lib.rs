//! Dukapay backend library
//!
//! Core of the store's M-Pesa STK push integration: token management,
//! the Daraja gateway client, the payment transaction state machine and
//! the callback/polling reconciliation paths.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod mpesa;
pub mod orders;
pub mod services;
