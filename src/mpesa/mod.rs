//! Daraja (M-Pesa) gateway integration: OAuth token management, the STK
//! push/query client, wire types and phone number canonicalization.

pub mod client;
pub mod error;
pub mod phone;
pub mod token;
pub mod types;

pub use client::{DarajaClient, StkGateway};
pub use error::{MpesaError, MpesaResult};
pub use phone::PhoneNumber;
pub use token::TokenManager;
