//! Services module for business logic and integrations

pub mod callback;
pub mod payment;

pub use callback::CallbackProcessor;
pub use payment::{InitiatedPayment, PaymentService, ResultValues, StatusView, Transition};
