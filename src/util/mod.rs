//! Small shared utilities: base64 helpers and human price parsing.

pub mod b64;
mod money_amount;

pub use money_amount::{MoneyAmount, MoneyAmountParseError};
