//! x402 payment facilitator for Solana.
//!
//! The x402 protocol enables HTTP-native payments using the
//! `402 Payment Required` status code. This crate implements the facilitator
//! role for Solana: it issues machine-readable payment requirements, verifies
//! partially-signed SPL token transfers submitted by clients, co-signs them
//! as the gas-fee payer, and submits them on-chain, returning the transaction
//! signature as settlement proof.
//!
//! # Modules
//!
//! - [`config`] — environment-variable configuration, loaded once at startup.
//! - [`types`] — x402 wire types with camelCase JSON names.
//! - [`transaction`] — the Solana wire-format transaction codec: strict
//!   decoding of legacy and v0 payloads, canonical message bytes, and
//!   byte-exact re-serialization after co-signing.
//! - [`verify`] — pure structural verification of a candidate payment
//!   against stated requirements.
//! - [`facilitator`] — the settler owning the fee-payer keypair.
//! - [`rpc`] — a thin JSON-RPC client for the Solana node.
//! - [`handlers`] — the axum HTTP facade, including a demo protected
//!   resource exercising the whole 402 round trip.
//! - [`util`] — base64 helpers and human price parsing.

pub mod config;
pub mod facilitator;
pub mod handlers;
pub mod rpc;
pub mod transaction;
pub mod types;
pub mod util;
pub mod verify;
