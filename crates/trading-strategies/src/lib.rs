//! Trading strategy implementations.
//!
//! This crate provides the alpha strategy: term-line golden-pit entries
//! confirmed by golden cross or main-force entry, with overbought,
//! resistance, take-profit and stop-loss exits.

mod alpha_strategy;

pub use alpha_strategy::{AlphaConfig, AlphaStrategy, SellReason, TermLineSettings};
