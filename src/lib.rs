//! Real-time ingestion and reconciliation core for a market-flow dashboard.
//!
//! Frames arrive on one stream connection ([`market_data::connection`]),
//! are routed by topic into the [`state::StateStore`]
//! ([`market_data::router`]) and are turned into display-ready
//! [`views::DerivedViews`].

pub mod config;
pub mod error;
pub mod market_data;
pub mod metrics;
pub mod state;
pub mod views;
pub mod watchlist;

pub use error::FeedError;
