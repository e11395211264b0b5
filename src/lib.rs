//! # wxrelay - Weather Station Console Relay
//!
//! wxrelay talks to a wired weather-station console over a serial link, pulls
//! its binary LOOP telemetry packets, decodes and range-checks them, and fans
//! every reading out to a local store and third-party weather networks.
//!
//! ## Features
//!
//! - **Console Link**: Wake/handshake state machine with a periodic `LPS` query cycle
//! - **Packet Decoding**: Marker search and fixed-layout decode, robust to fragmentation
//! - **Validation**: Ordered sanity rules plus per-field structural bounds
//! - **Delivery**: Independent per-target retry loops with exponential backoff
//! - **Targets**: JSON-lines or HTTP store, Windguru, Windy and Met Office WOW
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wxrelay::config::Config;
//! use wxrelay::server::StationServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let port = config.station.port.clone();
//!
//!     let mut server = StationServer::new(config).await?;
//!     server.connect_device(&port).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`station`] - Serial link, byte cache, packet locate/decode, link controller
//! - [`validation`] - Disregard rules and structural checks
//! - [`delivery`] - Dispatcher, retry policies and upload targets
//! - [`storage`] - Append-only observation sinks
//! - [`server`] - Task wiring and shutdown
//! - [`config`] - Configuration management and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Link Controller │ ← handshake, query cycle, byte cache
//! └─────────────────┘
//!          │ ValidatedObservation
//! ┌─────────────────┐
//! │   Dispatcher    │ ← structural gate, per-target retry loops
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Store / Uploads │ ← jsonl or http store, windguru, windy, metoffice
//! └─────────────────┘
//! ```

pub mod config;
pub mod delivery;
pub mod heartbeat;
pub mod logutil;
pub mod metrics;
pub mod observation;
pub mod server;
pub mod station;
pub mod storage;
pub mod validation;
