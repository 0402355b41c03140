//! # Bomber Client Library
//!
//! Client-side synchronization engine for a real-time, room-based
//! multiplayer arena game. It keeps a local view of the match consistent with
//! an authoritative server while staying responsive to the player's input.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Movement and bomb placement are applied to the local state the moment the
//! player asks for them, and recorded in a bounded prediction ledger.
//!
//! ### Server Reconciliation
//! Authoritative snapshots overwrite the local view. The local player snaps
//! to the server position when the two disagree, and acknowledged
//! predictions are dropped from the ledger.
//!
//! ### Remote Interpolation
//! Other players are drawn a fraction of the way toward their latest
//! confirmed position each frame, but only while that sample is fresh.
//!
//! ## Module Organization
//!
//! - `network`, `link`, `reconnect`, `events`: one WebSocket connection with
//!   heartbeat, exponential-backoff reconnection and a typed event bus
//! - `store`, `actions`, `reducers`, `state`, `prediction`: the single
//!   source of truth and the closed set of transitions it accepts
//! - `simulation`, `input`, `ticker`: the fixed-rate frame loop
//! - `session`: the event loop that wires the above together
//! - `lobby`: HTTP room discovery and creation
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::network::ConnectionConfig;
//! use client::session::Session;
//! use client::simulation::LoopConfig;
//! use client::ticker::FrameTicker;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let loop_config = LoopConfig::default();
//! let ticker = FrameTicker::new(loop_config.tick_rate);
//! let mut session = Session::new(ConnectionConfig::default(), loop_config, ticker);
//!
//! session.connect("alice", "room_1").await?;
//! session.run().await;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod error;
pub mod events;
pub mod input;
pub mod link;
pub mod lobby;
pub mod network;
pub mod prediction;
pub mod reconnect;
pub mod reducers;
pub mod session;
pub mod simulation;
pub mod state;
pub mod store;
pub mod ticker;
