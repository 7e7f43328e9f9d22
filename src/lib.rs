//! Live sports scoreboard polling client.
//!
//! Polls a public scoreboard API for one sport, decodes each payload into
//! typed [`ScoreEvent`]s, and publishes the latest successful result to
//! subscribers. One [`ScoreboardClient`] per league: the same client is
//! constructed with different sport paths instead of copying fetch code per
//! sport. Clients are fully independent of each other.
//!
//! A failed cycle (network, timeout, non-2xx, malformed body) never replaces
//! the last good snapshot; it is logged, recorded in
//! [`ScoreboardClient::last_error`], and superseded by the next cycle.
//!
//! ```no_run
//! use scorewatch::{League, ScoreboardClient};
//!
//! # async fn demo() {
//! let client = ScoreboardClient::for_league(League::Nba);
//!
//! let token = client.subscribe(|events| {
//!     for event in events.iter() {
//!         println!("{}", event.name);
//!     }
//! });
//!
//! client.start();
//! // ... scoreboard leaves the screen:
//! client.stop();
//! client.unsubscribe(token);
//! # }
//! ```

pub mod error;
pub mod model;
pub mod poller;
pub mod scoreboard;

pub use error::{DecodeError, FetchError};
pub use model::{
    Address, Broadcast, Competition, Competitor, Record, ScoreEvent, Status, StatusType, Team,
    Ticket, Venue,
};
pub use poller::{
    League, ScoreboardClient, Snapshot, SubscriptionToken, DEFAULT_HTTP_TIMEOUT,
    DEFAULT_POLL_INTERVAL,
};
pub use scoreboard::decode;
pub use scoreboard::source::{HttpSource, ScoreboardSource, DEFAULT_BASE_URL};
