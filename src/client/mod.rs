//! Client
//!
//! A normalized mirror of authority state that only changes through confirmed deltas,
//! plus the plumbing that feeds it: the push event bus, bootstrap and reconnect, the
//! thumbnail request batcher and the thumbnail fetcher.

pub mod action;
pub mod batcher;
pub mod bus;
pub mod reducer;
pub mod search;
pub mod state;
pub mod store;
pub mod sync;
pub mod thumbs;

pub use action::{Action, ActionPayload};
pub use batcher::{ThumbnailBatcher, ThumbnailSink};
pub use bus::{EventBus, SubscriptionId};
pub use reducer::reduce;
pub use state::{ClientState, EnvironmentState, MatchMode};
pub use store::ClientStateStore;
pub use sync::{action_for_push, bind_store, bootstrap, browse, snapshot, PushGate, SyncedClient};
pub use thumbs::{FetchHandle, ThumbnailFetcher};
