//! Ingestion, change feed and fan-out

pub mod broadcast;
pub mod feed;
pub mod ingest;
pub mod poller;

pub use broadcast::{SubscriberRegistry, Subscription};
pub use feed::{ChangeFeed, ChangeSource};
pub use ingest::{Ingestor, PlayStore};
pub use poller::{NowPlayingPoller, RecentPoller};
