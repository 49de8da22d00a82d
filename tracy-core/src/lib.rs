pub mod config;
pub mod db;
pub mod error;
pub mod ipc;
pub mod models;
pub mod store;

pub use config::TracyConfig;
pub use error::{StoreError, TracyError};
pub use ipc::{FeedFrame, SubscriberUpdate};
pub use models::{DomContext, HtmlLocationType, Request, Tracer, TracerEdit, TracerEvent, TracerEventBulk};
pub use store::{MemoryStore, PgStore, TracerStore};
