//! Entities persisted by the record stores and exchanged between services.

mod download;
mod errors;
mod hook;
mod metadata;
mod request;
pub mod view;

pub use download::{Download, Status, StatusUpdate};
pub use errors::{DownloadError, RequestError};
pub use hook::{Hook, HookResult};
pub use metadata::Metadata;
pub use request::{IncomingRequest, Request, ResourceKey, ValidationError};
pub use view::DownloadView;
