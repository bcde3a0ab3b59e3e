// Application layer: configuration, the single-writer ledger actor, and
// request dispatch shared by every transport.

pub mod app;
pub mod config;
pub mod dispatch;
pub mod handle;

pub use app::{spawn, AppState, LedgerCommand, LedgerUpdate};
pub use dispatch::{dispatch, update_message};
pub use handle::{AppError, LedgerHandle};
