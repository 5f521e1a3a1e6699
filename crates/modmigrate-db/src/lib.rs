pub mod cache;
pub mod history;
pub mod ledger;

pub use cache::{Cache, MemoryCache};
pub use history::{GroupedHistory, HistoryCache, HistoryItem, HistoryView};
pub use ledger::{LedgerEntry, LedgerStore};
