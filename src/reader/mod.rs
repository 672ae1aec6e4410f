//! Comic page navigation core: which page is current, how progress maps to pages,
//! two-page spreads, preloading, and keeping the server's stored position in sync.

pub mod context;
pub mod debounce;
pub mod navigator;
pub mod page_cache;
pub mod preload;
pub mod progress_sync;
pub mod session;
pub mod spread;
pub mod virtual_list;
pub mod visible;

pub use context::{BookContext, ReadingMode};
pub use navigator::{JumpOutcome, NavigationState, PageChange, PageNavigator};
pub use page_cache::PageCache;
pub use progress_sync::{ProgressSync, ProgressWrite, SyncPhase};
pub use session::{LoadState, ReaderSession, SessionOptions};
pub use spread::{PageDimensions, SpreadDetector};
