//! php-fpm status scraping: address parsing, FastCGI transport, payload
//! repair, decoding, state reconciliation and the per-pool fan-out.

pub mod address;
pub mod fastcgi;
pub mod manager;
pub mod pool;
pub mod reconcile;
pub mod repair;
pub mod status;

pub use address::{AddressError, Scheme, ScrapeAddress};
pub use manager::{ManagerError, PoolManager};
pub use pool::{Pool, ScrapeError, ScrapeSettings, DEFAULT_SCRAPE_TIMEOUT};
pub use reconcile::{count_process_states, reconcile, CountMode, ProcessCounts, Reconciliation};
pub use repair::repair_payload;
pub use status::{decode_status, DecodeError, PoolStatus, ProcessSnapshot, ProcessState};
