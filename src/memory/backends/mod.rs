/*!
 * Realm Backends
 * Concrete allocation strategies plugged into the realm framework
 */

pub mod blocks;
pub mod standard;
pub mod threads;
pub mod tracking;
pub mod trivial;

pub use blocks::{BlocksBackend, BLOCKS_IDENTITY};
pub use standard::{StandardBackend, STANDARD_IDENTITY};
pub use threads::{ThreadsBackend, THREADS_ACCT_IDENTITY, THREADS_IDENTITY};
pub use tracking::{TrackingBackend, TRACKING_IDENTITY};
pub use trivial::{TrivialBackend, TRIVIAL_IDENTITY};
