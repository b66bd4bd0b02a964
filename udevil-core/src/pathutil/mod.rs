//! Component D: the path & mount-point manager.

pub mod canonical;
pub mod mountpoint;

pub use canonical::{canonicalize_hardened, recheck_unchanged};
