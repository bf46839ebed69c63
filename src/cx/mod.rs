//! Cancellation context threaded through blocking operations.
//!
//! Every blocking primitive in the crate has a `*_with(&Cx)` form. The
//! context carries a cancellation flag and an optional deadline; blocking
//! waits observe both and leave their wait queue cleanly when either fires.

#[allow(clippy::module_inception)]
mod cx;

pub use cx::Cx;
