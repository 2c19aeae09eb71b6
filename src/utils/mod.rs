//! Internal utility types.
//!
//! Currently this only hosts [`RegisterSet`], the compact bit set used by the liveness
//! analysis and the budget-constrained inliner.

mod regset;

pub use regset::RegisterSet;
