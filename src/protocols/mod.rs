//! Protocol implementations.
//!
//! Each protocol has a codec module used by the runtime event loop.
//!
//! - `reverse`: newline-framed lines answered with their bytes reversed

pub mod reverse;
