//! `prism` instruments a Rust project's call graph and turns it into a
//! source-level profiler: point it at a project and a handful of target
//! function names, and it produces an instrumented copy that records
//! per-function timing and invocation statistics for every function
//! reachable from those targets. Once the instrumented program has run,
//! captured profiles can be loaded, correlated across runs, and rendered as
//! a side-by-side comparison table with speedup annotations.
//!
//! The pipeline has three stages:
//!
//! 1. [`analyzer`] parses the project with `syn` and walks the static call
//!    graph outward from the user's targets.
//! 2. [`patcher`] rewrites the discovered functions (and the program entry
//!    point) to call into [`profiler`], and re-serializes the patched
//!    sources with `prettyplease`.
//! 3. At runtime the instrumented binary drives [`profiler`], which hands
//!    finished [`tree::Profile`] trees to a [`sink::Sink`]; later,
//!    [`correlate`] and [`display`] turn two or more captured profiles into
//!    a diff table.
//!
//! Patched source calls the four functions re-exported in [`prelude`]
//! directly -- there is no proc-macro layer, because the source patcher
//! itself is the instrumentation mechanism.
//!
//! ```
//! use prism::prelude::*;
//!
//! fn g() {
//!     enter("pkg.g");
//!     let _guard = leave_guard();
//! }
//!
//! fn f() {
//!     begin_profile("pkg.f");
//!     let _guard = end_profile_guard();
//!     g();
//! }
//!
//! # fn main() {
//! let _ = init(prism::sink::FileSink::new(std::env::temp_dir()), None);
//! f();
//! let _ = shutdown();
//! # }
//! ```

pub mod analyzer;
pub mod correlate;
pub mod display;
pub mod error;
pub mod patcher;
pub mod profiler;
pub mod sink;
pub mod stats;
pub mod tree;

/// The handful of names patched source and CLI callers need most often.
pub mod prelude {
    pub use crate::error::{PrismError, Result};
    pub use crate::profiler::{
        begin_profile, end_profile, end_profile_guard, enter, init, leave, leave_guard, shutdown,
        shutdown_guard,
    };
    pub use crate::sink::FileSink;
}
