//! Flowstep
//!
//! Debuggable flow runtime. The engine lives in [`flowstep_core`]; this
//! crate adds logging setup and the `flowstep-inspect` archive tool.

pub mod logging;

pub use flowstep_core::*;
pub use logging::{init_logging, LogExt, LoggingConfig};
