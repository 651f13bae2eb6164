//! Compile-time kernel configuration.
//!
//! A single source of truth for build-time constants. Values here are plain
//! consts; targets that need board-specific tuning override them at the
//! source level.

use crate::log::LogLevel;

/// Maximum number of CPUs supported by the kernel.
///
/// Per-CPU tables are statically sized by this value; the number of CPUs
/// actually online is reported by [`crate::percpu::cpu_count`].
pub const MAX_CPUS: usize = 8;

/// Maximum kernel log level (compile-time). Messages above this verbosity
/// are compiled out.
pub const MAX_LOG_LEVEL: LogLevel = LogLevel::Debug;

/// Project version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
