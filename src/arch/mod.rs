//! # Architecture Support
//!
//! Hardware glue for bare-metal targets. The kernel core is
//! target-independent and runs anywhere; only the tick source and the
//! console are hardware, and both reach the kernel through the
//! [`Platform`](crate::exec::Platform) trait. This module holds the
//! pieces a board support layer wires into that trait.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m;
