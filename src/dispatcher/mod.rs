//! # Dispatcher Module
//!
//! Runs a parsed request through the pipeline and always comes back with a response:
//!
//! 1. `RequestReceived` fires
//! 2. before-request middleware, in registration order (may short-circuit)
//! 3. router lookup, then the handler
//! 4. any error or panic from steps 2-3 goes to the error handler
//! 5. after-response middleware, in reverse registration order, on whatever response
//!    came out of steps 2-4
//!
//! If the error handler itself fails, a hard-coded 500 is returned and the double fault
//! is logged. Only the affected request sees it.

mod core;

pub use core::{Dispatcher, Handler};

#[cfg(test)]
mod tests;
