//! Checked program that crashes with `SIGSEGV` after a few transitions.
//!
//! ## Usage:
//!
//! ```bash
//! cargo build --example crasher
//! cargo run -- run target/debug/examples/crasher
//! ```
//!
//! sonde reports the decisions that led to the crash and the stack at the
//! last decision point, and exits with status 2.

use sonde_protocol::app::{Client, TrackingAllocator};
use sonde_protocol::{ChannelError, CheckerMessage, DecisionPoint};

#[global_allocator]
static ALLOCATOR: TrackingAllocator = TrackingAllocator;

const STEPS_BEFORE_CRASH: u64 = 3;

fn main() -> Result<(), ChannelError>
{
    let client = Client::from_env()?;
    if client.ready()? == CheckerMessage::Terminate {
        return Ok(());
    }

    let mut buffer = vec![0u8; 32];
    for step in 0..STEPS_BEFORE_CRASH {
        buffer[step as usize] = 0xAA;
        let point = DecisionPoint::new(step, format!("wrote byte {step}"));
        if client.decision(point)? == CheckerMessage::Terminate {
            return Ok(());
        }
    }

    crash();
}

#[inline(never)]
fn crash() -> !
{
    // The default disposition ends the process with a core-dump signal, which
    // the checker sees as a crash.
    // SAFETY: resetting a disposition and raising a signal touch no Rust state.
    unsafe {
        libc::signal(libc::SIGSEGV, libc::SIG_DFL);
        libc::raise(libc::SIGSEGV);
    }
    std::process::abort();
}
