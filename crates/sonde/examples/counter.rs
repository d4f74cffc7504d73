//! Checked program that grows a heap-allocated list one element per transition.
//!
//! ## Usage:
//!
//! ```bash
//! cargo build --example counter
//! cargo run -- run --diff target/debug/examples/counter 5
//! ```
//!
//! Run on its own (without `SONDE_CHANNEL_FD`) it just prints the final list.

use sonde_protocol::app::{Client, TrackingAllocator};
use sonde_protocol::{ChannelError, CheckerMessage, DecisionPoint};

#[global_allocator]
static ALLOCATOR: TrackingAllocator = TrackingAllocator;

fn main() -> Result<(), ChannelError>
{
    let rounds: u64 = std::env::args().nth(1).and_then(|arg| arg.parse().ok()).unwrap_or(3);

    let client = match Client::from_env() {
        Ok(client) => Some(client),
        Err(_) => {
            eprintln!("Not started by sonde; running without decision points");
            None
        }
    };

    if let Some(client) = &client {
        if client.ready()? == CheckerMessage::Terminate {
            return Ok(());
        }
    }

    let mut values: Vec<Box<u64>> = Vec::new();
    for round in 0..rounds {
        values.push(Box::new(round * round));
        if let Some(client) = &client {
            let label = format!("pushed {} element(s)", values.len());
            if client.decision(DecisionPoint::new(round, label))? == CheckerMessage::Terminate {
                return Ok(());
            }
        }
    }

    let total: u64 = values.iter().map(|value| **value).sum();
    println!("sum of squares below {rounds}: {total}");

    if let Some(client) = &client {
        client.finished()?;
    }
    Ok(())
}
