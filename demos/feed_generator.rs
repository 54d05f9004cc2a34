//! Synthetic market data feed generator.
//!
//! Writes a framed binary tick stream to a file or stdout. Useful for
//! testing and benchmarking:
//!
//!   cargo run --example feed_generator -- /tmp/feed.bin 100000
//!   cargo run --example feed_generator -- stdout 1000 > feed.bin

use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};

use rand::Rng;
use tickfeed::protocol::{encode_heartbeat, encode_tick, pad_symbol};

const SYMBOLS: &[&str] = &["AAPL", "MSFT", "GOOG", "TSLA", "AMZN"];
const HEARTBEAT_EVERY: u64 = 1000;

fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().collect();

    let output_path = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "/tmp/feed_generator.bin".to_string());
    let message_count: u64 = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10_000);

    let mut output: Box<dyn Write> = if output_path == "stdout" {
        Box::new(BufWriter::new(io::stdout()))
    } else {
        Box::new(BufWriter::new(File::create(&output_path)?))
    };

    let mut rng = rand::thread_rng();
    let mut mid_prices: Vec<f32> = SYMBOLS.iter().map(|_| rng.gen_range(50.0..500.0)).collect();

    eprintln!("generating {} messages to {}", message_count, output_path);

    let mut timestamp: u64 = 1_700_000_000_000_000_000;
    for sequence in 1..=message_count {
        timestamp += rng.gen_range(1_000..50_000);

        if sequence % HEARTBEAT_EVERY == 0 {
            output.write_all(&encode_heartbeat(sequence, timestamp))?;
            continue;
        }

        let idx = rng.gen_range(0..SYMBOLS.len());
        // Random walk around the symbol's mid price.
        mid_prices[idx] += rng.gen_range(-0.25f32..0.25);
        mid_prices[idx] = mid_prices[idx].max(1.0);

        let symbol = pad_symbol(SYMBOLS[idx]);
        let volume = rng.gen_range(1..1000);
        output.write_all(&encode_tick(
            sequence,
            timestamp,
            &symbol,
            mid_prices[idx],
            volume,
        ))?;

        if sequence % 100_000 == 0 {
            eprintln!("generated {} messages", sequence);
        }
    }

    output.flush()?;
    eprintln!("feed generation complete: {} messages", message_count);
    Ok(())
}
