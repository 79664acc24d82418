//! Data consumer - attaches to an existing ring buffer and drains it.
//!
//! Start the producer first:
//! ```bash
//! cargo run --example producer
//! cargo run --example consumer
//! ```

use shmring_core::{AccessMode, MemoryGuard, RingBufferController};
use std::thread;
use std::time::Duration;

const RING_NAME: &str = "shmring_demo";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut ring = RingBufferController::open(RING_NAME)?;
    ring.map(AccessMode::ReadWrite, 0)?;
    println!("Attached to ring `{}`", ring.name());

    let mut buf = [0u8; 256];
    loop {
        let n = {
            let guard = MemoryGuard::new(&ring)?;
            if guard.is_abandoned() {
                eprintln!("lock was abandoned; contents may be inconsistent");
            }
            ring.read(&mut buf)?
        };
        if n == 0 {
            thread::sleep(Duration::from_millis(100));
            continue;
        }
        println!("read {} bytes: {}", n, String::from_utf8_lossy(&buf[..n]));
    }
}
