//! Data producer - creates a shared ring buffer and streams bytes into it.
//!
//! Run this first, then start the consumer in another terminal:
//! ```bash
//! cargo run --example producer
//! cargo run --example consumer
//! ```

use shmring_core::{AccessMode, MemoryGuard, RingBufferController, SharedMemoryRegion};
use std::thread;
use std::time::Duration;

const RING_NAME: &str = "shmring_demo";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut ring = RingBufferController::create(RING_NAME, 4096, false)?;
    ring.map(AccessMode::ReadWrite, 0)?;
    println!(
        "Ring `{}` ready (created new: {}), capacity {} bytes",
        ring.name(),
        ring.created_new(),
        ring.capacity()?
    );

    for seq in 0u64.. {
        let message = format!("tick {seq}");
        {
            let guard = MemoryGuard::new(&ring)?;
            if guard.is_abandoned() {
                // A previous holder died mid-update; start from a clean ring.
                eprintln!("lock was abandoned, resetting the ring");
                ring.clear()?;
            }
            match ring.write(message.as_bytes()) {
                Ok(()) => println!("wrote {:?} ({} bytes free)", message, ring.max_to_write()?),
                Err(err) => println!("ring full, skipping: {err}"),
            }
        }
        thread::sleep(Duration::from_millis(500));
    }

    SharedMemoryRegion::unlink(RING_NAME)?;
    Ok(())
}
