//! Cross-process integration tests
//!
//! fork() gives genuinely independent processes for the create-race,
//! shared-bytes and lock-abandonment behavior that in-process tests cannot
//! exercise. Children communicate results through their exit codes and leave
//! cleanup to the parent. Enable with `--features integration`.

#[cfg(all(test, feature = "integration"))]
mod integration {
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};
    use std::thread;
    use std::time::Duration;

    use shmring_core::{
        AccessMode, CreateOutcome, RingBufferController, ShareLock, SharedMemoryRegion,
    };

    fn unique_name(prefix: &str) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("{}_{}_{}", prefix, std::process::id(), ts)
    }

    fn exit_code(status: WaitStatus) -> i32 {
        match status {
            WaitStatus::Exited(_, code) => code,
            other => panic!("child did not exit normally: {other:?}"),
        }
    }

    const CODE_CREATED_NEW: i32 = 10;
    const CODE_CREATED_EXISTING: i32 = 11;
    const CODE_FAILED: i32 = 12;

    /// Two processes race to create the same name: exactly one CreatedNew,
    /// the other CreatedExisting, and both end up on the same bytes.
    #[test]
    fn create_race_yields_one_winner_and_shared_bytes() {
        let name = unique_name("shmring_it_race");

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                // open_if_created = true keeps the racer from zeroing bytes
                // the other side may already have written.
                let code = match SharedMemoryRegion::create(&name, 1024, true) {
                    Ok(mut region) => {
                        let outcome = region.create_outcome();
                        if region.map(AccessMode::ReadWrite, 0).is_err() {
                            std::process::exit(CODE_FAILED);
                        }
                        region.lock().unwrap();
                        region.as_mut_slice().unwrap()[0] = 0xCD;
                        region.unlock().unwrap();
                        match outcome {
                            Some(CreateOutcome::CreatedNew) => CODE_CREATED_NEW,
                            Some(CreateOutcome::CreatedExisting) => CODE_CREATED_EXISTING,
                            None => CODE_FAILED,
                        }
                    }
                    Err(_) => CODE_FAILED,
                };
                std::process::exit(code);
            }
            ForkResult::Parent { child } => {
                let mut region = SharedMemoryRegion::create(&name, 1024, true).unwrap();
                let mine = region.create_outcome().unwrap();
                region.map(AccessMode::ReadWrite, 0).unwrap();

                let theirs = exit_code(waitpid(child, None).unwrap());
                assert_ne!(theirs, CODE_FAILED, "child failed to create/map");

                // Exactly one winner.
                match mine {
                    CreateOutcome::CreatedNew => assert_eq!(theirs, CODE_CREATED_EXISTING),
                    CreateOutcome::CreatedExisting => assert_eq!(theirs, CODE_CREATED_NEW),
                }

                // Same underlying bytes: the child's marker is visible here.
                region.lock().unwrap();
                let marker = region.as_slice().unwrap()[0];
                region.unlock().unwrap();
                assert_eq!(marker, 0xCD);

                SharedMemoryRegion::unlink(&name).unwrap();
            }
        }
    }

    /// Scenario: process X creates and writes, process Y opens and reads the
    /// exact bytes through the ring.
    #[test]
    fn ring_stream_crosses_process_boundary() {
        let name = unique_name("shmring_it_stream");

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                // Reader side: wait for the producer's segment to appear and
                // its header to be initialized, then drain under the lock.
                let mut attempts = 0;
                let ring = loop {
                    let attached = RingBufferController::open(&name)
                        .and_then(|mut ring| ring.map(AccessMode::ReadWrite, 0).map(|()| ring));
                    match attached {
                        Ok(ring) => break ring,
                        Err(_) => {
                            attempts += 1;
                            if attempts > 100 {
                                std::process::exit(CODE_FAILED);
                            }
                            thread::sleep(Duration::from_millis(20));
                        }
                    }
                };

                let mut buf = [0u8; 64];
                let mut attempts = 0;
                loop {
                    ring.lock().unwrap();
                    let n = ring.read(&mut buf).unwrap();
                    ring.unlock().unwrap();
                    if n > 0 {
                        if n == 5 && &buf[..5] == b"hello" {
                            std::process::exit(0);
                        }
                        std::process::exit(CODE_FAILED);
                    }
                    attempts += 1;
                    if attempts > 200 {
                        std::process::exit(CODE_FAILED);
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            }
            ForkResult::Parent { child } => {
                let mut ring = RingBufferController::create(&name, 1024, false).unwrap();
                assert!(ring.created_new());
                ring.map(AccessMode::ReadWrite, 0).unwrap();

                ring.lock().unwrap();
                ring.write(b"hello").unwrap();
                ring.unlock().unwrap();

                let status = exit_code(waitpid(child, None).unwrap());
                assert_eq!(status, 0, "reader child failed");

                SharedMemoryRegion::unlink(&name).unwrap();
            }
        }
    }

    /// A holder dying without unlocking surfaces as an abandoned acquisition
    /// exactly once, then normal acquisitions resume.
    #[cfg(target_os = "linux")]
    #[test]
    fn dead_holder_is_reported_abandoned_once() {
        let name = unique_name("shmring_it_abandon");
        let region = SharedMemoryRegion::create(&name, 256, false).unwrap();

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let holder = SharedMemoryRegion::open(&name).unwrap();
                if holder.lock().is_err() {
                    std::process::exit(CODE_FAILED);
                }
                // Die while holding: process::exit skips Drop, so nothing
                // releases the lock on the way out.
                std::process::exit(0);
            }
            ForkResult::Parent { child } => {
                let status = exit_code(waitpid(child, None).unwrap());
                assert_eq!(status, 0, "holder child failed to take the lock");

                region.lock().unwrap();
                assert!(
                    region.is_lock_abandoned(),
                    "acquisition after a dead holder must report abandonment"
                );
                region.unlock().unwrap();
                // Signal is tied to that one acquisition, not sticky.
                assert!(!region.is_lock_abandoned());

                region.lock().unwrap();
                assert!(!region.is_lock_abandoned());
                region.unlock().unwrap();

                SharedMemoryRegion::unlink(&name).unwrap();
            }
        }
    }
}
