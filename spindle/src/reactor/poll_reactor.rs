// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR revents pollfd

use super::{ReadyFds, Reactor};
use rustix::event::{poll, PollFd, PollFlags, Timespec};
use std::{collections::HashMap,
          io,
          os::unix::io::{BorrowedFd, RawFd},
          time::Duration};

/// `poll(2)`-backed reactor. Stateless between calls: the pollfd array is
/// rebuilt from the requested sets each time.
#[derive(Debug, Default)]
pub struct PollReactor;

impl PollReactor {
    #[must_use]
    pub fn new() -> Self { PollReactor }
}

impl Reactor for PollReactor {
    fn poll(
        &mut self,
        read_fds: &[RawFd],
        write_fds: &[RawFd],
        timeout: Duration,
    ) -> io::Result<ReadyFds> {
        // Merge the two directions: a descriptor watched for both gets one
        // pollfd entry with both flags.
        let mut interest: HashMap<RawFd, PollFlags> = HashMap::new();
        for fd in read_fds {
            *interest.entry(*fd).or_insert(PollFlags::empty()) |= PollFlags::IN;
        }
        for fd in write_fds {
            *interest.entry(*fd).or_insert(PollFlags::empty()) |= PollFlags::OUT;
        }

        // Keep the fd order stable so revents map back to descriptors.
        let entries: Vec<(RawFd, PollFlags)> =
            interest.into_iter().collect();
        let mut poll_fds: Vec<PollFd<'_>> = entries
            .iter()
            .map(|(fd, flags)| {
                // SAFETY: the caller owns these descriptors for the duration
                // of the poll call; they are only borrowed, never closed here.
                let borrowed = unsafe { BorrowedFd::borrow_raw(*fd) };
                PollFd::from_borrowed_fd(borrowed, *flags)
            })
            .collect();

        let timeout_spec = Timespec {
            tv_sec: timeout.as_secs() as i64,
            tv_nsec: i64::from(timeout.subsec_nanos()),
        };

        match poll(&mut poll_fds, Some(&timeout_spec)) {
            Ok(_) => {}
            // A signal interrupting the wait is a spurious wake, not an
            // error: report no readiness and let the loop re-derive its
            // deadline on the next tick.
            Err(rustix::io::Errno::INTR) => return Ok(ReadyFds::default()),
            Err(errno) => return Err(io::Error::from(errno)),
        }

        let mut ready = ReadyFds::default();
        for ((fd, flags), poll_fd) in entries.iter().zip(poll_fds.iter()) {
            let revents = poll_fd.revents();
            // HUP/ERR/NVAL surface as readiness in the direction(s) the
            // caller asked about, so the watcher observes EOF or failure
            // through its normal read/write path.
            let exceptional = revents
                .intersects(PollFlags::ERR | PollFlags::HUP | PollFlags::NVAL);
            if flags.contains(PollFlags::IN)
                && (revents.contains(PollFlags::IN) || exceptional)
            {
                ready.read.push(*fd);
            }
            if flags.contains(PollFlags::OUT)
                && (revents.contains(PollFlags::OUT) || exceptional)
            {
                ready.write.push(*fd);
            }
        }
        Ok(ready)
    }
}
