// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll kqueue reregister deregister

use super::{ReadyFds, Reactor};
use mio::{event::Source, unix::SourceFd, Events, Interest, Poll, Token};
use std::{collections::HashMap,
          io,
          os::unix::io::RawFd,
          time::Duration};

const EVENT_CAPACITY: usize = 256;

/// Native-event-library reactor: `epoll` on Linux, `kqueue` on macOS.
///
/// Registrations persist across calls; each poll diffs the requested sets
/// against the currently registered ones and issues the minimal set of
/// register / reregister / deregister syscalls. The token is the raw fd, so
/// no separate slab is needed.
pub struct MioReactor {
    poll: Poll,
    events: Events,
    registered: HashMap<RawFd, Interest>,
}

impl std::fmt::Debug for MioReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MioReactor")
            .field("registered", &self.registered.len())
            .finish()
    }
}

impl MioReactor {
    pub fn new() -> io::Result<Self> {
        Ok(MioReactor {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            registered: HashMap::new(),
        })
    }

    fn sync_registrations(
        &mut self,
        read_fds: &[RawFd],
        write_fds: &[RawFd],
    ) -> io::Result<()> {
        let mut desired: HashMap<RawFd, Interest> = HashMap::new();
        for fd in read_fds {
            desired
                .entry(*fd)
                .and_modify(|interest| *interest = interest.add(Interest::READABLE))
                .or_insert(Interest::READABLE);
        }
        for fd in write_fds {
            desired
                .entry(*fd)
                .and_modify(|interest| *interest = interest.add(Interest::WRITABLE))
                .or_insert(Interest::WRITABLE);
        }

        let registry = self.poll.registry();

        // Drop registrations that are no longer requested.
        let stale: Vec<RawFd> = self
            .registered
            .keys()
            .filter(|fd| !desired.contains_key(fd))
            .copied()
            .collect();
        for fd in stale {
            SourceFd(&fd).deregister(registry)?;
            self.registered.remove(&fd);
        }

        // Add new ones, adjust changed ones.
        for (fd, interest) in desired {
            match self.registered.get(&fd).copied() {
                None => {
                    SourceFd(&fd).register(registry, Token(fd as usize), interest)?;
                    self.registered.insert(fd, interest);
                }
                Some(current) if current != interest => {
                    SourceFd(&fd).reregister(registry, Token(fd as usize), interest)?;
                    self.registered.insert(fd, interest);
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl Reactor for MioReactor {
    fn poll(
        &mut self,
        read_fds: &[RawFd],
        write_fds: &[RawFd],
        timeout: Duration,
    ) -> io::Result<ReadyFds> {
        self.sync_registrations(read_fds, write_fds)?;

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            // Signal interruption is a spurious wake.
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                return Ok(ReadyFds::default());
            }
            Err(err) => return Err(err),
        }

        let mut ready = ReadyFds::default();
        for event in self.events.iter() {
            let fd = event.token().0 as RawFd;
            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            let writable = event.is_writable() || event.is_write_closed() || event.is_error();
            if readable && read_fds.contains(&fd) {
                ready.read.push(fd);
            }
            if writable && write_fds.contains(&fd) {
                ready.write.push(fd);
            }
        }
        Ok(ready)
    }
}
