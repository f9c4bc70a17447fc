use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::time::Duration;
use std::{cmp, i32};

use super::{Event, PollBackend};
use crate::ready::Ready;
use crate::token::Token;

/// POSIX `poll()` fallback backend. Interest is kept in a dense, index-free
/// vector of `pollfd`s; `fd_index` maps each registered fd to its slot so
/// add/modify/remove stay O(1) (removal swaps the last slot into the
/// removed one, so the vector never grows beyond the live registration
/// count).
pub struct Poll {
    state: Mutex<PollState>,
}

struct PollState {
    fds: Vec<libc::pollfd>,
    tokens: Vec<Token>,
    fd_index: HashMap<RawFd, usize>,
}

impl Poll {
    pub fn new() -> io::Result<Poll> {
        Ok(Poll {
            state: Mutex::new(PollState {
                fds: Vec::new(),
                tokens: Vec::new(),
                fd_index: HashMap::new(),
            }),
        })
    }
}

fn to_poll_events(interest: Ready) -> libc::c_short {
    let mut events = 0;
    if interest.is_readable() {
        events |= libc::POLLIN;
    }
    if interest.is_writable() {
        events |= libc::POLLOUT;
    }
    events as libc::c_short
}

impl PollBackend for Poll {
    fn add(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fd_index.contains_key(&fd) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "fd already registered"));
        }
        let idx = state.fds.len();
        state.fds.push(libc::pollfd {
            fd,
            events: to_poll_events(interest),
            revents: 0,
        });
        state.tokens.push(token);
        state.fd_index.insert(fd, idx);
        Ok(())
    }

    fn modify(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        let idx = *state
            .fd_index
            .get(&fd)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "fd not registered"))?;
        state.fds[idx].events = to_poll_events(interest);
        state.tokens[idx] = token;
        Ok(())
    }

    fn remove(&self, fd: RawFd) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        let idx = state
            .fd_index
            .remove(&fd)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "fd not registered"))?;
        let last = state.fds.len() - 1;
        state.fds.swap_remove(idx);
        state.tokens.swap_remove(idx);
        if idx != last {
            let moved_fd = state.fds[idx].fd;
            state.fd_index.insert(moved_fd, idx);
        }
        Ok(())
    }

    fn wait(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|to| cmp::min(to.as_millis(), i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let mut state = self.state.lock().unwrap();
        let count = syscall!(poll(
            state.fds.as_mut_ptr(),
            state.fds.len() as libc::nfds_t,
            timeout_ms
        ))?;

        if count == 0 {
            return Ok(());
        }

        for (pollfd, token) in state.fds.iter().zip(state.tokens.iter()) {
            if pollfd.revents == 0 {
                continue;
            }
            let revents = pollfd.revents as i32;
            let mut readiness = Ready::empty();
            if revents & libc::POLLIN != 0 {
                readiness.insert(Ready::readable());
            }
            if revents & libc::POLLOUT != 0 {
                readiness.insert(Ready::writable());
            }
            if revents & libc::POLLERR != 0 {
                readiness.insert(Ready::error());
            }
            if revents & libc::POLLHUP != 0 {
                readiness.insert(Ready::hup());
            }
            if revents & libc::POLLNVAL != 0 {
                readiness.insert(Ready::invalid());
            }
            events.push(Event::new(*token, readiness));
        }

        for pollfd in state.fds.iter_mut() {
            pollfd.revents = 0;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}
