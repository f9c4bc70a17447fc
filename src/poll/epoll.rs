#![cfg(target_os = "linux")]

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;
use std::{cmp, i32};

use libc::{EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use super::{Event, PollBackend};
use crate::ready::Ready;
use crate::token::Token;

pub struct Epoll {
    epfd: RawFd,
    edge_triggered: bool,
}

impl Epoll {
    pub fn new(edge_triggered: bool) -> io::Result<Epoll> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Epoll {
            epfd,
            edge_triggered,
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: self.to_epoll(interest),
            u64: token.0 as u64,
        };
        syscall!(epoll_ctl(self.epfd, op, fd, &mut info))?;
        Ok(())
    }

    fn to_epoll(&self, interest: Ready) -> u32 {
        let mut kind = 0;
        if interest.is_readable() {
            kind |= EPOLLIN;
        }
        if interest.is_writable() {
            kind |= EPOLLOUT;
        }
        kind |= EPOLLRDHUP | EPOLLPRI;
        if self.edge_triggered {
            kind |= EPOLLET;
        }
        kind as u32
    }
}

impl PollBackend for Epoll {
    fn add(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    fn modify(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    fn remove(&self, fd: RawFd) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut info))?;
        Ok(())
    }

    fn wait(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|to| cmp::min(to.as_millis(), i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let mut raw = [libc::epoll_event { events: 0, u64: 0 }; 256];
        let count = syscall!(epoll_wait(
            self.epfd,
            raw.as_mut_ptr(),
            raw.len() as i32,
            timeout_ms
        ))?;

        for ev in &raw[..count as usize] {
            let bits = ev.events as i32;
            let mut readiness = Ready::empty();
            if bits & (EPOLLIN | EPOLLPRI) != 0 {
                readiness.insert(Ready::readable());
            }
            if bits & EPOLLOUT != 0 {
                readiness.insert(Ready::writable());
            }
            if bits & EPOLLERR != 0 {
                readiness.insert(Ready::error());
            }
            if bits & EPOLLHUP != 0 {
                readiness.insert(Ready::hup());
            }
            if bits & EPOLLRDHUP != 0 {
                readiness.insert(Ready::read_hangup());
            }
            events.push(Event::new(Token(ev.u64 as usize), readiness));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "epoll"
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}
