#![cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use super::{Event, PollBackend};
use crate::ready::Ready;
use crate::token::Token;

pub struct Kqueue {
    kq: RawFd,
}

impl Kqueue {
    pub fn new() -> io::Result<Kqueue> {
        let kq = syscall!(kqueue())?;
        Ok(Kqueue { kq })
    }

    fn change(&self, fd: RawFd, interest: Ready, flags: u16) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);
        if interest.is_readable() || flags == libc::EV_DELETE {
            changes.push(kevent_for(fd, libc::EVFILT_READ, flags, 0));
        }
        if interest.is_writable() || flags == libc::EV_DELETE {
            changes.push(kevent_for(fd, libc::EVFILT_WRITE, flags, 0));
        }
        syscall!(kevent(
            self.kq,
            changes.as_ptr(),
            changes.len() as i32,
            std::ptr::null_mut(),
            0,
            std::ptr::null()
        ))?;
        Ok(())
    }
}

fn kevent_for(fd: RawFd, filter: i16, flags: u16, udata: isize) -> libc::kevent {
    libc::kevent {
        ident: fd as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: udata as *mut libc::c_void,
    }
}

impl PollBackend for Kqueue {
    fn add(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);
        if interest.is_readable() {
            changes.push(kevent_for(fd, libc::EVFILT_READ, libc::EV_ADD | libc::EV_RECEIPT, token.0 as isize));
        }
        if interest.is_writable() {
            changes.push(kevent_for(fd, libc::EVFILT_WRITE, libc::EV_ADD | libc::EV_RECEIPT, token.0 as isize));
        }
        syscall!(kevent(
            self.kq,
            changes.as_ptr(),
            changes.len() as i32,
            std::ptr::null_mut(),
            0,
            std::ptr::null()
        ))?;
        Ok(())
    }

    fn modify(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        self.remove(fd).ok();
        self.add(fd, token, interest)
    }

    fn remove(&self, fd: RawFd) -> io::Result<()> {
        self.change(fd, Ready::all(), libc::EV_DELETE)
    }

    fn wait(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let ts = timeout.map(|to| libc::timespec {
            tv_sec: to.as_secs() as libc::time_t,
            tv_nsec: to.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_ref()
            .map(|t| t as *const libc::timespec)
            .unwrap_or(std::ptr::null());

        let mut raw = vec![kevent_for(0, 0, 0, 0); 256];
        let count = syscall!(kevent(
            self.kq,
            std::ptr::null(),
            0,
            raw.as_mut_ptr(),
            raw.len() as i32,
            ts_ptr
        ))?;

        for ev in &raw[..count as usize] {
            let mut readiness = Ready::empty();
            if ev.filter == libc::EVFILT_READ {
                readiness.insert(Ready::readable());
            }
            if ev.filter == libc::EVFILT_WRITE {
                readiness.insert(Ready::writable());
            }
            if ev.flags & libc::EV_EOF != 0 {
                readiness.insert(Ready::hup());
            }
            if ev.flags & libc::EV_ERROR != 0 {
                readiness.insert(Ready::error());
            }
            events.push(Event::new(Token(ev.udata as usize), readiness));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "kqueue"
    }
}

impl AsRawFd for Kqueue {
    fn as_raw_fd(&self) -> RawFd {
        self.kq
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.kq);
        }
    }
}
