#![cfg(any(target_os = "solaris", target_os = "illumos"))]

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use super::{Event, PollBackend};
use crate::ready::Ready;
use crate::token::Token;

const PORT_SOURCE_FD: libc::c_int = 4;

pub struct EventPorts {
    port: RawFd,
}

impl EventPorts {
    pub fn new() -> io::Result<EventPorts> {
        let port = syscall!(port_create())?;
        Ok(EventPorts { port })
    }
}

fn to_events(interest: Ready) -> libc::c_int {
    let mut events = 0;
    if interest.is_readable() {
        events |= libc::POLLIN;
    }
    if interest.is_writable() {
        events |= libc::POLLOUT;
    }
    events
}

impl PollBackend for EventPorts {
    fn add(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        syscall!(port_associate(
            self.port,
            PORT_SOURCE_FD,
            fd as libc::uintptr_t,
            to_events(interest),
            token.0 as *mut libc::c_void
        ))?;
        Ok(())
    }

    fn modify(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        self.add(fd, token, interest)
    }

    fn remove(&self, fd: RawFd) -> io::Result<()> {
        syscall!(port_dissociate(self.port, PORT_SOURCE_FD, fd as libc::uintptr_t))?;
        Ok(())
    }

    fn wait(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let mut ts = timeout.map(|to| libc::timespec {
            tv_sec: to.as_secs() as libc::time_t,
            tv_nsec: to.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_mut()
            .map(|t| t as *mut libc::timespec)
            .unwrap_or(std::ptr::null_mut());

        let mut raw: Vec<libc::port_event> = Vec::with_capacity(256);
        let mut nget: u32 = 1;
        unsafe { raw.set_len(256) };

        let res = syscall!(port_getn(
            self.port,
            raw.as_mut_ptr(),
            raw.len() as u32,
            &mut nget,
            ts_ptr
        ));
        match res {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::TimedOut => return Ok(()),
            Err(err) => return Err(err),
        }

        for ev in &raw[..nget as usize] {
            let mut readiness = Ready::empty();
            let revents = ev.portev_events;
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
            events.push(Event::new(Token(ev.portev_user as usize), readiness));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "event_ports"
    }
}

impl AsRawFd for EventPorts {
    fn as_raw_fd(&self) -> RawFd {
        self.port
    }
}

impl Drop for EventPorts {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.port);
        }
    }
}
