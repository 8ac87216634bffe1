//! Linux backend: `epoll` for readiness, `timerfd` for periodic timers and
//! `eventfd` for software wake sources.
//!
//! All sources are registered level-triggered for `EPOLLIN`.  Timers and
//! wake sources stay readable until acknowledged, which is what gives user
//! events their coalescing behaviour: several `signal_wake` calls between
//! two waits add up in the eventfd counter and are cleared by one read.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use super::{EVENTS_TO_PROCESS, ReadyBatch, Readiness, Reactor, Token};

/// Turn a `-1` syscall return into the thread's `errno`.
fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Take ownership of a freshly created descriptor so every early return
/// closes it.
fn owned(fd: libc::c_int) -> io::Result<OwnedFd> {
    let fd = cvt(fd)?;
    // SAFETY: `fd` was just returned by a successful syscall and is not
    // owned by anything else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Read the 8-byte counter every timerfd / eventfd exposes.
fn read_counter(fd: BorrowedFd<'_>) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    // SAFETY: `buf` is valid for 8 writable bytes for the whole call.
    let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
    if n == -1 {
        return Err(io::Error::last_os_error());
    }
    if n as usize != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short counter read ({n} bytes)"),
        ));
    }
    Ok(u64::from_ne_bytes(buf))
}

/// Timer periods arrive in milliseconds and are split into seconds and
/// nanoseconds.  A zero period would disarm the timerfd, so it is raised to
/// one millisecond.
fn period_spec(period_ms: u32) -> libc::timespec {
    let period_ms = period_ms.max(1);
    libc::timespec {
        tv_sec: (period_ms / 1000) as libc::time_t,
        tv_nsec: ((period_ms % 1000) as libc::c_long) * 1_000_000,
    }
}

pub(crate) struct Epoll {
    fd: OwnedFd,
}

impl Reactor for Epoll {
    fn new() -> io::Result<Self> {
        // SAFETY: plain syscall, no pointers involved.
        let fd = owned(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        Ok(Self { fd })
    }

    fn register(&self, fd: RawFd, token: Token) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLRDHUP) as u32,
            u64: token.0,
        };
        // SAFETY: `event` outlives the call; the kernel copies it.
        cvt(unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event) })?;
        Ok(())
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        // SAFETY: a null event pointer is permitted for EPOLL_CTL_DEL.
        cvt(unsafe {
            libc::epoll_ctl(
                self.fd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                core::ptr::null_mut(),
            )
        })?;
        Ok(())
    }

    fn wait(&self, ready: &mut ReadyBatch, timeout_ms: i64) -> io::Result<()> {
        ready.clear();

        let timeout = if timeout_ms < 0 {
            -1
        } else {
            timeout_ms.min(i64::from(libc::c_int::MAX)) as libc::c_int
        };

        let mut events = [libc::epoll_event { events: 0, u64: 0 }; EVENTS_TO_PROCESS];
        // SAFETY: `events` has room for EVENTS_TO_PROCESS entries and the
        // kernel writes at most that many.
        let n = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.as_mut_ptr(),
                EVENTS_TO_PROCESS as libc::c_int,
                timeout,
            )
        };

        if n == -1 {
            let err = io::Error::last_os_error();
            // A signal landing mid-wait is an empty pass, not a failure.
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for event in &events[..n as usize] {
            // Copy out of the (packed) kernel struct before inspecting.
            let flags = event.events;
            let token = event.u64;
            let hangup_mask = (libc::EPOLLHUP | libc::EPOLLRDHUP | libc::EPOLLERR) as u32;

            let readiness = Readiness {
                token: Token(token),
                readable: flags & libc::EPOLLIN as u32 != 0,
                hangup: flags & hangup_mask != 0,
            };
            if ready.push(readiness).is_err() {
                break;
            }
        }

        Ok(())
    }

    fn create_timer(period_ms: u32) -> io::Result<OwnedFd> {
        // SAFETY: plain syscall, no pointers involved.
        let fd = owned(unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC)
        })?;

        let period = period_spec(period_ms);
        let spec = libc::itimerspec {
            it_interval: period,
            it_value: period,
        };
        // SAFETY: `spec` outlives the call; old-value pointer may be null.
        cvt(unsafe { libc::timerfd_settime(fd.as_raw_fd(), 0, &spec, core::ptr::null_mut()) })?;

        Ok(fd)
    }

    fn acknowledge_timer(fd: BorrowedFd<'_>) -> io::Result<u64> {
        read_counter(fd)
    }

    fn create_wake() -> io::Result<OwnedFd> {
        // SAFETY: plain syscall, no pointers involved.
        owned(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })
    }

    fn signal_wake(fd: BorrowedFd<'_>) -> io::Result<()> {
        let buf = 1u64.to_ne_bytes();
        // SAFETY: `buf` is valid for 8 readable bytes for the whole call.
        let n = unsafe { libc::write(fd.as_raw_fd(), buf.as_ptr().cast(), buf.len()) };
        if n == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn acknowledge_wake(fd: BorrowedFd<'_>) -> io::Result<u64> {
        read_counter(fd)
    }
}
