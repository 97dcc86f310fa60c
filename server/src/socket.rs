//! Non-blocking byte stream abstraction the dispatcher polls.
//!
//! The loop only ever asks three things of a connection: "are you readable?",
//! "give me what you have", and "take what you can". `tokio::net::TcpStream`
//! answers all three without blocking; tests substitute [`mock::MockSocket`].

use std::io;
use std::task::{Context, Poll};

use tokio::net::TcpStream;

pub trait Socket: Send {
    /// Registers interest in readability with the current task.
    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// `Ok(0)` means the peer closed; `WouldBlock` means nothing is available.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl Socket for TcpStream {
    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        TcpStream::poll_read_ready(self, cx)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}
