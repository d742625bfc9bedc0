//! Anonymous pipes connecting adjacent stages.
//!
//! Each endpoint has a single owner. [`ReadEnd::close`] and
//! [`WriteEnd::close`] release an endpoint and report failure; an endpoint
//! dropped without an explicit close (an early return on an error path) is
//! still released, only without the report.

use nix::fcntl::OFlag;
use nix::unistd;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};

/// One-way byte stream between two stages.
#[derive(Debug)]
pub struct Channel {
    read: ReadEnd,
    write: WriteEnd,
}

impl Channel {
    /// Creates a pipe with close-on-exec set on both endpoints.
    ///
    /// A child keeps an endpoint across image loading only after it has been
    /// duplicated onto stdin or stdout, which clears the flag on the copy.
    pub fn open() -> nix::Result<Self> {
        let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC)?;
        tracing::trace!(read = read.as_raw_fd(), write = write.as_raw_fd(), "opened channel");
        Ok(Self {
            read: ReadEnd(read),
            write: WriteEnd(write),
        })
    }

    pub fn split(self) -> (ReadEnd, WriteEnd) {
        (self.read, self.write)
    }
}

/// Read endpoint of a [`Channel`].
#[derive(Debug)]
pub struct ReadEnd(OwnedFd);

/// Write endpoint of a [`Channel`].
#[derive(Debug)]
pub struct WriteEnd(OwnedFd);

macro_rules! endpoint_impls {
    ($ty:ident) => {
        impl $ty {
            /// Releases this endpoint, reporting a failed `close(2)`.
            pub fn close(self) -> nix::Result<()> {
                let fd = self.0.into_raw_fd();
                tracing::trace!(fd, endpoint = stringify!($ty), "closing endpoint");
                unistd::close(fd)
            }
        }

        impl AsFd for $ty {
            fn as_fd(&self) -> BorrowedFd<'_> {
                self.0.as_fd()
            }
        }

        impl AsRawFd for $ty {
            fn as_raw_fd(&self) -> RawFd {
                self.0.as_raw_fd()
            }
        }
    };
}

endpoint_impls!(ReadEnd);
endpoint_impls!(WriteEnd);
