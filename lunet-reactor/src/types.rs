// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::cell::RefCell;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf as TcpReadHalf, OwnedWriteHalf as TcpWriteHalf};
use tokio::net::unix::{OwnedReadHalf as UnixReadHalf, OwnedWriteHalf as UnixWriteHalf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

enum ReadHalf {
    Tcp(TcpReadHalf),
    Unix(UnixReadHalf),
}

enum WriteHalf {
    Tcp(TcpWriteHalf),
    Unix(UnixWriteHalf),
}

/// Either side of a stream socket, split into independent read/write
/// halves so a concurrent read and write (spec.md §5: "at most one read and
/// one write in flight; mutually independent") never contend on the same
/// `RefCell`.
pub struct StreamHandle {
    read: RefCell<ReadHalf>,
    write: RefCell<WriteHalf>,
    fd: RawFd,
    peer: PeerName,
}

impl StreamHandle {
    pub(crate) fn from_tcp(stream: TcpStream, peer_name: String) -> Self {
        let fd = stream.as_raw_fd();
        let (r, w) = stream.into_split();
        StreamHandle {
            read: RefCell::new(ReadHalf::Tcp(r)),
            write: RefCell::new(WriteHalf::Tcp(w)),
            fd,
            peer: PeerName(peer_name),
        }
    }

    pub(crate) fn from_unix(stream: UnixStream) -> Self {
        let fd = stream.as_raw_fd();
        let (r, w) = stream.into_split();
        StreamHandle {
            read: RefCell::new(ReadHalf::Unix(r)),
            write: RefCell::new(WriteHalf::Unix(w)),
            fd,
            peer: PeerName("unix".to_string()),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer_name(&self) -> &PeerName {
        &self.peer
    }
}

pub(crate) fn read_ref(h: &StreamHandle) -> std::cell::RefMut<'_, ReadHalf> {
    h.read.borrow_mut()
}

pub(crate) fn write_ref(h: &StreamHandle) -> std::cell::RefMut<'_, WriteHalf> {
    h.write.borrow_mut()
}

pub(crate) use ReadHalf as ReadHalfKind;
pub(crate) use WriteHalf as WriteHalfKind;

/// A bound listener, TCP or Unix-domain.
pub enum ListenerHandle {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// Result of `getpeername`: `"ip:port"` for TCP, the literal `"unix"` for
/// Unix-domain streams (spec.md §4.F).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerName(pub String);

/// A bound UDP socket.
pub struct UdpHandle {
    pub(crate) socket: tokio::net::UdpSocket,
}

impl UdpHandle {
    /// The socket's actual bound address, including the OS-assigned port
    /// when `bind` was called with port `0` (spec.md §8 S1).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// An open file, shared so that concurrent positioned reads/writes issued by
/// different coroutines against the same fd can run on the blocking thread
/// pool independently (spec.md §4.J dispatches each op to the thread pool).
#[derive(Clone)]
pub struct FsHandle {
    pub(crate) file: Arc<std::fs::File>,
}

/// `stat()` result shape (spec.md §4.J).
#[derive(Debug, Clone)]
pub struct Stat {
    pub size: u64,
    pub mtime: i64,
    pub mode: u32,
    pub kind: EntryKind,
}

/// `scandir()` entry shape (spec.md §4.J).
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Link,
    Other,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
            EntryKind::Link => "link",
            EntryKind::Other => "other",
        }
    }
}

/// Connection target accepted by `listen`/`connect` (spec.md §4.F).
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp(SocketAddr),
    Unix(std::path::PathBuf),
}
