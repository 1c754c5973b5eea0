// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket, UnixListener, UnixStream};
use tokio::signal::unix::{signal as unix_signal, Signal, SignalKind};

use crate::error::ReactorError;
use crate::reactor::Reactor;
use crate::types::{
    read_ref, write_ref, DirEntry, Endpoint, EntryKind, FsHandle, ListenerHandle, PeerName,
    ReadHalfKind, Stat, StreamHandle, UdpHandle, WriteHalfKind,
};

/// Default [`Reactor`] implementation, backed directly by `tokio`. Intended
/// to run inside a single `tokio::task::LocalSet` (spec.md §5: the whole
/// core is single-threaded).
#[derive(Default)]
pub struct TokioReactor {
    signals: RefCell<HashMap<i32, Rc<RefCell<Signal>>>>,
}

impl TokioReactor {
    pub fn new() -> Self {
        TokioReactor::default()
    }

    fn signal_handle(&self, signum: i32) -> Result<Rc<RefCell<Signal>>, ReactorError> {
        if let Some(existing) = self.signals.borrow().get(&signum) {
            return Ok(Rc::clone(existing));
        }
        let kind = SignalKind::from_raw(signum);
        let sig = unix_signal(kind).map_err(ReactorError::from)?;
        let handle = Rc::new(RefCell::new(sig));
        self.signals.borrow_mut().insert(signum, Rc::clone(&handle));
        Ok(handle)
    }
}

fn open_from_flags(path: &Path, flags: i32, mode: u32) -> std::io::Result<std::fs::File> {
    let mut opts = std::fs::OpenOptions::new();
    let access = flags & libc::O_ACCMODE;
    opts.read(access == libc::O_RDONLY || access == libc::O_RDWR);
    opts.write(access == libc::O_WRONLY || access == libc::O_RDWR);
    if flags & libc::O_CREAT != 0 {
        opts.create(true);
    }
    if flags & libc::O_EXCL != 0 {
        opts.create_new(true);
    }
    if flags & libc::O_TRUNC != 0 {
        opts.truncate(true);
    }
    if flags & libc::O_APPEND != 0 {
        opts.append(true);
    }
    opts.mode(mode);
    let passthrough = flags & !(libc::O_CREAT | libc::O_EXCL | libc::O_TRUNC | libc::O_APPEND | libc::O_ACCMODE);
    opts.custom_flags(passthrough);
    opts.open(path)
}

fn entry_kind(file_type: std::fs::FileType) -> EntryKind {
    if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_symlink() {
        EntryKind::Link
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

#[async_trait(?Send)]
impl Reactor for TokioReactor {
    async fn listen(&self, endpoint: Endpoint, _backlog: u32) -> Result<ListenerHandle, ReactorError> {
        // The OS default backlog already matches spec.md's fixed 128; tokio
        // does not expose a portable knob to override it on bind.
        match endpoint {
            Endpoint::Tcp(addr) => Ok(ListenerHandle::Tcp(TcpListener::bind(addr).await?)),
            Endpoint::Unix(path) => Ok(ListenerHandle::Unix(UnixListener::bind(path)?)),
        }
    }

    async fn accept(&self, listener: &ListenerHandle) -> Result<StreamHandle, ReactorError> {
        match listener {
            ListenerHandle::Tcp(l) => {
                let (stream, addr) = l.accept().await?;
                Ok(StreamHandle::from_tcp(stream, addr.to_string()))
            }
            ListenerHandle::Unix(l) => {
                let (stream, _addr) = l.accept().await?;
                Ok(StreamHandle::from_unix(stream))
            }
        }
    }

    async fn connect(&self, endpoint: Endpoint) -> Result<StreamHandle, ReactorError> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| addr.to_string());
                Ok(StreamHandle::from_tcp(stream, peer))
            }
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                Ok(StreamHandle::from_unix(stream))
            }
        }
    }

    async fn read(&self, stream: &StreamHandle, max: usize) -> Result<Option<Vec<u8>>, ReactorError> {
        let mut buf = vec![0u8; max.max(1)];
        let n = {
            let mut half = read_ref(stream);
            match &mut *half {
                ReadHalfKind::Tcp(r) => r.read(&mut buf).await?,
                ReadHalfKind::Unix(r) => r.read(&mut buf).await?,
            }
        };
        if n == 0 {
            Ok(None)
        } else {
            buf.truncate(n);
            Ok(Some(buf))
        }
    }

    async fn write(&self, stream: &StreamHandle, data: Vec<u8>) -> Result<(), ReactorError> {
        let mut half = write_ref(stream);
        match &mut *half {
            WriteHalfKind::Tcp(w) => w.write_all(&data).await?,
            WriteHalfKind::Unix(w) => w.write_all(&data).await?,
        }
        Ok(())
    }

    fn peer_name(&self, stream: &StreamHandle) -> PeerName {
        stream.peer_name().clone()
    }

    async fn close_stream(&self, stream: &StreamHandle) {
        let mut half = write_ref(stream);
        let _ = match &mut *half {
            WriteHalfKind::Tcp(w) => w.shutdown().await,
            WriteHalfKind::Unix(w) => w.shutdown().await,
        };
    }

    async fn close_listener(&self, _listener: ListenerHandle) {
        // Dropping the listener releases the fd; tokio has no async close.
    }

    async fn udp_bind(&self, addr: SocketAddr) -> Result<UdpHandle, ReactorError> {
        Ok(UdpHandle {
            socket: UdpSocket::bind(addr).await?,
        })
    }

    async fn udp_recv(&self, handle: &UdpHandle, max: usize) -> Result<(Vec<u8>, SocketAddr), ReactorError> {
        let mut buf = vec![0u8; max.max(1)];
        let (n, from) = handle.socket.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, from))
    }

    async fn udp_send(&self, handle: &UdpHandle, data: Vec<u8>, to: SocketAddr) -> Result<(), ReactorError> {
        handle.socket.send_to(&data, to).await?;
        Ok(())
    }

    async fn udp_close(&self, _handle: &UdpHandle) {}

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn signal_wait(&self, signum: i32) -> Result<i32, ReactorError> {
        let handle = self.signal_handle(signum)?;
        let delivered = handle.borrow_mut().recv().await;
        delivered
            .map(|_| signum)
            .ok_or_else(|| ReactorError::other("signal stream closed"))
    }

    async fn fs_open(&self, path: PathBuf, flags: i32, mode: u32) -> Result<FsHandle, ReactorError> {
        let file = tokio::task::spawn_blocking(move || open_from_flags(&path, flags, mode))
            .await
            .map_err(|e| ReactorError::other(e.to_string()))??;
        Ok(FsHandle {
            file: Arc::new(file),
        })
    }

    async fn fs_close(&self, _handle: FsHandle) {}

    async fn fs_read(&self, handle: &FsHandle, size: usize, offset: Option<u64>) -> Result<Vec<u8>, ReactorError> {
        let file = Arc::clone(&handle.file);
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; size];
            let n = match offset {
                Some(o) => file.read_at(&mut buf, o)?,
                None => {
                    use std::io::Read;
                    (&*file).read(&mut buf)?
                }
            };
            buf.truncate(n);
            Ok::<_, std::io::Error>(buf)
        })
        .await
        .map_err(|e| ReactorError::other(e.to_string()))?
        .map_err(ReactorError::from)
    }

    async fn fs_write(&self, handle: &FsHandle, data: Vec<u8>, offset: Option<u64>) -> Result<usize, ReactorError> {
        let file = Arc::clone(&handle.file);
        tokio::task::spawn_blocking(move || {
            let n = match offset {
                Some(o) => file.write_at(&data, o)?,
                None => {
                    use std::io::Write;
                    (&*file).write(&data)?
                }
            };
            Ok::<_, std::io::Error>(n)
        })
        .await
        .map_err(|e| ReactorError::other(e.to_string()))?
        .map_err(ReactorError::from)
    }

    async fn fs_fsync(&self, handle: &FsHandle) -> Result<(), ReactorError> {
        let file = Arc::clone(&handle.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| ReactorError::other(e.to_string()))?
            .map_err(ReactorError::from)
    }

    async fn fs_stat(&self, path: &Path) -> Result<Stat, ReactorError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let meta = std::fs::metadata(&path)?;
            Ok::<_, std::io::Error>(Stat {
                size: meta.len(),
                mtime: meta.mtime(),
                mode: meta.mode(),
                kind: entry_kind(meta.file_type()),
            })
        })
        .await
        .map_err(|e| ReactorError::other(e.to_string()))?
        .map_err(ReactorError::from)
    }

    async fn fs_scandir(&self, path: &Path) -> Result<Vec<DirEntry>, ReactorError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in std::fs::read_dir(&path)? {
                let entry = entry?;
                let kind = entry_kind(entry.file_type()?);
                out.push(DirEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    kind,
                });
            }
            Ok::<_, std::io::Error>(out)
        })
        .await
        .map_err(|e| ReactorError::other(e.to_string()))?
        .map_err(ReactorError::from)
    }
}
