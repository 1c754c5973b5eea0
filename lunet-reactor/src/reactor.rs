// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ReactorError;
use crate::types::{DirEntry, Endpoint, FsHandle, ListenerHandle, PeerName, Stat, StreamHandle, UdpHandle};

/// Everything the coroutine bridge (`lunet-core` and the `lunet-socket`/
/// `lunet-udp`/`lunet-timer`/`lunet-signal`/`lunet-fs` module crates) needs
/// from the event loop. Spec.md §4.B. Every method here is the "submit"
/// half of a spec.md §4.D operation; the bridge layer owns translating its
/// resolution into a coroutine resume.
///
/// The trait is `?Send`: lunet is single-threaded (spec.md §5), and a
/// `Send` bound would force needless synchronization in the default
/// implementation for no benefit.
#[async_trait(?Send)]
pub trait Reactor {
    /// Drives any reactor-owned background work (none, for the default
    /// implementation: every op below is already a plain `tokio` future
    /// driven by the `LocalSet` the whole process runs inside).
    async fn run_until_idle(&self) {}

    async fn listen(&self, endpoint: Endpoint, backlog: u32) -> Result<ListenerHandle, ReactorError>;
    async fn accept(&self, listener: &ListenerHandle) -> Result<StreamHandle, ReactorError>;
    async fn connect(&self, endpoint: Endpoint) -> Result<StreamHandle, ReactorError>;
    /// One chunk per call (spec.md §4.F: "one-shot, not streaming"). `None` is EOF.
    async fn read(&self, stream: &StreamHandle, max: usize) -> Result<Option<Vec<u8>>, ReactorError>;
    async fn write(&self, stream: &StreamHandle, data: Vec<u8>) -> Result<(), ReactorError>;
    fn peer_name(&self, stream: &StreamHandle) -> PeerName;
    async fn close_stream(&self, stream: &StreamHandle);
    async fn close_listener(&self, listener: ListenerHandle);

    async fn udp_bind(&self, addr: SocketAddr) -> Result<UdpHandle, ReactorError>;
    async fn udp_recv(&self, handle: &UdpHandle, max: usize) -> Result<(Vec<u8>, SocketAddr), ReactorError>;
    async fn udp_send(&self, handle: &UdpHandle, data: Vec<u8>, to: SocketAddr) -> Result<(), ReactorError>;
    async fn udp_close(&self, handle: &UdpHandle);

    async fn sleep_ms(&self, ms: u64);

    /// Waits for the next delivery of `signum`, returning it back (useful
    /// when numeric signals outside the named set are observed).
    async fn signal_wait(&self, signum: i32) -> Result<i32, ReactorError>;

    async fn fs_open(&self, path: PathBuf, flags: i32, mode: u32) -> Result<FsHandle, ReactorError>;
    async fn fs_close(&self, handle: FsHandle);
    async fn fs_read(&self, handle: &FsHandle, size: usize, offset: Option<u64>) -> Result<Vec<u8>, ReactorError>;
    async fn fs_write(&self, handle: &FsHandle, data: Vec<u8>, offset: Option<u64>) -> Result<usize, ReactorError>;
    async fn fs_fsync(&self, handle: &FsHandle) -> Result<(), ReactorError>;
    async fn fs_stat(&self, path: &Path) -> Result<Stat, ReactorError>;
    async fn fs_scandir(&self, path: &Path) -> Result<Vec<DirEntry>, ReactorError>;
}
