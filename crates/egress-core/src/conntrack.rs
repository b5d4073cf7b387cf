//! Process-wide connection tracking
//!
//! When enabled, every dialed connection is registered here so a
//! memory-pressure killer can abort all of them at once with
//! [`close_all`]. Disabled by default; wrapping is then a no-op.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::Notify;
use tracing::debug;

static TRACKER: Lazy<Tracker> = Lazy::new(Tracker::default);

#[derive(Default)]
struct Tracker {
    enabled: AtomicBool,
    next_id: AtomicU64,
    conns: DashMap<u64, Arc<Entry>>,
}

/// Abort state shared between the tracker and one connection
#[derive(Default)]
struct Entry {
    closed: AtomicBool,
    /// Tasks parked in `poll_read` / `poll_write`
    read_waker: Mutex<Option<Waker>>,
    write_waker: Mutex<Option<Waker>>,
    /// Async waiters (datagram receives)
    notify: Notify,
}

impl Entry {
    fn abort(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        for slot in [&self.read_waker, &self.write_waker] {
            if let Some(waker) = slot.lock().take() {
                waker.wake();
            }
        }
    }
}

/// Turn tracking on or off
pub fn set_enabled(enabled: bool) {
    TRACKER.enabled.store(enabled, Ordering::SeqCst);
}

/// Whether tracking is on
pub fn is_enabled() -> bool {
    TRACKER.enabled.load(Ordering::SeqCst)
}

/// Number of live tracked connections
pub fn count() -> usize {
    TRACKER.conns.len()
}

/// Abort every tracked connection
///
/// Tasks blocked on an aborted connection are woken, and every later
/// I/O call fails with `ConnectionAborted`.
pub fn close_all() -> usize {
    let mut closed = 0;
    TRACKER.conns.retain(|_, entry| {
        entry.abort();
        closed += 1;
        false
    });
    if closed > 0 {
        debug!(closed, "Closed all tracked connections");
    }
    closed
}

/// Membership of one connection in the tracker; leaves it on drop
pub struct Registration {
    id: u64,
    entry: Arc<Entry>,
}

impl Registration {
    /// Register a connection when tracking is enabled
    pub fn register() -> Option<Self> {
        if !is_enabled() {
            return None;
        }
        let id = TRACKER.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry::default());
        TRACKER.conns.insert(id, entry.clone());
        Some(Self { id, entry })
    }

    /// Whether [`close_all`] aborted this connection
    pub fn is_aborted(&self) -> bool {
        self.entry.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the connection is aborted
    pub async fn aborted(&self) {
        let notified = self.entry.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }

    /// Store `waker` for `close_all`, then report the abort state
    fn poll_check(&self, slot: &Mutex<Option<Waker>>, cx: &Context<'_>) -> io::Result<()> {
        *slot.lock() = Some(cx.waker().clone());
        if self.is_aborted() {
            return Err(aborted_error());
        }
        Ok(())
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        TRACKER.conns.remove(&self.id);
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

pub(crate) fn aborted_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed by tracker")
}

/// Register `conn` when tracking is enabled
pub fn track<S>(conn: S) -> TrackedConn<S> {
    TrackedConn {
        inner: conn,
        registration: Registration::register(),
    }
}

/// A stream that can be aborted by [`close_all`]
#[derive(Debug)]
pub struct TrackedConn<S> {
    inner: S,
    registration: Option<Registration>,
}

impl<S> TrackedConn<S> {
    /// Whether [`close_all`] aborted this connection
    pub fn is_aborted(&self) -> bool {
        self.registration.as_ref().is_some_and(Registration::is_aborted)
    }

    /// Borrow the wrapped stream
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    fn check_read(&self, cx: &Context<'_>) -> io::Result<()> {
        match &self.registration {
            Some(reg) => reg.poll_check(&reg.entry.read_waker, cx),
            None => Ok(()),
        }
    }

    fn check_write(&self, cx: &Context<'_>) -> io::Result<()> {
        match &self.registration {
            Some(reg) => reg.poll_check(&reg.entry.write_waker, cx),
            None => Ok(()),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TrackedConn<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.check_read(cx)?;
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TrackedConn<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.check_write(cx)?;
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.check_write(cx)?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // The tracker is global, so everything lives in one test.
    #[tokio::test]
    async fn test_track_and_close_all() {
        set_enabled(false);
        let (a, _b) = tokio::io::duplex(64);
        let untracked = track(a);
        assert!(!untracked.is_aborted());

        set_enabled(true);
        let (a, mut b) = tokio::io::duplex(64);
        let mut conn = track(a);
        assert!(count() >= 1);

        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        assert!(close_all() >= 1);
        assert!(conn.is_aborted());
        let err = conn.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        let err = conn.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);

        // A reader already parked when the tracker aborts everything
        let (a, _b) = tokio::io::duplex(64);
        let mut parked = track(a);
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            parked.read(&mut buf).await
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(close_all() >= 1);
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), reader)
            .await
            .expect("parked reader must be woken")
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionAborted);

        // Datagram registrations abort pending waits too
        let registration = Registration::register().unwrap();
        {
            let waiter = registration.aborted();
            tokio::pin!(waiter);
            assert!(tokio::time::timeout(std::time::Duration::from_millis(20), waiter.as_mut())
                .await
                .is_err());
            close_all();
            tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
                .await
                .expect("abort must wake datagram waiters");
        }
        drop(registration);

        let (a, _b) = tokio::io::duplex(64);
        let before = count();
        let conn = track(a);
        assert_eq!(count(), before + 1);
        drop(conn);
        assert_eq!(count(), before);
        set_enabled(false);
    }
}
