//! Stream decorator that fragments ClientHello records

use super::plan::{encode_records, plan_fragments};
use super::record::{self, Inspection, RecordHeader};
use super::TlsFragmentPolicy;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;
use tracing::{debug, trace};

type ConnectFuture<S> = Pin<Box<dyn Future<Output = io::Result<S>> + Send>>;

enum State<S> {
    /// Underlying connect still running
    Pending(ConnectFuture<S>),
    Open(S),
    /// Connect or write failed; the stream is gone
    Failed(StickyError),
    Closed,
}

/// Error replayed on every call after a failure
#[derive(Debug, Clone)]
struct StickyError {
    kind: io::ErrorKind,
    message: String,
}

impl StickyError {
    fn to_io(&self) -> io::Error {
        io::Error::new(self.kind, self.message.clone())
    }
}

impl From<&io::Error> for StickyError {
    fn from(err: &io::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

enum WritePhase {
    /// Next write is checked for a ClientHello
    Inspecting,
    Emitting(Emission),
    Passthrough,
}

/// Records of one fragmented write still being sent
struct Emission {
    records: Vec<Bytes>,
    /// Leading entries of `records` that are fragments; the rest is trailing data
    fragments: usize,
    index: usize,
    offset: usize,
    sleep: Option<Pin<Box<Sleep>>>,
    /// The caller buffer this emission was planned from
    origin: Bytes,
}

impl Emission {
    /// Whether `buf` is the retried write that started this emission
    fn is_retry_of(&self, buf: &[u8]) -> bool {
        self.origin.as_ref() == buf
    }
}

/// A stream that splits outgoing ClientHello records
///
/// While a fragmented write is in flight the caller must retry
/// `poll_write` with the same buffer, as `write_all` does.
pub struct FragmentConn<S> {
    state: State<S>,
    policy: TlsFragmentPolicy,
    phase: WritePhase,
}

impl<S> FragmentConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream
    pub fn new(stream: S, policy: TlsFragmentPolicy) -> Self {
        Self {
            state: State::Open(stream),
            policy,
            phase: WritePhase::Inspecting,
        }
    }

    /// Wrap a stream that is still connecting
    ///
    /// The first read or write drives `connect`; its error becomes sticky.
    pub fn connecting<F>(connect: F, policy: TlsFragmentPolicy) -> Self
    where
        F: Future<Output = io::Result<S>> + Send + 'static,
    {
        Self {
            state: State::Pending(Box::pin(connect)),
            policy,
            phase: WritePhase::Inspecting,
        }
    }

    /// The underlying stream, if connected
    pub fn get_ref(&self) -> Option<&S> {
        match &self.state {
            State::Open(stream) => Some(stream),
            _ => None,
        }
    }

    /// Whether writes now bypass fragmentation for good
    pub fn is_passthrough(&self) -> bool {
        matches!(self.phase, WritePhase::Passthrough)
    }

    /// The stored failure, if any
    pub fn last_error(&self) -> Option<io::Error> {
        match &self.state {
            State::Failed(err) => Some(err.to_io()),
            _ => None,
        }
    }

    fn fail(&mut self, err: io::Error) -> io::Error {
        debug!(error = %err, "Fragment connection failed");
        self.state = State::Failed(StickyError::from(&err));
        self.phase = WritePhase::Passthrough;
        err
    }

    fn start_emission(&self, header: RecordHeader, body: &[u8], rest: &[u8], origin: &[u8]) -> Emission {
        let sni = if self.policy.sni_split {
            match record::locate_server_name(body) {
                Ok(span) => Some(span),
                Err(e) => {
                    debug!(reason = %e, "SNI not located, fragmenting whole ClientHello");
                    None
                }
            }
        } else {
            None
        };
        let sni_aligned = sni.is_some();

        let chunks = plan_fragments(body.len(), &self.policy.size, sni);
        let mut records = encode_records(header, body, &chunks);
        let fragments = records.len();
        if !rest.is_empty() {
            records.push(Bytes::copy_from_slice(rest));
        }

        debug!(
            fragments,
            body_len = body.len(),
            trailing = rest.len(),
            sni_aligned,
            "Fragmenting ClientHello"
        );

        Emission {
            records,
            fragments,
            index: 0,
            offset: 0,
            sleep: None,
            origin: Bytes::copy_from_slice(origin),
        }
    }

    fn poll_emit(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        loop {
            let WritePhase::Emitting(em) = &mut self.phase else {
                return Poll::Ready(Ok(0));
            };

            if let Some(sleep) = em.sleep.as_mut() {
                ready!(sleep.as_mut().poll(cx));
                em.sleep = None;
            }

            if em.index == em.records.len() {
                let consumed = em.origin.len();
                self.phase = WritePhase::Inspecting;
                return Poll::Ready(Ok(consumed));
            }

            let stream = ready!(poll_open(&mut self.state, cx))?;
            let record = &em.records[em.index];
            match ready!(Pin::new(stream).poll_write(cx, &record[em.offset..])) {
                Ok(0) => {
                    let err = io::Error::new(io::ErrorKind::WriteZero, "failed to write TLS record");
                    return Poll::Ready(Err(self.fail(err)));
                }
                Ok(n) => {
                    em.offset += n;
                    if em.offset == record.len() {
                        trace!(index = em.index, len = record.len(), "Wrote record");
                        em.index += 1;
                        em.offset = 0;
                        if em.index < em.fragments && !self.policy.sleep.is_zero() {
                            let delay = self.policy.sleep.sample_duration_ms();
                            em.sleep = Some(Box::pin(tokio::time::sleep(delay)));
                        }
                    }
                }
                Err(e) => return Poll::Ready(Err(self.fail(e))),
            }
        }
    }
}

/// Drive a pending connect and hand out the open stream
fn poll_open<'a, S>(state: &'a mut State<S>, cx: &mut Context<'_>) -> Poll<io::Result<&'a mut S>> {
    if let State::Pending(connect) = state {
        match ready!(connect.as_mut().poll(cx)) {
            Ok(stream) => *state = State::Open(stream),
            Err(e) => {
                *state = State::Failed(StickyError::from(&e));
                return Poll::Ready(Err(e));
            }
        }
    }

    match state {
        State::Open(stream) => Poll::Ready(Ok(stream)),
        State::Failed(err) => Poll::Ready(Err(err.to_io())),
        State::Closed | State::Pending(_) => Poll::Ready(Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "use of closed connection",
        ))),
    }
}

impl<S> AsyncRead for FragmentConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let stream = ready!(poll_open(&mut this.state, cx))?;
        Pin::new(stream).poll_read(cx, buf)
    }
}

impl<S> AsyncWrite for FragmentConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            let abandoned = matches!(&this.phase, WritePhase::Emitting(em) if !em.is_retry_of(buf));
            match this.phase {
                WritePhase::Emitting(_) if abandoned => {
                    // The write that planned these records was dropped
                    // mid-way; finish them, then treat `buf` as new data.
                    debug!(len = buf.len(), "Finishing abandoned fragmented write");
                    ready!(this.poll_emit(cx))?;
                    continue;
                }
                WritePhase::Emitting(_) => return this.poll_emit(cx),
                WritePhase::Passthrough => {
                    let stream = ready!(poll_open(&mut this.state, cx))?;
                    return match ready!(Pin::new(stream).poll_write(cx, buf)) {
                        Ok(n) => Poll::Ready(Ok(n)),
                        Err(e) => Poll::Ready(Err(this.fail(e))),
                    };
                }
                WritePhase::Inspecting => {}
            }

            ready!(poll_open(&mut this.state, cx))?;
            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }

            this.phase = match record::inspect(buf) {
                Inspection::ClientHello { header, body, rest } => {
                    WritePhase::Emitting(this.start_emission(header, body, rest, buf))
                }
                Inspection::Partial => {
                    debug!(len = buf.len(), "Incomplete ClientHello record, passing through");
                    WritePhase::Passthrough
                }
                Inspection::NotClientHello => {
                    debug!(len = buf.len(), "Not a ClientHello, passing through");
                    WritePhase::Passthrough
                }
            };
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let stream = ready!(poll_open(&mut this.state, cx))?;
        Pin::new(stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &mut this.state {
            State::Open(stream) => {
                let result = ready!(Pin::new(stream).poll_shutdown(cx));
                this.state = State::Closed;
                Poll::Ready(result)
            }
            State::Pending(_) => {
                this.state = State::Closed;
                Poll::Ready(Ok(()))
            }
            State::Failed(_) | State::Closed => Poll::Ready(Ok(())),
        }
    }
}

impl<S> fmt::Debug for FragmentConn<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Pending(_) => "pending",
            State::Open(_) => "open",
            State::Failed(_) => "failed",
            State::Closed => "closed",
        };
        let phase = match &self.phase {
            WritePhase::Inspecting => "inspecting",
            WritePhase::Emitting(_) => "emitting",
            WritePhase::Passthrough => "passthrough",
        };
        f.debug_struct("FragmentConn")
            .field("state", &state)
            .field("phase", &phase)
            .field("policy", &self.policy)
            .finish()
    }
}
