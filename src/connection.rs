use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::codec::RespCodec;
use crate::error::ServerError;
use crate::request::Request;
use crate::responder::Responder;
use crate::Error;

/// A byte stream framed into requests and replies.
///
/// Data is read from the socket into the read buffer. When a request is decoded, the
/// corresponding bytes are removed from the buffer, so pipelined requests are picked up by
/// subsequent reads without touching the socket.
pub struct Connection<S> {
    framed: Framed<S, RespCodec>,
    timeout: Duration,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps `stream`. A non-zero `timeout` bounds every read and write.
    pub fn new(stream: S, codec: RespCodec, timeout: Duration) -> Connection<S> {
        Connection {
            framed: Framed::new(stream, codec),
            timeout,
        }
    }

    /// Reads the next request. `Ok(None)` means the peer closed the stream cleanly.
    pub async fn read_request(&mut self) -> Result<Option<Request>, Error> {
        let timeout = self.timeout;
        with_deadline(timeout, self.framed.next())
            .await?
            .transpose()
    }

    /// Writes and flushes one reply, returning the number of bytes written.
    pub async fn write_response(&mut self, res: &Responder) -> Result<usize, Error> {
        let written = res.write_to(self.framed.write_buffer_mut());
        let timeout = self.timeout;
        with_deadline(timeout, SinkExt::<Responder>::flush(&mut self.framed)).await??;
        Ok(written)
    }
}

async fn with_deadline<F: Future>(timeout: Duration, fut: F) -> Result<F::Output, Error> {
    if timeout.is_zero() {
        return Ok(fut.await);
    }

    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ServerError::IdleTimeout.into())
}
