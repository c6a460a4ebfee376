//! One command, end to end, over a private connection.
//!
//! ```text
//! build_request -> open -> head -> body chunks (Progress::Send)
//!               -> response head -> body chunks (Progress::Receive)
//!               -> parse_reply -> Complete
//! ```
//!
//! Any failure before the reply is parsed ends the run with exactly one
//! `Error` or `Timeout` event.

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::net::{Connection, Progress};
use crate::remoting::event::{channel, EventSink};
use crate::wire::{
    encode_head, parse_response_head, Body, BodyDecoder, BodyKind, Method, Request, Response,
};
use bytes::{Buf, BytesMut};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, warn};

/// Largest body buffer reserved up front from a declared Content-Length
const MAX_BODY_PREALLOC: u64 = 8 * 1024 * 1024;

/// Executes a single command. Consumed by the run, so one instance never
/// drives more than one exchange.
#[derive(Debug, Clone)]
pub struct Remoting {
    config: ConnectionConfig,
}

impl Remoting {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Run `command`, reporting everything through `events`.
    pub async fn run<C: Command>(self, command: &C, events: EventSink<C::Reply>) {
        let started = Instant::now();
        let result = self.execute(command, &events).await;
        match &result {
            Ok(_) => debug!(
                command = command.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Command complete"
            ),
            Err(e) => warn!(command = command.name(), error = %e, "Command failed"),
        }
        events.finish(result);
    }

    /// Run `command` and wait for its reply, forwarding progress.
    pub async fn call<C, F>(self, command: &C, on_progress: F) -> Result<C::Reply>
    where
        C: Command,
        F: FnMut(Progress) + Send,
    {
        let (sink, stream) = channel();
        let (_, result) = tokio::join!(self.run(command, sink), stream.into_result(on_progress));
        result
    }

    async fn execute<C: Command>(
        &self,
        command: &C,
        events: &EventSink<C::Reply>,
    ) -> Result<C::Reply> {
        let request = command.build_request().await?;
        let method = request.method();
        let (host, port) = request.authority()?;
        debug!(
            command = command.name(),
            %method,
            uri = %request.uri(),
            "Sending request"
        );

        let mut conn = Connection::open(&host, port, self.config.clone()).await?;
        let mut on_progress = |progress: Progress| events.progress(progress);
        write_request(&mut conn, request, &mut on_progress).await?;
        let response = read_response(&mut conn, method, &mut on_progress).await?;
        conn.close().await;

        debug!(
            command = command.name(),
            status = response.status(),
            bytes = response.body().len(),
            "Received response"
        );
        command.parse_reply(response)
    }
}

/// Send the request head, then the body in `send_buffer_size` chunks,
/// buffered or streamed alike.
///
/// Progress counts body bytes only. A streamed body that yields more or fewer
/// bytes than its Content-Length is a protocol error.
pub async fn write_request<S, F>(
    conn: &mut Connection<S>,
    request: Request,
    on_progress: &mut F,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    F: FnMut(Progress),
{
    let head = encode_head(&request)?;
    let declared = request.content_length()?.unwrap_or(0);
    conn.send(&head).await?;

    match request.into_body() {
        Body::Empty => {}
        Body::Buffered(bytes) => {
            let chunk_size = conn.config().send_buffer_size.max(1);
            let mut sent = 0u64;
            for chunk in bytes.chunks(chunk_size) {
                conn.send(chunk).await?;
                sent += chunk.len() as u64;
                on_progress(Progress::sent(chunk.len(), sent, Some(declared)));
            }
        }
        Body::Stream(mut stream) => {
            let mut buf = vec![0u8; conn.config().send_buffer_size.max(1)];
            let mut sent = 0u64;
            loop {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                if sent + n as u64 > declared {
                    return Err(Error::protocol(format!(
                        "Request body exceeds its Content-Length of {} bytes",
                        declared
                    )));
                }
                conn.send(&buf[..n]).await?;
                sent += n as u64;
                on_progress(Progress::sent(n, sent, Some(declared)));
            }
            if sent != declared {
                return Err(Error::protocol(format!(
                    "Request body ended after {} of {} declared bytes",
                    sent, declared
                )));
            }
        }
    }

    conn.flush().await
}

/// Read a complete response. Interim 1xx responses are skipped.
pub async fn read_response<S, F>(
    conn: &mut Connection<S>,
    method: Method,
    on_progress: &mut F,
) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    F: FnMut(Progress),
{
    let mut buf = vec![0u8; conn.config().receive_buffer_size.max(1)];
    let mut input = BytesMut::with_capacity(buf.len());

    let mut response = loop {
        if let Some((response, used)) = parse_response_head(&input)? {
            input.advance(used);
            if response.status_line().class() == 1 {
                continue;
            }
            break response;
        }
        let n = conn.recv(&mut buf).await?;
        if n == 0 {
            return Err(Error::disconnected(format!(
                "Connection to {} closed before the response head",
                conn.peer()
            )));
        }
        input.extend_from_slice(&buf[..n]);
    };

    let mut decoder = BodyDecoder::new(BodyKind::for_response(&response, method)?);
    let total = decoder.expected_len();
    let reserve = total.unwrap_or(0).min(MAX_BODY_PREALLOC) as usize;
    let mut body = BytesMut::with_capacity(reserve);

    // Body bytes that arrived together with the head
    let produced = decoder.decode(&mut input, &mut body)?;
    if produced > 0 {
        on_progress(Progress::received(produced, decoder.received(), total));
    }

    while !decoder.is_complete() {
        let n = conn.recv(&mut buf).await?;
        if n == 0 {
            decoder.finish_eof()?;
            break;
        }
        input.extend_from_slice(&buf[..n]);
        let produced = decoder.decode(&mut input, &mut body)?;
        if produced > 0 {
            on_progress(Progress::received(produced, decoder.received(), total));
        }
    }

    response.set_body(body.freeze());
    Ok(response)
}
