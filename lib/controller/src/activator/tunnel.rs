// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Dial `upstream` and splice `conn` onto it. A failed dial drops `conn`.
pub async fn forward(conn: TcpStream, upstream: &str) {
    match TcpStream::connect(upstream).await {
        Ok(remote) => tunnel(conn, remote),
        Err(e) => {
            tracing::warn!(upstream, error = %e, "dial failed, closing buffered connection");
        }
    }
}

/// Copy both directions in the background. When one side finishes, the opposite writer is
/// shut down so the peer sees EOF.
pub(crate) fn tunnel(client: TcpStream, upstream: TcpStream) {
    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();
    tokio::spawn(pipe(client_read, upstream_write, "upstream"));
    tokio::spawn(pipe(upstream_read, client_write, "downstream"));
}

async fn pipe<R, W>(mut reader: R, mut writer: W, direction: &'static str)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(bytes) => tracing::trace!(direction, bytes, "tunnel half finished"),
        Err(e) => tracing::debug!(direction, error = %e, "tunnel half failed"),
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut r, mut w) = socket.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
        addr
    }

    /// A connected pair: (what the activator accepted, what the client holds)
    async fn accepted_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        (accepted, client)
    }

    #[tokio::test]
    async fn test_forward_round_trip() {
        let upstream = echo_server().await;
        let (accepted, mut client) = accepted_pair().await;
        forward(accepted, &upstream).await;

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        // closing our side ends the tunnel
        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_failed_dial_closes_connection() {
        // bind and drop to get a port nothing listens on
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let (accepted, mut client) = accepted_pair().await;
        forward(accepted, &format!("127.0.0.1:{port}")).await;

        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).await.unwrap(), 0);
    }
}
