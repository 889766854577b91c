//! HTTP/3 (QUIC) listeners.
//!
//! When a server enables it, each TLS listener gets a companion quinn
//! endpoint on the same UDP address. Requests flow through the same
//! pipeline as HTTP/1.1 and HTTP/2; bodies are collected before dispatch
//! since the buffered response writer owns the exchange anyway.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use http_body_util::{BodyExt, Full};
use portico_tls::{TlsApp, TlsInfo};
use tokio::sync::watch;

use crate::app::ConnTracker;
use crate::error::{Error, Result};
use crate::listeners::NetworkAddress;
use crate::server::{self, Server};

/// Bind a QUIC endpoint on the UDP side of `addr`:`port`.
pub(crate) fn bind_endpoint(
    addr: &NetworkAddress,
    port: u16,
    config: Arc<rustls::ServerConfig>,
) -> Result<quinn::Endpoint> {
    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from((*config).clone())
        .map_err(|e| Error::Provision(format!("building QUIC TLS config: {e}")))?;
    let server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));

    let host = if addr.host.is_empty() {
        "0.0.0.0".to_string()
    } else {
        addr.host.clone()
    };
    let bind_addr: std::net::SocketAddr = format!(
        "{}:{}",
        if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        },
        port
    )
    .parse()
    .map_err(|e| Error::Provision(format!("invalid HTTP/3 bind address: {e}")))?;

    let endpoint = quinn::Endpoint::server(server_config, bind_addr)?;
    tracing::info!(address = %bind_addr, "HTTP/3 endpoint bound");
    Ok(endpoint)
}

/// Accept QUIC connections until shutdown.
pub(crate) async fn serve(
    endpoint: quinn::Endpoint,
    server: Arc<Server>,
    tls_app: Arc<TlsApp>,
    conns: ConnTracker,
    mut shutdown: watch::Receiver<bool>,
) {
    let local_addr = endpoint
        .local_addr()
        .unwrap_or_else(|_| "0.0.0.0:0".parse().expect("valid fallback addr"));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            incoming = endpoint.accept() => {
                let Some(incoming) = incoming else { break };
                let server = server.clone();
                let tls_app = tls_app.clone();
                conns.lock().await.spawn(async move {
                    match incoming.await {
                        Ok(connection) => {
                            if let Err(err) =
                                handle_connection(connection, server, tls_app, local_addr).await
                            {
                                tracing::debug!(error = %err, "HTTP/3 connection error");
                            }
                        }
                        Err(err) => {
                            tracing::debug!(error = %err, "failed to accept QUIC connection");
                        }
                    }
                });
            }
        }
    }
    tracing::debug!("HTTP/3 accept loop stopped");
}

async fn handle_connection(
    connection: quinn::Connection,
    server: Arc<Server>,
    tls_app: Arc<TlsApp>,
    local_addr: std::net::SocketAddr,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let remote_addr = connection.remote_address();

    let mut tls = TlsInfo {
        version: "tls1.3".to_string(),
        proto: "h3".to_string(),
        ..Default::default()
    };
    if let Some(data) = connection
        .handshake_data()
        .and_then(|d| d.downcast::<quinn::crypto::rustls::HandshakeData>().ok())
    {
        if let Some(name) = data.server_name {
            tls.server_name = name;
        }
        if let Some(proto) = data.protocol {
            tls.proto = String::from_utf8_lossy(&proto).into_owned();
        }
    }

    let mut h3_conn: h3::server::Connection<h3_quinn::Connection, Bytes> =
        h3::server::Connection::new(h3_quinn::Connection::new(connection)).await?;

    loop {
        match h3_conn.accept().await {
            Ok(Some(resolver)) => {
                let server = server.clone();
                let tls_app = tls_app.clone();
                let tls = tls.clone();
                tokio::spawn(async move {
                    match resolver.resolve_request().await {
                        Ok((req, stream)) => {
                            if let Err(err) = handle_request(
                                req, stream, server, tls_app, tls, remote_addr, local_addr,
                            )
                            .await
                            {
                                tracing::debug!(error = %err, "HTTP/3 request error");
                            }
                        }
                        Err(err) => {
                            tracing::debug!(error = %err, "failed to resolve HTTP/3 request");
                        }
                    }
                });
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "HTTP/3 accept error");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_request(
    req: http::Request<()>,
    mut stream: h3::server::RequestStream<h3_quinn::BidiStream<Bytes>, Bytes>,
    server: Arc<Server>,
    tls_app: Arc<TlsApp>,
    tls: TlsInfo,
    remote_addr: std::net::SocketAddr,
    local_addr: std::net::SocketAddr,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (parts, ()) = req.into_parts();

    let mut body = BytesMut::new();
    while let Some(mut chunk) = stream.recv_data().await? {
        let len = chunk.remaining();
        body.extend_from_slice(&chunk.copy_to_bytes(len));
    }

    let request = http::Request::from_parts(
        parts,
        Full::new(body.freeze())
            .map_err(std::io::Error::other)
            .boxed(),
    );

    let response = server::handle_request(
        server,
        tls_app,
        request,
        remote_addr,
        local_addr,
        Some(tls),
    )
    .await;

    let (parts, body) = response.into_parts();
    let body = body.collect().await.expect("response body is infallible").to_bytes();

    stream
        .send_response(http::Response::from_parts(parts, ()))
        .await?;
    if !body.is_empty() {
        stream.send_data(body).await?;
    }
    stream.finish().await?;
    Ok(())
}
