//! Remote encoding over TCP.
//!
//! Every message is a 4-byte big-endian header length, a JSON header, and
//! `data_len` raw bytes. A request carries one RGB24 picture; the response
//! carries the encoded bytes or an error string.

use std::net::SocketAddr;
use std::sync::Arc;

use reelkit_common::error::{ReelkitError, ReelkitResult};
use reelkit_player::{Eyes, Image};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::codec::{EncodeRequest, FrameEncoder};

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest JSON header accepted.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Largest payload accepted (a 4K RGB24 picture with room to spare).
pub const MAX_DATA_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub version: u32,
    pub sequence: u64,
    pub frame: i64,
    pub width: u32,
    pub height: u32,
    pub eyes: Eyes,
    pub bandwidth: u64,
    pub fps: u32,
    pub data_len: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub data_len: u64,
}

async fn write_message<W, H>(writer: &mut W, header: &H, data: &[u8]) -> ReelkitResult<()>
where
    W: AsyncWrite + Unpin,
    H: Serialize,
{
    let header = serde_json::to_vec(header)?;
    writer.write_u32(header.len() as u32).await?;
    writer.write_all(&header).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_message<R, H>(reader: &mut R, data_len: impl Fn(&H) -> u64) -> ReelkitResult<(H, Vec<u8>)>
where
    R: AsyncRead + Unpin,
    H: DeserializeOwned,
{
    let header_len = reader.read_u32().await? as usize;
    if header_len > MAX_HEADER_BYTES {
        return Err(ReelkitError::remote(format!(
            "header of {header_len} bytes exceeds the {MAX_HEADER_BYTES} byte limit"
        )));
    }
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header).await?;
    let header: H = serde_json::from_slice(&header)?;

    let len = data_len(&header);
    if len > MAX_DATA_BYTES {
        return Err(ReelkitError::remote(format!(
            "payload of {len} bytes exceeds the {MAX_DATA_BYTES} byte limit"
        )));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok((header, data))
}

/// Encode one picture on `server` (`host:port`).
pub async fn encode_remote(server: &str, request: &EncodeRequest) -> ReelkitResult<Vec<u8>> {
    let mut stream = TcpStream::connect(server)
        .await
        .map_err(|e| ReelkitError::remote(format!("connect to {server}: {e}")))?;
    stream.set_nodelay(true)?;

    let image = &request.image;
    let header = RequestHeader {
        version: PROTOCOL_VERSION,
        sequence: request.sequence,
        frame: request.frame,
        width: image.width(),
        height: image.height(),
        eyes: request.eyes,
        bandwidth: request.bandwidth,
        fps: request.fps,
        data_len: image.data().len() as u64,
    };
    write_message(&mut stream, &header, image.data()).await?;

    let (response, data): (ResponseHeader, Vec<u8>) =
        read_message(&mut stream, |h: &ResponseHeader| h.data_len).await?;
    if !response.ok {
        return Err(ReelkitError::remote(format!(
            "{server} refused frame {}: {}",
            request.frame,
            response.error.unwrap_or_else(|| "unknown error".to_string())
        )));
    }
    Ok(data)
}

/// Serves encode requests with a local codec.
pub struct EncodeServer {
    listener: TcpListener,
    encoder: Arc<dyn FrameEncoder>,
}

impl EncodeServer {
    pub async fn bind(addr: impl ToSocketAddrs, encoder: Arc<dyn FrameEncoder>) -> ReelkitResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, encoder })
    }

    pub fn local_addr(&self) -> ReelkitResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> ReelkitResult<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            codec = self.encoder.name(),
            "Encode server listening"
        );
        loop {
            let (socket, peer) = self.listener.accept().await?;
            let encoder = self.encoder.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, encoder).await {
                    tracing::warn!(%peer, error = %e, "Encode request failed");
                }
            });
        }
    }
}

async fn handle_connection(mut socket: TcpStream, encoder: Arc<dyn FrameEncoder>) -> ReelkitResult<()> {
    let (header, data): (RequestHeader, Vec<u8>) =
        read_message(&mut socket, |h: &RequestHeader| h.data_len).await?;

    let outcome = if header.version != PROTOCOL_VERSION {
        Err(format!("unsupported protocol version {}", header.version))
    } else {
        match Image::from_rgb(header.width, header.height, data) {
            None => Err(format!(
                "payload does not match a {}x{} picture",
                header.width, header.height
            )),
            Some(image) => {
                let request = EncodeRequest {
                    sequence: header.sequence,
                    frame: header.frame,
                    eyes: header.eyes,
                    image: Arc::new(image),
                    bandwidth: header.bandwidth,
                    fps: header.fps,
                };
                match tokio::task::spawn_blocking(move || encoder.encode(&request)).await {
                    Ok(Ok(encoded)) => Ok(encoded),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) => Err(format!("encode task failed: {e}")),
                }
            }
        }
    };

    match outcome {
        Ok(encoded) => {
            tracing::debug!(frame = header.frame, bytes = encoded.len(), "Encoded remote frame");
            let response = ResponseHeader {
                ok: true,
                error: None,
                data_len: encoded.len() as u64,
            };
            write_message(&mut socket, &response, &encoded).await
        }
        Err(error) => {
            let response = ResponseHeader {
                ok: false,
                error: Some(error),
                data_len: 0,
            };
            write_message(&mut socket, &response, &[]).await
        }
    }
}
