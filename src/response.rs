use std::time::SystemTime;
use anyhow::Result;
use httpdate::fmt_http_date;
use tokio::io::AsyncWriteExt;

use crate::{config::Settings, server::Stream};

async fn server_info(stream: &mut Stream, server_id: &str) -> Result<()> {
    stream.write_all(format!("Server: {}\r\n\
Date: {}\r\n\
Cache-Control: no-cache, no-store\r\n\
Pragma: no-cache\r\n\
Access-Control-Allow-Origin: *\r\n\r\n",
        server_id,
        fmt_http_date(SystemTime::now())
    ).as_bytes()).await?;

    stream.flush().await?;
    Ok(())
}

pub async fn method_not_allowed(stream: &mut Stream, server_id: &str) -> Result<()> {
    stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\
Connection: close\r\n").await?;

    server_info(stream, server_id).await?;
    Ok(())
}

pub async fn not_found(stream: &mut Stream, server_id: &str) -> Result<()> {
    stream.write_all(b"HTTP/1.1 404 File Not Found\r\n\
Connection: close\r\n").await?;

    server_info(stream, server_id).await?;
    Ok(())
}

pub async fn no_content(stream: &mut Stream, server_id: &str) -> Result<()> {
    stream.write_all(b"HTTP/1.1 204 No Content\r\n\
Connection: close\r\n").await?;

    server_info(stream, server_id).await?;
    Ok(())
}

pub async fn internal_error(stream: &mut Stream, server_id: &str) -> Result<()> {
    stream.write_all(b"HTTP/1.1 500 Internal Server Error\r\n\
Connection: close\r\n").await?;

    server_info(stream, server_id).await?;
    Ok(())
}

pub async fn bad_request(stream: &mut Stream, server_id: &str, message: &str) -> Result<()> {
    stream.write_all(format!("HTTP/1.1 400 Bad request\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Length: {}\r\n\
Connection: close\r\n",
        message.len()
    ).as_bytes()).await?;

    server_info(stream, server_id).await?;
    stream.write_all(message.as_bytes()).await?;
    stream.flush().await?;

    Ok(())
}

/// Terminal answer for listeners arriving before the producer has published
/// anything to play
pub async fn stream_not_started(stream: &mut Stream, server_id: &str) -> Result<()> {
    let message = "oops, it seems like the stream hasn't started up";
    stream.write_all(format!("HTTP/1.1 503 Service Unavailable\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Length: {}\r\n\
Connection: close\r\n",
        message.len()
    ).as_bytes()).await?;

    server_info(stream, server_id).await?;
    stream.write_all(message.as_bytes()).await?;
    stream.flush().await?;

    Ok(())
}

pub async fn ok_200_json_body(stream: &mut Stream, server_id: &str, body: &[u8]) -> Result<()> {
    stream.write_all(format!("HTTP/1.1 200 OK\r\n\
Connection: close\r\n\
Content-Length: {}\r\n\
Content-Type: application/json; charset=utf-8\r\n",
        body.len()
    ).as_bytes()).await?;

    server_info(stream, server_id).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn bad_request_json(stream: &mut Stream, server_id: &str, body: &[u8]) -> Result<()> {
    stream.write_all(format!("HTTP/1.1 400 Bad request\r\n\
Connection: close\r\n\
Content-Length: {}\r\n\
Content-Type: application/json; charset=utf-8\r\n",
        body.len()
    ).as_bytes()).await?;

    server_info(stream, server_id).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

/// Chunked transfer-encoding writer, one `send` per HTTP chunk
pub struct ChunkedResponse {}

impl ChunkedResponse {
    /// Reuse a stream whose headers already went out
    pub fn new_ready() -> Self {
        Self {}
    }

    pub async fn send(&self, stream: &mut Stream, buf: &[u8]) -> Result<()> {
        stream.write_all(format!("{:x}\r\n", buf.len()).as_bytes()).await?;
        stream.write_all(buf).await?;
        stream.write_all(b"\r\n").await?;
        Ok(())
    }
}

/// Response head for the broadcast itself: audio/mpeg, chunked, plus the icy
/// station headers. Headers sourced from empty config values are left out;
/// icy-metaint goes out only when the client asked for inline metadata.
pub async fn ok_200_stream(stream: &mut Stream, config: &Settings,
                           metaint: Option<usize>) -> Result<()> {
    stream.write_all(b"HTTP/1.1 200 OK\r\n\
Connection: Keep-Alive\r\n\
Content-Type: audio/mpeg\r\n\
Transfer-Encoding: chunked\r\n\
X-Content-Type-Options: nosniff\r\n").await?;

    if !config.name.is_empty() {
        stream.write_all(format!("icy-name: {}\r\n", config.name).as_bytes()).await?;
    }
    if !config.genre.is_empty() {
        stream.write_all(format!("icy-genre: {}\r\n", config.genre).as_bytes()).await?;
    }
    if !config.url.is_empty() {
        stream.write_all(format!("icy-url: {}\r\n", config.url).as_bytes()).await?;
    }
    if !config.standard_bitrate.is_empty() {
        // "128k" advertises as icy-br: 128
        let br = config.standard_bitrate.trim_end_matches('k');
        stream.write_all(format!("icy-br: {}\r\n", br).as_bytes()).await?;
    }
    if !config.standard_sample_rate.is_empty() {
        stream.write_all(format!("icy-sr: {}\r\n", config.standard_sample_rate).as_bytes()).await?;
    }
    stream.write_all(b"icy-pub: 1\r\n").await?;
    if !config.notice1.is_empty() {
        stream.write_all(format!("icy-notice1: {}\r\n", config.notice1).as_bytes()).await?;
    }
    if !config.notice2.is_empty() {
        stream.write_all(format!("icy-notice2: {}\r\n", config.notice2).as_bytes()).await?;
    }

    if let Some(metaint) = metaint {
        stream.write_all(format!("icy-metaint: {}\r\n", metaint).as_bytes()).await?;
    }

    server_info(stream, crate::config::SERVER_ID).await?;
    Ok(())
}
