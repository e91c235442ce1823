use std::{
    sync::atomic::Ordering,
    time::Duration
};
use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::{
    api, broadcast,
    config::SERVER_ID,
    request::{self, ListenRequest, RequestType},
    response::{self, ChunkedResponse},
    server::{ClientSession, Server, Stream}
};

/// How long a session waits before re-checking the store for a new snapshot
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub async fn handle(mut session: ClientSession) {
    let request = match request::read_request(&mut session).await {
        Ok(v) => v,
        Err(e) => {
            response::method_not_allowed(&mut session.stream, SERVER_ID).await.ok();
            info!("Request coming from {} couldn't be handled: {}", session.addr, e);
            return;
        }
    };

    match request {
        RequestType::Listen(v) => handle_listener(session, v).await,
        RequestType::Api(v) => api::handle_request(session, v).await
    }.ok();
}

pub async fn handle_listener(mut session: ClientSession, req: ListenRequest) -> Result<()> {
    let serv       = session.server.clone();
    let request_id = chrono::Utc::now().timestamp_micros();

    info!("[{}] Client {} connected", request_id, req.ip);

    // Listener gauge up for the whole session, and check whether this is
    // a new peak
    let new_count = serv.stats.active_listeners.fetch_add(1, Ordering::Relaxed) + 1;
    serv.stats.peak_listeners.fetch_max(new_count, Ordering::Relaxed);

    let ret = if serv.store.read().is_none() {
        info!("[{}] Turning {} away, the stream hasn't started", request_id, req.ip);
        response::stream_not_started(&mut session.stream, SERVER_ID).await
    } else {
        stream_broadcast(&mut session, &serv, &req, request_id).await
    };

    // End of connection
    serv.stats.active_listeners.fetch_sub(1, Ordering::Relaxed);

    ret
}

/// The long-lived streaming response. New sessions start with the rolling
/// prefill window, then follow the unit publishes; a session that cannot keep
/// up simply skips to the latest snapshot, bytes are never reordered.
async fn stream_broadcast(session: &mut ClientSession, serv: &Server,
                          req: &ListenRequest, request_id: i64) -> Result<()> {
    let metaint = serv.config.metaint;
    response::ok_200_stream(
        &mut session.stream,
        &serv.config,
        req.wants_meta.then_some(metaint)
    ).await?;

    let writer         = ChunkedResponse::new_ready();
    let mut last_order = 0u64;
    let mut first_sent = false;
    let mut since_meta = 0usize;

    loop {
        let snap = match serv.store.read() {
            Some(v) => v,
            None => {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };
        if snap.order == last_order {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        let chunk: &[u8] = if first_sent { &snap.unit } else { &snap.initial };

        let written = if req.wants_meta {
            write_with_metadata(&mut session.stream, serv, &writer, chunk, metaint, &mut since_meta).await
        } else {
            write_plain(&mut session.stream, serv, &writer, chunk).await
        };

        if written.is_err() || session.stream.flush().await.is_err() {
            info!("[{}] Client {} disconnected", request_id, req.ip);
            return Ok(());
        }

        first_sent = true;
        last_order = snap.order;

        tokio::time::sleep(Duration::from_millis(snap.pacing_ms)).await;
    }
}

async fn write_plain(stream: &mut Stream, serv: &Server,
                     writer: &ChunkedResponse, chunk: &[u8]) -> Result<()> {
    writer.send(stream, chunk).await?;
    serv.stats.add_bytes_streamed(chunk.len() as u64);
    Ok(())
}

/// Interleave inline metadata so that exactly `metaint` audio bytes separate
/// consecutive blocks, wherever the unit boundaries happen to fall. The
/// counter is per session; two listeners hit the boundary at different
/// absolute offsets of their own streams and both stay compliant.
async fn write_with_metadata(stream: &mut Stream, serv: &Server, writer: &ChunkedResponse,
                             chunk: &[u8], metaint: usize, since_meta: &mut usize) -> Result<()> {
    let mut offset = 0;
    while offset < chunk.len() {
        let take = (metaint - *since_meta).min(chunk.len() - offset);
        if take > 0 {
            writer.send(stream, &chunk[offset..offset + take]).await?;
            serv.stats.add_bytes_streamed(take as u64);
            *since_meta += take;
            offset      += take;
        }

        if *since_meta >= metaint {
            let block = match serv.store.now_playing() {
                Some(info) => broadcast::metadata_encode(&info.stream_title, "/"),
                // A lone zero byte tells the client nothing changed
                None => vec![0]
            };
            writer.send(stream, &block).await?;
            serv.stats.add_bytes_streamed(block.len() as u64);
            *since_meta = 0;
        }
    }

    Ok(())
}
