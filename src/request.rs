use std::time::Duration;
use anyhow::Result;
use httparse::Status;
use tokio::io::AsyncReadExt;

use crate::{
    server::{ClientSession, Stream},
    utils::{self, Query}
};

/// Plenty for any player or curl invocation; httparse rejects the rest
const MAX_HEADERS: usize = 32;

#[derive(Debug)]
pub enum RequestType {
    /// A listener tuning into the broadcast
    Listen(ListenRequest),
    /// One of the JSON control/info endpoints
    Api(ApiRequest)
}

#[derive(Debug)]
pub struct ListenRequest {
    /// The client sent Icy-MetaData: 1 and wants inline metadata blocks
    pub wants_meta: bool,
    /// Address used for logging, honoring X-Forwarded-For
    pub ip: String
}

#[derive(Debug)]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    pub queries: Vec<Query>
}

/// Read up to the blank line ending the request head, one byte at a time so
/// no bytes beyond it are ever consumed from the socket
async fn collect_head(stream: &mut Stream, limit: usize) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(512);
    let mut one  = [0u8; 1];

    loop {
        if stream.read(&mut one).await? == 0 {
            // Peer gave up before finishing the head
            break;
        }
        head.push(one[0]);

        if head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() >= limit {
            return Err(anyhow::Error::msg(format!("Request head over {} bytes", limit)));
        }
    }

    Ok(head)
}

pub async fn read_request(session: &mut ClientSession) -> Result<RequestType> {
    let header_timeout = session.server.config.limits.header_timeout;
    let http_max_len   = session.server.config.limits.http_max_len;

    let head = tokio::time::timeout(
        Duration::from_millis(header_timeout),
        collect_head(&mut session.stream, http_max_len)
    ).await??;

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed  = httparse::Request::new(&mut headers);
    if parsed.parse(&head)? == Status::Partial {
        return Err(anyhow::Error::msg("Connection closed mid-request"));
    }

    let method = parsed.method
        .ok_or_else(|| anyhow::Error::msg("Request line carries no method"))?;
    let target = parsed.path
        .ok_or_else(|| anyhow::Error::msg("Request line carries no path"))?;

    let queries = utils::get_queries(target);
    let path    = target.split('?').next().unwrap_or(target).to_owned();

    match method {
        "GET" if path == "/" || path == "/stream.mp3" => {
            let wants_meta = utils::get_header("Icy-MetaData", parsed.headers)
                .map(|v| v.eq_ignore_ascii_case(b"1"))
                .unwrap_or(false);

            Ok(RequestType::Listen(ListenRequest {
                wants_meta,
                ip: utils::real_ip(parsed.headers, &session.addr)
            }))
        },
        "GET" | "POST" => {
            Ok(RequestType::Api(ApiRequest {
                method: method.to_owned(),
                path,
                queries
            }))
        },
        _ => Err(anyhow::Error::msg("Unsupported method sent by user"))
    }
}
