//! Minimal HTTP/1 client over hyper, shared by backend adapters.

use anyhow::{Context, bail};
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tracing::debug;

/// An `http://host:port/prefix` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    address: String,
    base_path: String,
}

impl HttpTarget {
    pub fn parse(url: &str) -> anyhow::Result<Self> {
        let uri: http::Uri = url.parse().with_context(|| format!("invalid url {url:?}"))?;
        if uri.scheme_str() != Some("http") {
            bail!("unsupported url {url:?}: only http:// endpoints are supported");
        }
        let authority = uri
            .authority()
            .with_context(|| format!("url {url:?} has no host"))?;
        Ok(Self {
            address: format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80)),
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    /// `host:port` to connect to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Join `suffix` onto the target's base path.
    pub fn path(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.base_path)
    }
}

/// Send one request and collect the whole response body.
pub async fn send(
    target: &HttpTarget,
    method: Method,
    path_and_query: &str,
    body: Option<(&'static str, Vec<u8>)>,
) -> anyhow::Result<(StatusCode, Bytes)> {
    let stream = tokio::net::TcpStream::connect(target.address())
        .await
        .with_context(|| format!("connect to {}", target.address()))?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .context("http handshake")?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "http connection closed with error");
        }
    });

    let mut builder = http::Request::builder()
        .method(method)
        .uri(path_and_query)
        .header("host", target.address())
        .header("user-agent", "rollguard/0.1");
    let payload = match body {
        Some((content_type, bytes)) => {
            builder = builder.header("content-type", content_type);
            Bytes::from(bytes)
        }
        None => Bytes::new(),
    };
    let req = builder.body(Full::new(payload)).context("build request")?;

    let resp = sender.send_request(req).await.context("send request")?;
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .context("read response body")?
        .to_bytes();
    Ok((status, bytes))
}
