//! The local HTTP listener which receives GENA event NOTIFY requests

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::any;
use axum::Router;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// One inbound event NOTIFY, waiting to be routed
///
/// Whoever handles it must answer on `reply`: `true` if the sender is a
/// known device (the peer gets 200), `false` otherwise (412).
#[derive(Debug)]
pub struct PushRequest {
    /// Address of the connecting peer
    pub remote: IpAddr,
    /// SID header, naming the subscription
    pub sid: Option<String>,
    /// The property set
    pub body: String,
    /// Where to send the verdict
    pub reply: oneshot::Sender<bool>,
}

async fn handle(
    State(tx): State<mpsc::UnboundedSender<PushRequest>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    if method.as_str() != "NOTIFY" {
        debug!(%remote, %method, "not a NOTIFY");
        return StatusCode::METHOD_NOT_ALLOWED;
    }
    let sid = headers
        .get("SID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    trace!(%remote, ?sid, len = body.len(), "event NOTIFY");

    let (reply, verdict) = oneshot::channel();
    let request = PushRequest {
        remote: remote.ip().to_canonical(),
        sid,
        body,
        reply,
    };
    if tx.send(request).is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match verdict.await {
        Ok(true) => StatusCode::OK,
        Ok(false) => StatusCode::PRECONDITION_FAILED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Accept NOTIFY requests on `path` until `shutdown` completes
///
/// Requests to any other path get 404, other methods on `path` get 405.
///
/// # Errors
///
/// Passes on a failure of the accept loop.
pub async fn serve<F>(
    listener: TcpListener,
    path: &str,
    tx: mpsc::UnboundedSender<PushRequest>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = Router::new().route(path, any(handle)).with_state(tx);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn raw(addr: SocketAddr, request: &str) -> String {
        let mut s = tokio::net::TcpStream::connect(addr).await.unwrap();
        s.write_all(request.as_bytes()).await.unwrap();
        let mut buf = vec![0u8; 1024];
        let n = s.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn routes_notify_and_rejects_others() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, "/notify", tx, async move {
            let _ = stopped.await;
        }));

        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let known = req.sid.as_deref() == Some("uuid:good");
                assert_eq!(req.remote, "127.0.0.1".parse::<IpAddr>().unwrap());
                let _ = req.reply.send(known);
            }
        });

        let r = raw(
            addr,
            "NOTIFY /notify HTTP/1.1\r\nHost: x\r\nSID: uuid:good\r\nContent-Length: 4\r\nConnection: close\r\n\r\n<e/>",
        )
        .await;
        assert!(r.starts_with("HTTP/1.1 200"), "{r}");

        let r = raw(
            addr,
            "NOTIFY /notify HTTP/1.1\r\nHost: x\r\nSID: uuid:bad\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(r.starts_with("HTTP/1.1 412"), "{r}");

        let r = raw(
            addr,
            "GET /notify HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(r.starts_with("HTTP/1.1 405"), "{r}");

        let r = raw(
            addr,
            "NOTIFY /elsewhere HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(r.starts_with("HTTP/1.1 404"), "{r}");

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
