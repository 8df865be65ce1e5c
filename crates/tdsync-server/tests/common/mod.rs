//! Loopback test harness: a real server on an ephemeral port and a raw
//! http1 client that can speak the custom verbs.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::header::HeaderMap;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::path::Path;
use tdsync_server::{serve_background, Config, Core, ServerHandle};
use tokio::net::TcpStream;

pub struct TestServer {
    pub addr: SocketAddr,
    #[allow(dead_code)]
    handle: ServerHandle,
}

pub async fn start(root: &Path, mutate: impl FnOnce(&mut Config)) -> TestServer {
    let mut config = Config {
        path: root.to_path_buf(),
        host: "127.0.0.1".into(),
        port: 0,
        username: None,
        password: None,
        meta_touch: false,
        debug: false,
        open_in_editor: None,
        no_auth_warning: true,
    };
    mutate(&mut config);
    let core = Core::new(config);
    let handle = serve_background(core).await.expect("server failed to start");
    TestServer {
        addr: handle.addr(),
        handle,
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> Reply {
    let stream = TcpStream::connect(addr).await.expect("connect failed");
    let io = TokioIo::new(stream);
    let (mut sender, conn) = http1::handshake::<_, Full<Bytes>>(io)
        .await
        .expect("handshake failed");
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = Request::builder()
        .method(Method::from_bytes(method.as_bytes()).unwrap())
        .uri(path)
        .header("host", "localhost");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder
        .body(Full::new(Bytes::copy_from_slice(body)))
        .unwrap();

    let response = sender.send_request(request).await.expect("request failed");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body read failed")
        .to_bytes();
    Reply {
        status,
        headers,
        body,
    }
}

/// Burn through the four instant-204 answers a cold server grants.
#[allow(dead_code)]
pub async fn drain_void_budget(addr: SocketAddr) {
    for _ in 0..4 {
        let reply = request(addr, "SUBSCRIBE", "/", &[("depth", "1")], b"").await;
        assert_eq!(reply.status, StatusCode::NO_CONTENT);
    }
}
