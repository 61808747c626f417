//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use uptime_engine::checkers::CheckContext;
use uptime_engine::database::{Database, DatabaseImpl, MemoryDatabase, initialize_database};
use uptime_engine::pool::open_pool;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve a fixed HTTP response to every connection until the test ends
pub async fn serve_http(status: &str, content_type: &str, body: &str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let response = response.clone();
            tokio::spawn(respond(stream, response));
        }
    });
    addr
}

async fn respond(mut stream: TcpStream, response: String) {
    let mut buf = vec![0u8; 4096];
    let mut request = Vec::new();
    while let Ok(n) = stream.read(&mut buf).await {
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
        if request.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// A local port nothing listens on
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub fn memory_db() -> Arc<MemoryDatabase> {
    Arc::new(MemoryDatabase::new())
}

pub fn context(database: Arc<dyn Database>) -> CheckContext {
    CheckContext { database, timeout: TEST_TIMEOUT }
}

/// libsql backed storage in a fresh temporary directory
pub async fn libsql_db() -> (tempfile::TempDir, DatabaseImpl) {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(&dir.path().join("data/engine.db"), 4).await.unwrap();
    {
        let conn = pool.get().await.unwrap();
        initialize_database(&conn).await.unwrap();
    }
    (dir, DatabaseImpl::new_from_pool(pool))
}
