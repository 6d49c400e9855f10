use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use colloquy_service::{CommentBus, Discussion};
use colloquy_store::{InMemoryStore, Store};

use crate::config::{ServerConfig, StoreKind};
use crate::error::{ServerError, ServerResult};
use crate::router::{build_router, AppState};

/// Colloquy HTTP server.
pub struct ColloquyServer {
    config: ServerConfig,
    state: AppState,
}

impl ColloquyServer {
    /// Open the configured store and wire up the service.
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let store = open_store(&config).await?;
        Ok(Self::with_store(config, store))
    }

    /// Build around an already-open store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn Store>) -> Self {
        let discussion = Discussion::with_parts(store, CommentBus::new(), config.loader_config());
        let state = AppState {
            discussion,
            live_capacity: config.bus.channel_capacity,
            store_kind: match config.store.kind {
                StoreKind::Memory => "memory",
                StoreKind::Postgres => "postgres",
            },
            shutdown: CancellationToken::new(),
        };
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn discussion(&self) -> &Discussion {
        &self.state.discussion
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone(), &self.config.cors_origins)
    }

    /// Serve until Ctrl-C, then drain live deliveries.
    pub async fn serve(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `signal` resolves.
    ///
    /// When `signal` fires, open live streams are ended first so the
    /// connection drain can finish. After the listener stops, the comment bus
    /// is shut down with the configured grace period so in-flight deliveries
    /// finish or are cancelled.
    pub async fn serve_with_shutdown<S>(self, listener: TcpListener, signal: S) -> ServerResult<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(%addr, store = self.state.store_kind, "colloquy listening");

        let live_streams = self.state.shutdown.clone();
        let signal = async move {
            signal.await;
            live_streams.cancel();
        };

        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        let report = self
            .state
            .discussion
            .bus()
            .shutdown(self.config.shutdown_grace())
            .await;
        info!(
            subscriptions = report.subscriptions_dropped,
            drained = report.drained,
            "server stopped"
        );
        Ok(())
    }
}

async fn open_store(config: &ServerConfig) -> ServerResult<Arc<dyn Store>> {
    match config.store.kind {
        StoreKind::Memory => Ok(Arc::new(InMemoryStore::new())),
        StoreKind::Postgres => open_postgres(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(config: &ServerConfig) -> ServerResult<Arc<dyn Store>> {
    let dsn = config
        .store
        .postgres_dsn
        .as_deref()
        .ok_or_else(|| ServerError::Config("POSTGRES_DSN is not set".into()))?;
    let store = colloquy_store::PostgresStore::connect(dsn, config.store.max_connections).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_config: &ServerConfig) -> ServerResult<Arc<dyn Store>> {
    Err(ServerError::Config(
        "this build has no postgres support; rebuild with the `postgres` feature".into(),
    ))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn server_construction() {
        let server = ColloquyServer::new(ServerConfig::default()).await.unwrap();
        assert_eq!(server.config().bind_addr, "0.0.0.0:8080".parse().unwrap());
        let _router = server.router();
    }

    #[tokio::test]
    async fn postgres_without_dsn_is_rejected() {
        let mut config = ServerConfig::default();
        config.store.kind = StoreKind::Postgres;
        let err = ColloquyServer::new(config).await.err().unwrap();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[tokio::test]
    async fn graceful_shutdown_closes_the_bus() {
        let server = ColloquyServer::new(ServerConfig::default()).await.unwrap();
        let discussion = server.discussion().clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(server.serve_with_shutdown(listener, async move {
            let _ = stop_rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(()).unwrap();

        handle.await.unwrap().unwrap();
        assert!(discussion.bus().is_shut_down());
    }

    #[tokio::test]
    async fn shutdown_ends_open_live_streams() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        let mut config = ServerConfig::default();
        config.bus.shutdown_grace_ms = 100;
        let server = ColloquyServer::new(config).await.unwrap();
        let post = server
            .discussion()
            .create_post(colloquy_types::NewPost {
                title: "t".into(),
                body: "b".into(),
                author: "a".into(),
                comments_closed: false,
            })
            .await
            .unwrap()
            .post;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(listener, async move {
            let _ = stop_rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /v1/posts/{}/comments/live HTTP/1.1\r\nHost: localhost\r\n\r\n",
            post.id
        );
        client.write_all(request.as_bytes()).await.unwrap();

        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "connection closed before headers");
            head.extend_from_slice(&buf[..n]);
        }
        assert!(String::from_utf8_lossy(&head).starts_with("HTTP/1.1 200"));

        stop_tx.send(()).unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(finished.is_ok(), "shutdown waited on the live stream");
        finished.unwrap().unwrap().unwrap();
    }
}
