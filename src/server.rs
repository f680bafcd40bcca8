use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use hyper::service::service_fn;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder as ConnectionBuilder,
};
use tokio::{net::TcpListener, sync::oneshot};

use crate::{
    config::Config,
    router::RequestRouter,
    schema::SchemaManager,
    storage::{RecordStore, StorageContext},
};

#[derive(Debug)]
pub struct ServerHandle {
    pub listen_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stops accepting connections. In-flight connections finish on their own
    /// tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}

/// Provisions storage for `config`, then serves the intake endpoint on
/// `server.listen`. A provisioning failure aborts startup.
pub async fn serve(config: &Config) -> anyhow::Result<ServerHandle> {
    let context = StorageContext::from_config(&config.storage)?;
    SchemaManager::new(context.clone()).provision().await?;

    let store = RecordStore::with_random_ref_ids(context);
    match store.count().await {
        Ok(count) => tracing::info!(records = count, "record store opened"),
        Err(err) => tracing::warn!("count applications at startup: {err}"),
    }

    let router = RequestRouter::from_config(&config.server, store);
    serve_router(config.server.listen, router).await
}

pub async fn serve_router(
    listen: SocketAddr,
    router: RequestRouter,
) -> anyhow::Result<ServerHandle> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|err| anyhow::anyhow!("bind {listen}: {err}"))?;
    let listen_addr = listener
        .local_addr()
        .map_err(|err| anyhow::anyhow!("get local_addr: {err}"))?;
    tracing::info!(%listen_addr, "intake endpoint listening");

    let router = Arc::new(router);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                accept = listener.accept() => {
                    let (stream, peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::debug!("accept error: {err}");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let router = Arc::clone(&router);
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let router = Arc::clone(&router);
                            async move { Ok::<_, Infallible>(router.handle(req).await) }
                        });
                        let builder = ConnectionBuilder::new(TokioExecutor::new());
                        if let Err(err) = builder.serve_connection(io, service).await {
                            tracing::debug!(%peer, "connection error: {err}");
                        }
                    });
                }
            }
        }
        tracing::info!("intake endpoint stopped");
    });

    Ok(ServerHandle {
        listen_addr,
        shutdown_tx,
        join,
    })
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use rusqlite::Connection;
    use tempfile::tempdir;

    use super::serve;
    use crate::config::Config;

    #[tokio::test(flavor = "current_thread")]
    async fn provisioning_waits_on_a_locked_database_without_stalling_the_runtime() {
        let dir = tempdir().unwrap();
        let namespace_dir = dir.path().join("admission_db");
        fs::create_dir_all(&namespace_dir).unwrap();
        let holder = Connection::open(namespace_dir.join("intake.db")).unwrap();
        holder
            .execute_batch("CREATE TABLE scratch (x INTEGER); BEGIN EXCLUSIVE;")
            .unwrap();

        // Runs on the same single-threaded runtime that drives `serve`.
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            holder.execute_batch("COMMIT;").unwrap();
        });

        let config = Config::from_toml_str(&format!(
            r#"
[server]
listen = "127.0.0.1:0"

[storage]
path = "{}"
busy_timeout_ms = 5000
"#,
            dir.path().display()
        ))
        .unwrap();

        let server = serve(&config)
            .await
            .expect("provisioning should proceed once the lock is released");
        release.await.unwrap();
        server.shutdown().await;
    }
}
