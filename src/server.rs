use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use chrono::Utc;
use tokio::{
    io::AsyncWriteExt as _,
    net::{UnixListener, UnixStream},
    sync::oneshot,
};

use crate::{
    config::Config,
    contact::{self, ContactRequest, GeminiResponse},
    scgi,
    store::MessageStore,
};

#[derive(Debug)]
pub struct ServerHandle {
    pub socket_path: PathBuf,
    shutdown_tx: oneshot::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stops accepting connections and removes the socket file. Connections
    /// already accepted run to completion on their own tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
        if let Err(err) = fs::remove_file(&self.socket_path)
            && err.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.socket_path.display(), "remove socket: {err}");
        }
    }
}

/// Serves the contact form on the socket named by the configuration.
pub async fn serve(config: &Config, store: Arc<MessageStore>) -> anyhow::Result<ServerHandle> {
    let socket_path = config.socket_path()?;
    serve_on(&socket_path, store).await
}

pub async fn serve_on(
    socket_path: &Path,
    store: Arc<MessageStore>,
) -> anyhow::Result<ServerHandle> {
    if let Some(parent) = socket_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create socket dir {}", parent.display()))?;
    }
    match fs::remove_file(socket_path) {
        Ok(()) => tracing::debug!(path = %socket_path.display(), "removed stale socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("remove stale socket {}", socket_path.display()));
        }
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("bind {}", socket_path.display()))?;
    tracing::info!(path = %socket_path.display(), "contact endpoint listening");

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                accept = listener.accept() => {
                    let (stream, _peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!("accept failed: {err}");
                            continue;
                        }
                    };
                    let store = Arc::clone(&store);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, store).await {
                            tracing::debug!("connection error: {err:#}");
                        }
                    });
                }
            }
        }
    });

    Ok(ServerHandle {
        socket_path: socket_path.to_path_buf(),
        shutdown_tx,
        join,
    })
}

async fn handle_connection(
    mut stream: UnixStream,
    store: Arc<MessageStore>,
) -> anyhow::Result<()> {
    let request = match scgi::read_request(&mut stream).await {
        Ok(request) => ContactRequest::from_scgi(&request),
        Err(err) => {
            tracing::warn!("rejecting malformed scgi request: {err}");
            let response = GeminiResponse::TemporaryFailure {
                meta: contact::FAILURE.to_owned(),
            };
            stream.write_all(&response.to_bytes()).await?;
            stream.shutdown().await?;
            return Ok(());
        }
    };
    tracing::debug!(
        script_path = %request.script_path,
        path_info = %request.path_info,
        "contact request"
    );

    let response =
        tokio::task::spawn_blocking(move || contact::handle(&store, &request, Utc::now()))
            .await
            .context("join contact handler")?;

    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
