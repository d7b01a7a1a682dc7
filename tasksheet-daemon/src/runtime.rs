use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use tasksheet_core::config;
use tasksheet_sync::{Backoff, StagingQueue, SyncEngine, SyncError, TickReport};

use crate::error::{io_err, DaemonError};
use crate::paths::{socket_path, tasksheet_root};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// On-demand tick requested over the socket.
struct SyncJob {
    respond_to: oneshot::Sender<Result<TickReport, String>>,
}

/// Worker bookkeeping exposed through `status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerState {
    pub ticks: u64,
    pub last_tick_at_unix: u64,
    pub last_error: Option<String>,
    pub last_report: Option<TickReport>,
    pub next_tick_in_secs: u64,
}

struct Shared {
    home: PathBuf,
    queue: Arc<StagingQueue>,
    state: RwLock<WorkerState>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load configuration under `home`, wire the HTTP-backed engine and run.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    config.validate()?;
    let queue = Arc::new(StagingQueue::at(&home));
    let engine = SyncEngine::from_config(&home, &config, queue)?;
    tracing::info!(
        spreadsheet = %config.spreadsheet_id,
        worksheet = %config.worksheet,
        "starting tasksheet daemon"
    );
    run_with_engine(home, engine, Backoff::from_config(&config)).await
}

/// Run the worker loop and socket server around an already-built engine.
pub async fn run_with_engine(
    home: PathBuf,
    engine: SyncEngine,
    backoff: Backoff,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let shared = Arc::new(Shared {
        home: home.clone(),
        queue: engine.queue.clone(),
        state: RwLock::new(WorkerState::default()),
        started_at_unix: unix_seconds_now(),
    });
    let engine = Arc::new(Mutex::new(engine));

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let worker_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = worker_task(engine, shared, backoff, sync_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(shared, sync_tx, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (worker_result, socket_result, signal_result) =
        tokio::join!(worker_handle, socket_handle, signal_handle);

    handle_join("worker", worker_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Tick immediately, then again after the delay chosen from the previous
/// outcome, or whenever a `sync` request arrives. A `sync` request during a
/// quota cool-down is answered with the remaining wait instead of a tick.
async fn worker_task(
    engine: Arc<Mutex<SyncEngine>>,
    shared: Arc<Shared>,
    backoff: Backoff,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut next_tick_at = Instant::now();
    let mut quota_until: Option<Instant> = None;
    loop {
        let job = tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => match maybe_job {
                Some(job) => Some(job),
                None => break,
            },
            _ = tokio::time::sleep_until(next_tick_at) => None,
        };

        if job.is_some() {
            if let Some(remaining) = cooldown_remaining(quota_until, Instant::now()) {
                tracing::info!(
                    remaining_secs = remaining.as_secs(),
                    "sync request refused during quota cool-down"
                );
                if let Some(job) = job {
                    let _ = job.respond_to.send(Err(cooldown_message(remaining)));
                }
                continue;
            }
        }

        let started = Instant::now();
        let result = run_tick(engine.clone()).await?;
        let delay = backoff.after(&result);
        next_tick_at = Instant::now() + delay;
        quota_until = match &result {
            Err(err) if err.is_quota() => Some(next_tick_at),
            _ => None,
        };
        record_tick(&shared, &result, delay).await;

        match &result {
            Ok(report) if report.drained > 0 => tracing::info!(
                drained = report.drained,
                skipped = report.skipped,
                duration_ms = started.elapsed().as_millis() as u64,
                "worker tick finished",
            ),
            Ok(_) => tracing::debug!("worker tick found empty queue"),
            Err(err) => tracing::error!(
                error = %err,
                quota = err.is_quota(),
                retry_in_secs = delay.as_secs(),
                "worker tick failed",
            ),
        }

        if let Some(job) = job {
            let _ = job.respond_to.send(result.map_err(|err| err.to_string()));
        }
    }
    Ok(())
}

/// Time left in a quota cool-down ending at `until`, if one is running.
fn cooldown_remaining(until: Option<Instant>, now: Instant) -> Option<Duration> {
    until
        .filter(|until| *until > now)
        .map(|until| until - now)
}

fn cooldown_message(remaining: Duration) -> String {
    format!(
        "quota cool-down in effect, next tick in {}s",
        remaining.as_secs_f64().ceil() as u64
    )
}

async fn run_tick(
    engine: Arc<Mutex<SyncEngine>>,
) -> Result<Result<TickReport, SyncError>, DaemonError> {
    tokio::task::spawn_blocking(move || {
        let mut engine = engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        engine.tick()
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("tick join error: {err}")))
}

async fn record_tick(shared: &Shared, result: &Result<TickReport, SyncError>, delay: Duration) {
    let mut state = shared.state.write().await;
    state.ticks += 1;
    state.last_tick_at_unix = unix_seconds_now();
    state.next_tick_in_secs = delay.as_secs();
    match result {
        Ok(report) => {
            state.last_error = None;
            state.last_report = Some(report.clone());
        }
        Err(err) => state.last_error = Some(err.to_string()),
    }
}

async fn socket_server_task(
    shared: Arc<Shared>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&shared.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let shared = shared.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, shared, sync_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    shared: Arc<Shared>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&shared).await),
            "enqueue" => handle_enqueue(&shared, request.key, request.payload).await,
            "sync" => match request_tick(&sync_tx).await {
                Ok(report) => DaemonResponse::ok(json!(report)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

async fn handle_enqueue(
    shared: &Shared,
    key: Option<String>,
    payload: Option<Value>,
) -> DaemonResponse {
    let Some(key) = key else {
        return DaemonResponse::error("enqueue requires a 'key'");
    };
    let payload = payload.unwrap_or_else(|| json!({}));
    if !payload.is_object() {
        return DaemonResponse::error("enqueue 'payload' must be a JSON object");
    }

    let queue = shared.queue.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let entry = queue.enqueue(&key, payload)?;
        let depth = queue.len()?;
        Ok::<_, SyncError>((entry, depth))
    })
    .await;

    match outcome {
        Ok(Ok((entry, depth))) => {
            tracing::info!(key = %entry.key, depth, "task change enqueued");
            DaemonResponse::ok(json!({ "key": entry.key, "queue_depth": depth }))
        }
        Ok(Err(err)) => DaemonResponse::error(err.to_string()),
        Err(err) => DaemonResponse::error(format!("enqueue join error: {err}")),
    }
}

async fn request_tick(sync_tx: &mpsc::Sender<SyncJob>) -> Result<TickReport, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob { respond_to: tx })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

async fn build_status_payload(shared: &Shared) -> Value {
    let state = shared.state.read().await.clone();

    let queue = shared.queue.clone();
    let queue_depth = tokio::task::spawn_blocking(move || queue.len())
        .await
        .ok()
        .and_then(Result::ok);

    json!({
        "running": true,
        "started_at_unix": shared.started_at_unix,
        "queue_depth": queue_depth,
        "ticks": state.ticks,
        "last_tick_at_unix": state.last_tick_at_unix,
        "next_tick_in_secs": state.next_tick_in_secs,
        "last_error": state.last_error,
        "last_report": state.last_report,
        "socket": socket_path(&shared.home).display().to_string(),
        "queue_path": shared.queue.path().display().to_string(),
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = tasksheet_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `fmt` subscriber filtered by `RUST_LOG`, `info` by default.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksheet_sync::SheetError;
    use tempfile::TempDir;

    fn shared(home: &Path) -> Shared {
        Shared {
            home: home.to_path_buf(),
            queue: Arc::new(StagingQueue::at(home)),
            state: RwLock::new(WorkerState::default()),
            started_at_unix: 1_000_000,
        }
    }

    #[tokio::test]
    async fn status_payload_before_first_tick() {
        let home = TempDir::new().expect("home");
        let payload = build_status_payload(&shared(home.path())).await;

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["ticks"], json!(0));
        assert_eq!(payload["queue_depth"], json!(0));
        assert_eq!(payload["last_error"], Value::Null);
    }

    #[tokio::test]
    async fn enqueue_rejects_non_object_payload() {
        let home = TempDir::new().expect("home");
        let shared = shared(home.path());
        let response =
            handle_enqueue(&shared, Some("P-1".to_string()), Some(json!([1, 2]))).await;
        assert!(!response.ok);
        let response = handle_enqueue(&shared, None, Some(json!({}))).await;
        assert!(!response.ok);
        assert_eq!(shared.queue.len().expect("len"), 0);
    }

    #[tokio::test]
    async fn enqueue_reports_queue_depth() {
        let home = TempDir::new().expect("home");
        let shared = shared(home.path());
        handle_enqueue(&shared, Some("P-1".to_string()), Some(json!({"status": "Open"}))).await;
        let response =
            handle_enqueue(&shared, Some("P-2".to_string()), None).await;
        assert!(response.ok);
        assert_eq!(response.data.expect("data")["queue_depth"], json!(2));
    }

    #[test]
    fn cooldown_only_applies_before_deadline() {
        let now = Instant::now();
        let until = now + Duration::from_secs(60);
        assert_eq!(cooldown_remaining(None, now), None);
        assert_eq!(
            cooldown_remaining(Some(until), now),
            Some(Duration::from_secs(60))
        );
        assert_eq!(cooldown_remaining(Some(until), until), None);
        assert_eq!(
            cooldown_remaining(Some(now), now + Duration::from_secs(1)),
            None
        );
    }

    #[test]
    fn cooldown_message_rounds_up() {
        assert_eq!(
            cooldown_message(Duration::from_millis(59_200)),
            "quota cool-down in effect, next tick in 60s"
        );
    }

    #[tokio::test]
    async fn failed_tick_is_recorded_then_cleared() {
        let home = TempDir::new().expect("home");
        let shared = shared(home.path());
        let failure: Result<TickReport, SyncError> = Err(SheetError::Quota {
            status: 429,
            message: "slow down".to_string(),
        }
        .into());
        record_tick(&shared, &failure, Duration::from_secs(60)).await;
        {
            let state = shared.state.read().await;
            assert_eq!(state.ticks, 1);
            assert_eq!(state.next_tick_in_secs, 60);
            assert!(state.last_error.as_deref().unwrap_or("").contains("quota"));
        }

        record_tick(&shared, &Ok(TickReport::default()), Duration::from_secs(30)).await;
        let state = shared.state.read().await;
        assert_eq!(state.ticks, 2);
        assert!(state.last_error.is_none());
        assert!(state.last_report.is_some());
    }
}
