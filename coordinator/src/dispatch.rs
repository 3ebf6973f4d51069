use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use protocol::{CoordinatorMsg, WorkerMsg};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use utils::codec::{tokio_util::codec::Framed, BincodeCodec};

use crate::registry::{Registry, RegistryError};
use crate::settings::Settings;
use crate::workers::KnownWorkers;

type WireFramed = Framed<TcpStream, BincodeCodec<CoordinatorMsg, WorkerMsg>>;

/// Shared state of one coordinator process.
pub struct Context {
    pub registry: Registry,
    pub workers: KnownWorkers,
    pub settings: Settings,
    pub hostname: String,
}

impl Context {
    pub fn new(settings: Settings, hostname: String) -> Self {
        Self {
            registry: Registry::new(settings.quotas.clone()),
            workers: KnownWorkers::new(),
            settings,
            hostname,
        }
    }
}

/// Registry bookkeeping errors are never recoverable within a session. They
/// end it with an error so the disconnect path still deregisters the worker
/// and requeues its jobs.
fn fatal(err: RegistryError) -> anyhow::Error {
    anyhow::anyhow!("registry invariant violated: {err}")
}

pub async fn bind(settings: &Settings) -> Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", settings.listening_port);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!("listening on {addr}");
                return Ok(listener);
            }
            Err(err) if attempt < settings.max_bind_attempts => {
                warn!("failed to bind {addr} (attempt {attempt}): {err}");
                tokio::time::sleep(Duration::from_secs(settings.bind_retry_delay_secs)).await;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("could not bind {addr} after {attempt} attempts")
                });
            }
        }
    }
}

pub async fn serve(ctx: Arc<Context>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    utils::log_if_err!(handle_connection(ctx, stream, peer).await, "worker session");
                });
            }
            Err(err) => {
                error!("accept failed: {err}");
            }
        }
    }
}

async fn handle_connection(ctx: Arc<Context>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let mut framed = Framed::new(stream, BincodeCodec::new());
    framed
        .send(CoordinatorMsg::Hello(ctx.hostname.clone()))
        .await?;

    let announced = match framed.next().await {
        Some(Ok(WorkerMsg::Hello(name))) => name,
        Some(Ok(other)) => bail!("expected a hello from {peer}, got {other:?}"),
        Some(Err(err)) => return Err(err).context("reading the hello frame"),
        None => bail!("{peer} disconnected before saying hello"),
    };

    let (outbox, inbox) = unbounded_channel();
    let name = ctx.workers.register(&announced, outbox.clone())?;
    info!("worker {name} connected from {peer}");

    let result = connection_loop(&ctx, &name, framed, inbox, outbox).await;

    ctx.workers.remove(&name);
    let resubmitted = ctx.registry.mark_as_dead(&name);
    if resubmitted > 0 {
        info!("worker {name} gone, {resubmitted} jobs back in the queue");
    } else {
        info!("worker {name} gone");
    }
    result
}

async fn connection_loop(
    ctx: &Context,
    name: &str,
    framed: WireFramed,
    mut inbox: UnboundedReceiver<CoordinatorMsg>,
    outbox: UnboundedSender<CoordinatorMsg>,
) -> Result<()> {
    let (mut sink, mut stream): (SplitSink<WireFramed, CoordinatorMsg>, SplitStream<WireFramed>) =
        framed.split();

    // fill the worker's pipeline up front; results trigger refills one by one
    for _ in 0..ctx.registry.quota(name) {
        if !ctx.registry.send_out_work(name, &outbox).map_err(fatal)? {
            break;
        }
    }

    // a quiet connection gets nudged in case work arrived while it was idle
    let idle_period = Duration::from_secs(ctx.settings.idle_interval_secs);
    let mut idle = interval_at(Instant::now() + idle_period, idle_period);
    idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            queued = inbox.recv() => match queued {
                Some(msg) => sink.send(msg).await?,
                // the registry dropped our outbox; cannot happen while we hold a clone
                None => bail!("outbox closed for {name}"),
            },
            frame = stream.next() => match frame {
                Some(Ok(WorkerMsg::Result(envelope))) => {
                    info!("job {} settled on {name}: {}", envelope.id, outcome_label(&envelope));
                    ctx.registry
                        .receive(envelope.id, envelope.origin, envelope.outcome)
                        .map_err(fatal)?;
                    ctx.registry.send_out_work(name, &outbox).map_err(fatal)?;
                    idle.reset();
                }
                Some(Ok(WorkerMsg::Hello(other))) => {
                    warn!("{name} sent a second hello as {other}, ignoring");
                }
                Some(Err(err)) => return Err(err).context("reading from the worker"),
                None => {
                    info!("worker {name} hung up");
                    return Ok(());
                }
            },
            _ = idle.tick() => {
                ctx.registry.send_out_work(name, &outbox).map_err(fatal)?;
            }
        }
    }
}

fn outcome_label(envelope: &protocol::ResultEnvelope) -> &'static str {
    if envelope.outcome.is_completed() {
        "completed"
    } else {
        "failed"
    }
}

/// Blocks (asynchronously) until every registered job is terminal, then logs
/// a per-job summary.
pub async fn wait_until_finished(ctx: &Context) {
    while !ctx.registry.finished() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    let report = ctx.registry.report();
    info!("all {} jobs settled", report.len());
    for row in &report {
        let host = row.host.as_deref().unwrap_or("-");
        info!("job {} on {host}: {}", row.id, row.status);
    }
}
