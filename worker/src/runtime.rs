use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use anyhow::{Context, Result};
use executor::{JobHandle, LocalExecutor, WorkUnit};
use futures::stream::FuturesUnordered;
use futures::{SinkExt, StreamExt};
use pin_project_lite::pin_project;
use protocol::dummy::DummyUnit;
use protocol::{
    CoordinatorMsg, JobId, OutputRaw, ResultEnvelope, UnitKind, UnitRaw, WorkEnvelope,
    WorkOutcome, WorkerMsg,
};
use tokio::net::TcpStream;
use tracing::{info, warn};
use utils::codec::{tokio_util::codec::Framed, BincodeCodec};

use crate::settings::Settings;

/// Bridges a wire-format unit onto the local pool: unpacks the concrete type
/// behind the kind tag, runs it, packs the output back up.
pub struct RemoteExec {
    pub unit: UnitRaw,
}

impl WorkUnit for RemoteExec {
    type Output = OutputRaw;

    fn execute(self) -> Result<OutputRaw> {
        match self.unit.kind {
            UnitKind::Dummy => {
                let unit: DummyUnit = self.unit.unpack()?;
                let output = unit.run()?;
                OutputRaw::pack::<DummyUnit>(&output)
            }
        }
    }
}

pin_project! {
    /// A job in flight on the local pool, tagged with its coordinator id so
    /// the result can be routed back.
    struct PendingJob {
        id: JobId,
        #[pin]
        handle: JobHandle<OutputRaw>,
    }
}

impl Future for PendingJob {
    type Output = (JobId, Result<OutputRaw>);

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let id = *this.id;
        this.handle.poll(cx).map(|outcome| (id, outcome))
    }
}

fn start(pool: &LocalExecutor, envelope: WorkEnvelope) -> PendingJob {
    PendingJob {
        id: envelope.id,
        handle: pool.submit(RemoteExec {
            unit: envelope.unit,
        }),
    }
}

async fn connect_with_retry(settings: &Settings) -> Result<TcpStream> {
    let addr = &settings.coordinator_addr;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!("connected to coordinator at {addr}");
                return Ok(stream);
            }
            Err(err) if attempt >= settings.max_connection_attempts => {
                return Err(err)
                    .with_context(|| format!("could not reach {addr} after {attempt} attempts"));
            }
            Err(err) if err.kind() == ErrorKind::ConnectionRefused => {
                warn!("{addr} refused the connection (attempt {attempt}), is the coordinator up?");
            }
            Err(err) => {
                warn!("connecting to {addr} failed (attempt {attempt}): {err}");
            }
        }
        tokio::time::sleep(Duration::from_secs(settings.connection_retry_delay_secs)).await;
    }
}

/// Connects to the coordinator and processes work until the session ends.
/// Returns `Ok(())` on a clean hangup from the coordinator side.
pub async fn run(settings: &Settings, hostname: &str) -> Result<()> {
    let threads = settings.threads();
    let pool = LocalExecutor::new(threads, threads * 2);

    let stream = connect_with_retry(settings).await?;
    let mut framed = Framed::new(stream, BincodeCodec::<WorkerMsg, CoordinatorMsg>::new());
    framed.send(WorkerMsg::Hello(hostname.to_string())).await?;

    let (mut sink, mut stream) = framed.split();
    let mut jobs = FuturesUnordered::new();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(CoordinatorMsg::Hello(name))) => {
                    info!("serving coordinator {name}");
                }
                Some(Ok(CoordinatorMsg::Work(envelope))) => {
                    info!("picked up job {}", envelope.id);
                    jobs.push(start(&pool, envelope));
                }
                Some(Err(err)) => return Err(err).context("reading from the coordinator"),
                None => {
                    info!("coordinator hung up, shutting down");
                    return Ok(());
                }
            },
            Some((id, outcome)) = jobs.next() => {
                let outcome = match outcome {
                    Ok(output) => WorkOutcome::Completed(output),
                    Err(err) => {
                        warn!("job {id} failed: {err:#}");
                        WorkOutcome::Failed(format!("{err:#}"))
                    }
                };
                sink.send(WorkerMsg::Result(ResultEnvelope {
                    outcome,
                    origin: hostname.to_string(),
                    id,
                }))
                .await?;
            }
        }
    }
}
