//! End-to-end sessions against a live coordinator on an ephemeral port,
//! with the test playing the worker side of the wire.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use coordinator::dispatch::{self, Context};
use coordinator::settings::{QuotaRule, Settings};
use futures::{SinkExt, StreamExt};
use protocol::dummy::DummyUnit;
use protocol::{
    CoordinatorMsg, JobId, OutputRaw, ResultEnvelope, UnitKind, UnitRaw, WorkEnvelope,
    WorkOutcome, WorkerMsg,
};
use tokio::net::{TcpListener, TcpStream};
use utils::codec::{tokio_util::codec::Framed, BincodeCodec};

type WorkerSide = Framed<TcpStream, BincodeCodec<WorkerMsg, CoordinatorMsg>>;

async fn start_coordinator(quotas: Vec<QuotaRule>, default_quota: usize) -> (Arc<Context>, u16) {
    let mut settings = Settings::default();
    settings.quotas.rules = quotas;
    settings.quotas.default = default_quota;
    // keep the idle nudge out of the way; tests drive dispatch via results
    settings.idle_interval_secs = 60;

    let ctx = Arc::new(Context::new(settings, "test-coordinator".to_string()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(dispatch::serve(Arc::clone(&ctx), listener));
    (ctx, port)
}

fn dummy_unit() -> UnitRaw {
    UnitRaw::pack(&DummyUnit {
        millis: 1,
        fail: false,
    })
    .unwrap()
}

async fn connect(port: u16, hostname: &str) -> WorkerSide {
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut framed = Framed::new(stream, BincodeCodec::new());
    framed
        .send(WorkerMsg::Hello(hostname.to_string()))
        .await
        .unwrap();
    match framed.next().await.unwrap().unwrap() {
        CoordinatorMsg::Hello(name) => assert_eq!(name, "test-coordinator"),
        other => panic!("expected a hello, got {other:?}"),
    }
    framed
}

async fn recv_work(framed: &mut WorkerSide) -> WorkEnvelope {
    loop {
        match framed.next().await.unwrap().unwrap() {
            CoordinatorMsg::Work(envelope) => return envelope,
            CoordinatorMsg::Hello(_) => continue,
        }
    }
}

async fn no_work_within(framed: &mut WorkerSide, window: Duration) {
    let got = tokio::time::timeout(window, framed.next()).await;
    assert!(got.is_err(), "expected silence, got {got:?}");
}

fn completed(id: JobId, worker: &str) -> WorkerMsg {
    WorkerMsg::Result(ResultEnvelope {
        outcome: WorkOutcome::Completed(OutputRaw {
            kind: UnitKind::Dummy,
            payload: Vec::new(),
        }),
        origin: worker.to_string(),
        id,
    })
}

async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("gave up waiting for {what}");
}

#[tokio::test]
async fn quota_pipelining_and_refill() {
    let rules = vec![QuotaRule {
        host: "solo".to_string(),
        slots: 2,
    }];
    let (ctx, port) = start_coordinator(rules, 4).await;
    for _ in 0..3 {
        ctx.registry.submit(dummy_unit(), "origin".to_string());
    }

    let mut worker = connect(port, "solo").await;

    // the pipeline is primed up to the quota, no further
    let first = recv_work(&mut worker).await;
    let second = recv_work(&mut worker).await;
    assert_eq!((first.id, second.id), (1, 2));
    no_work_within(&mut worker, Duration::from_millis(300)).await;

    // one result in, one job out
    worker.send(completed(first.id, "solo")).await.unwrap();
    let third = recv_work(&mut worker).await;
    assert_eq!(third.id, 3);

    worker.send(completed(second.id, "solo")).await.unwrap();
    worker.send(completed(third.id, "solo")).await.unwrap();
    wait_for("all jobs to settle", || async { ctx.registry.finished() }).await;
}

#[tokio::test]
async fn dead_worker_jobs_move_to_the_next_worker() {
    let (ctx, port) = start_coordinator(Vec::new(), 2).await;
    for _ in 0..2 {
        ctx.registry.submit(dummy_unit(), "origin".to_string());
    }

    let mut doomed = connect(port, "doomed").await;
    let a = recv_work(&mut doomed).await;
    let b = recv_work(&mut doomed).await;
    drop(doomed);

    wait_for("the jobs to be requeued", || async {
        ctx.workers.is_empty()
            && ctx
                .registry
                .report()
                .iter()
                .all(|row| row.status.is_submitted())
    })
    .await;

    // both in-flight jobs come back under their original ids
    let mut heir = connect(port, "heir").await;
    let mut ids = vec![recv_work(&mut heir).await.id, recv_work(&mut heir).await.id];
    ids.sort_unstable();
    let mut expected = vec![a.id, b.id];
    expected.sort_unstable();
    assert_eq!(ids, expected);

    for id in ids {
        heir.send(completed(id, "heir")).await.unwrap();
    }
    wait_for("all jobs to settle", || async { ctx.registry.finished() }).await;
}

#[tokio::test]
async fn twin_hostnames_work_side_by_side() {
    let rules = vec![QuotaRule {
        host: "twin".to_string(),
        slots: 1,
    }];
    let (ctx, port) = start_coordinator(rules, 4).await;
    for _ in 0..2 {
        ctx.registry.submit(dummy_unit(), "origin".to_string());
    }

    let mut first = connect(port, "twin").await;
    let job_a = recv_work(&mut first).await;
    no_work_within(&mut first, Duration::from_millis(200)).await;

    // the second session gets renamed and its own one-job budget
    let mut second = connect(port, "twin").await;
    let job_b = recv_work(&mut second).await;
    assert_ne!(job_a.id, job_b.id);

    first.send(completed(job_a.id, "twin")).await.unwrap();
    second.send(completed(job_b.id, "twin-1")).await.unwrap();
    wait_for("all jobs to settle", || async { ctx.registry.finished() }).await;
}

#[tokio::test]
async fn a_bogus_result_ends_the_session_and_requeues_its_jobs() {
    let (ctx, port) = start_coordinator(Vec::new(), 4).await;
    let id = ctx.registry.submit(dummy_unit(), "origin".to_string());

    let mut confused = connect(port, "confused").await;
    assert_eq!(recv_work(&mut confused).await.id, id);

    // a result for a job that was never registered tears the session down,
    // and the teardown still deregisters and requeues
    confused.send(completed(999, "confused")).await.unwrap();
    wait_for("the session to be torn down", || async {
        ctx.workers.is_empty()
            && ctx
                .registry
                .report()
                .iter()
                .all(|row| row.status.is_submitted())
    })
    .await;

    let mut heir = connect(port, "heir").await;
    assert_eq!(recv_work(&mut heir).await.id, id);
    heir.send(completed(id, "heir")).await.unwrap();
    wait_for("all jobs to settle", || async { ctx.registry.finished() }).await;
}

#[tokio::test]
async fn the_idle_nudge_picks_up_late_submissions() {
    let mut settings = Settings::default();
    settings.idle_interval_secs = 1;
    let ctx = Arc::new(Context::new(settings, "test-coordinator".to_string()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(dispatch::serve(Arc::clone(&ctx), listener));

    // connect first, submit after: only the nudge can deliver this job
    let mut worker = connect(port, "latecomer").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let id = ctx.registry.submit(dummy_unit(), "origin".to_string());

    let job = recv_work(&mut worker).await;
    assert_eq!(job.id, id);
}
