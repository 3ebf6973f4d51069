use std::sync::Arc;

use anyhow::Result;
use coordinator::dispatch::{self, Context};
use coordinator::settings::Settings;
use protocol::dummy::{DummyUnit, MEAN_MILLIS, WIDTH_MILLIS};
use protocol::UnitRaw;
use rand::Rng;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    utils::logger::init(&utils::logger::Config::default())?;

    let settings = Settings::load(std::env::args().nth(1).as_deref())?;
    let hostname = utils::process::hostname().to_string();
    info!("coordinator starting on {hostname}");

    let ctx = Arc::new(Context::new(settings, hostname));
    submit_demo_jobs(&ctx)?;

    let listener = dispatch::bind(&ctx.settings).await?;
    tokio::spawn(dispatch::serve(Arc::clone(&ctx), listener));

    dispatch::wait_until_finished(&ctx).await;
    Ok(())
}

fn submit_demo_jobs(ctx: &Context) -> Result<()> {
    let mut rng = rand::thread_rng();
    for n in 1..=ctx.settings.demo_jobs {
        let unit = DummyUnit {
            millis: rng.gen_range(MEAN_MILLIS - WIDTH_MILLIS..=MEAN_MILLIS + WIDTH_MILLIS),
            fail: ctx.settings.demo_fail_every != 0 && n % ctx.settings.demo_fail_every == 0,
        };
        let raw = UnitRaw::pack(&unit)?;
        let id = ctx.registry.submit(raw, ctx.hostname.clone());
        info!("queued demo job {id} ({} ms)", unit.millis);
    }
    Ok(())
}
