use anyhow::Context;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier_observability::init();

    let settings = courier_infra::Settings::from_env().context("invalid configuration")?;
    let consumers = courier_worker::wiring::build(&settings).await?;

    let cancel = CancellationToken::new();
    let handles: Vec<_> = consumers
        .into_iter()
        .map(|consumer| consumer.spawn(cancel.clone()))
        .collect();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    cancel.cancel();
    for handle in handles {
        handle.join().await;
    }
    Ok(())
}
