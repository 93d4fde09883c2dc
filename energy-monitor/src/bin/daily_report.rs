use anyhow::{Context, Result};
use energy_client::{aggregate::round_to, ReadingStore, TimeRange};
use energy_monitor::{config::AppConfig, observability};
use std::env;
use time::{macros::format_description, Date, OffsetDateTime};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let date = match env::args().nth(1) {
        Some(arg) => Date::parse(&arg, format_description!("[year]-[month]-[day]"))
            .with_context(|| format!("usage: daily_report [YYYY-MM-DD], got '{arg}'"))?,
        None => OffsetDateTime::now_utc().date(),
    };

    let cfg = AppConfig::load()?;
    let store = ReadingStore::open(&cfg.storage.database_path, 1).await?;

    let range = TimeRange::day(date);
    let (readings, kwh) = store.count_and_sum(range).await?;
    let cost = kwh * cfg.pricing.cost_rate;

    tracing::info!(
        %date,
        readings,
        kwh = round_to(kwh, 3),
        cost = round_to(cost, 2),
        cost_rate = cfg.pricing.cost_rate,
        "daily energy report"
    );

    match store.latest().await? {
        Some(r) => tracing::info!(
            ts = %r.ts_key(),
            power = r.power,
            voltage = r.voltage,
            "latest reading"
        ),
        None => tracing::info!("no readings stored yet"),
    }

    store.close().await;
    Ok(())
}
