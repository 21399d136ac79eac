mod config;
mod error;
mod pairing;
mod report;
mod store;
mod tally;
mod youtube;

use crate::error::TallyError;
use crate::youtube::YouTubeClient;

use std::time::Duration;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("study-tally v{} starting...", env!("CARGO_PKG_VERSION"));

    let cfg = config::Config::load();
    log::info!("Store dir: {}", cfg.store_dir);

    if let Err(e) = run(&cfg) {
        log::error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

fn run(cfg: &config::Config) -> Result<(), TallyError> {
    cfg.validate()?;
    let offset = cfg.utc_offset()?;

    let client = YouTubeClient::new(
        &cfg.api_base_url,
        cfg.api_key()?,
        cfg.max_results,
        Duration::from_secs(cfg.request_timeout_s),
        offset,
    );

    let now = chrono::Utc::now().with_timezone(&offset);
    let summary = tally::run(cfg, &client, now)?;

    for session in &summary.pairing.sessions {
        log::debug!(
            "{}: {} → {} ({:.0}s)",
            session.author,
            session.started_at,
            session.ended_at,
            session.seconds
        );
    }
    log::info!(
        "Chat {}: {} message(s), {} open start(s) discarded",
        summary.live_chat_id,
        summary.message_count,
        summary.pairing.unmatched_starts
    );
    log::info!(
        "Snapshot {} / report {}",
        summary.written.snapshot.display(),
        summary.written.report.display()
    );

    if let Some(top) = summary.ranking.first() {
        log::info!(
            "{} author(s) ranked this month, top: {} ({:.0}s)",
            summary.ranking.len(),
            top.author,
            top.total_seconds
        );
    }

    if summary.pairing.sessions.is_empty() {
        println!("開始と終了のペアが見つかりませんでした。");
    }
    print!("{}", summary.report);
    Ok(())
}
