/// One tally run: resolve the chat, fetch every message, pair markers,
/// merge with this month's earlier snapshots, then persist and render.

use crate::config::{ChatTarget, Config};
use crate::error::TallyError;
use crate::pairing::{self, Pairing};
use crate::report::{self, RankedEntry};
use crate::store::{self, SnapshotStore, WrittenSnapshot};
use crate::youtube::{self, ChatService};
use chrono::{DateTime, FixedOffset};

/// Everything a run produced, for the caller to print.
#[derive(Debug)]
pub struct RunSummary {
    pub live_chat_id: String,
    pub message_count: usize,
    pub pairing: Pairing,
    pub ranking: Vec<RankedEntry>,
    pub report: String,
    pub written: WrittenSnapshot,
}

pub fn run(
    config: &Config,
    service: &dyn ChatService,
    now: DateTime<FixedOffset>,
) -> Result<RunSummary, TallyError> {
    let live_chat_id = match config.chat_target()? {
        ChatTarget::LiveChat(id) => id,
        ChatTarget::Video(video_id) => youtube::resolve_live_chat_id(service, &video_id)?,
    };

    let messages = youtube::fetch_all_messages(service, &live_chat_id, config.max_pages);

    let pairing = pairing::aggregate(&messages, &config.markers);
    if pairing.totals.is_empty() {
        log::info!("No completed sessions in {} message(s)", messages.len());
    } else {
        log::info!(
            "{} session(s) from {} author(s)",
            pairing.sessions.len(),
            pairing.totals.len()
        );
    }

    // Load before writing so this run's own snapshot is not counted twice.
    let store = SnapshotStore::new(&config.store_dir);
    let month = store::month_key(&now);
    let accumulated = store.load_month(&month)?;

    let merged = report::merge(accumulated, &pairing.totals);
    let ranking = report::rank(&merged, &pairing.totals);
    let rendered = report::render(&ranking);

    let written = store.write(&now, &pairing.totals, &rendered)?;

    Ok(RunSummary {
        live_chat_id,
        message_count: messages.len(),
        pairing,
        ranking,
        report: rendered,
        written,
    })
}
