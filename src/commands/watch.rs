//! `watch`: keep a page mounted and report every change it applies

use crate::app::App;
use crate::error::{Error, Result};
use crate::shell::Route;
use crate::views::View;
use serde::Serialize;
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct WatchSummary {
    pub page: String,
    pub changes: usize,
    pub polls: usize,
    pub live: bool,
}

/// Follow `route` until Ctrl-C, or until `max_changes` changes were applied
pub async fn cmd_watch(app: &mut App, route: Route, max_changes: Option<usize>) -> Result<WatchSummary> {
    app.require_session(route)?;
    app.shell.mount().await;
    if app.shell.banner().is_read_only() {
        println!("⚠ Backend disconnected. Read-only.");
    }

    let mut view: Box<dyn View> = app.shell.page(route).ok_or(Error::NotLoggedIn)?;
    view.mount().await?;

    let mut summary = WatchSummary {
        page: view.name().to_string(),
        changes: 0,
        polls: 0,
        live: view.subscriptions_mut().live_count() > 0,
    };
    if !summary.live {
        warn!("No live subscriptions for {}; only polling", summary.page);
    }
    let poll_every = view.poll_interval();
    if !summary.live && poll_every.is_none() {
        println!("Nothing to watch on {}: live updates are off.", summary.page);
        view.teardown();
        app.shell.teardown();
        return Ok(summary);
    }
    info!("Watching {} (Ctrl-C to stop)", summary.page);

    let period = poll_every.unwrap_or(std::time::Duration::from_secs(3600));
    let mut ticker = interval_at(Instant::now() + period, period);
    let mut live = summary.live;
    let mut sidebar_live = true;

    loop {
        if max_changes.is_some_and(|max| summary.changes >= max) {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick(), if poll_every.is_some() => {
                view.poll().await;
                summary.polls += 1;
            }
            next = view.subscriptions_mut().next(), if live => match next {
                Some((slot, change)) => {
                    let id = change.id().unwrap_or_else(|| "-".to_string());
                    println!("[{}] {} {} {}", summary.page, change.kind.as_wire(), change.table, id);
                    if let Err(e) = view.on_change(slot, change).await {
                        warn!("[{}] ignoring change on {}: {}", summary.page, slot, e);
                    }
                    summary.changes += 1;
                }
                None => {
                    warn!("Live updates for {} ended", summary.page);
                    live = false;
                    if poll_every.is_none() {
                        break;
                    }
                }
            },
            next = app.shell.sidebar_mut().subscriptions_mut().next(), if sidebar_live => match next {
                Some((slot, change)) => {
                    if let Err(e) = app.shell.sidebar_mut().on_change(slot, change).await {
                        warn!("[sidebar] ignoring change on {}: {}", slot, e);
                    }
                }
                None => sidebar_live = false,
            },
        }
    }

    view.teardown();
    app.shell.teardown();
    Ok(summary)
}

pub fn print_watch(summary: &WatchSummary) {
    println!(
        "\nStopped watching {}: {} change(s) applied, {} poll(s)",
        summary.page, summary.changes, summary.polls
    );
}
