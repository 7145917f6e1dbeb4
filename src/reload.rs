//! Access list reload triggers
//!
//! Lists are reloaded in place when the config file's modification time
//! changes, and on SIGHUP. Services keep running either way.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::logger::log;
use crate::server_runner::Proxy;

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn reload(proxy: &Proxy, path: &Path, trigger: &'static str) {
    match proxy.reload_lists(path) {
        Ok(count) => log::info!(trigger = trigger, lists = count, "Access lists reloaded"),
        Err(e) => log::warn!(trigger = trigger, error = %e, "Access list reload rejected, keeping current lists"),
    }
}

/// Poll the file's modification time every `interval`
pub async fn watch_file(proxy: Arc<Proxy>, path: PathBuf, interval: Duration, token: CancellationToken) {
    let mut last = modified(&path);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let current = modified(&path);
        if current.is_some() && current != last {
            last = current;
            reload(&proxy, &path, "file change");
        }
    }
}

/// Reload on every SIGHUP
#[cfg(unix)]
pub async fn watch_sighup(proxy: Arc<Proxy>, path: PathBuf, token: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            log::warn!(error = %e, "Failed to install SIGHUP handler");
            return;
        }
    };
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                reload(&proxy, &path, "SIGHUP");
            }
        }
    }
}

/// Start every reload trigger; a zero interval disables polling
pub fn spawn(proxy: Arc<Proxy>, path: PathBuf, interval: Duration, token: CancellationToken) {
    if !interval.is_zero() {
        tokio::spawn(watch_file(Arc::clone(&proxy), path.clone(), interval, token.clone()));
    }
    #[cfg(unix)]
    tokio::spawn(watch_sighup(proxy, path, token));
}
