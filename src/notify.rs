//! Hand-off of update events to whatever delivers them.

use crate::models::{ChapterUpdate, UpdateKind};
use tokio::sync::mpsc;

/// Receives every notifiable update. Fire-and-forget: delivery failures are
/// the implementation's problem.
pub trait Notifier: Send + Sync {
    fn emit(&self, update: ChapterUpdate);
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn emit(&self, update: ChapterUpdate) {
        match update.kind {
            UpdateKind::NewChapters(n) => {
                let names: Vec<&str> = update.notify_chapters.iter().map(|c| c.name.as_str()).collect();
                log::info!(
                    "[{}] '{}': {} new ({})",
                    update.key.source,
                    update.series_title,
                    n,
                    names.join(", ")
                );
            }
            UpdateKind::StatusChanged => {
                if let Some(change) = update.status_change {
                    log::info!(
                        "[{}] '{}' is now {} (was {})",
                        update.key.source,
                        update.series_title,
                        change.to,
                        change.from
                    );
                }
            }
            UpdateKind::NoChange | UpdateKind::Unavailable => {
                log::debug!("[{}] '{}': {:?}", update.key.source, update.series_title, update.kind);
            }
        }
    }
}

/// Forwards updates to an external dispatcher over a channel.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<ChapterUpdate>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChapterUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn emit(&self, update: ChapterUpdate) {
        let key = update.key.clone();
        if self.tx.send(update).is_err() {
            log::warn!("[{}] Dispatcher is gone, dropped update for '{}'", key.source, key.id);
        }
    }
}
