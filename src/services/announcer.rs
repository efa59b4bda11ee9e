//! End-of-game announcements.
//!
//! Announcing is fire-and-forget: the engine spawns it after a game is
//! recorded and never waits for it.

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{info, warn};

use crate::state::game::{FinishedGameRecord, Winner};

/// Summary handed to an [`Announcer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announcement {
    pub winner: Winner,
    pub team1_score: u32,
    pub team2_score: u32,
}

impl Announcement {
    /// Sentence read out to the players.
    pub fn text(&self) -> String {
        format!(
            "The winner is {}. Team 1 scored {} points and Team 2 scored {} points.",
            self.winner.label(),
            self.team1_score,
            self.team2_score
        )
    }
}

impl From<&FinishedGameRecord> for Announcement {
    fn from(record: &FinishedGameRecord) -> Self {
        Self {
            winner: record.winner,
            team1_score: record.team1_score,
            team2_score: record.team2_score,
        }
    }
}

#[derive(Debug, Error)]
pub enum AnnounceError {
    #[error("announcement failed: {0}")]
    Failed(String),
}

/// Sink for finished-game announcements (speech, chat bot, ...).
pub trait Announcer: Send + Sync {
    fn announce(&self, announcement: Announcement) -> BoxFuture<'static, Result<(), AnnounceError>>;
}

/// Writes the announcement to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAnnouncer;

impl Announcer for LogAnnouncer {
    fn announce(&self, announcement: Announcement) -> BoxFuture<'static, Result<(), AnnounceError>> {
        Box::pin(async move {
            info!(winner = ?announcement.winner, "{}", announcement.text());
            Ok(())
        })
    }
}

/// Run `announcer` in the background; failures are logged and dropped.
pub fn spawn_announcement(announcer: Arc<dyn Announcer>, announcement: Announcement) {
    tokio::spawn(async move {
        if let Err(err) = announcer.announce(announcement).await {
            warn!(error = %err, "announcer failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recording(Arc<Mutex<Vec<String>>>);

    impl Announcer for Recording {
        fn announce(&self, announcement: Announcement) -> BoxFuture<'static, Result<(), AnnounceError>> {
            self.0.lock().unwrap().push(announcement.text());
            Box::pin(async { Err(AnnounceError::Failed("speaker unplugged".into())) })
        }
    }

    #[test]
    fn text_names_winner_and_scores() {
        let announcement = Announcement {
            winner: Winner::Team1,
            team1_score: 7,
            team2_score: 3,
        };
        assert_eq!(
            announcement.text(),
            "The winner is team1. Team 1 scored 7 points and Team 2 scored 3 points."
        );
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        spawn_announcement(
            Arc::new(Recording(Arc::clone(&spoken))),
            Announcement {
                winner: Winner::Tie,
                team1_score: 4,
                team2_score: 4,
            },
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(spoken.lock().unwrap().len(), 1);
        assert!(spoken.lock().unwrap()[0].starts_with("The winner is nobody"));
    }
}
