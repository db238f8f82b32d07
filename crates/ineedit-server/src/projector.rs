//! Meilisearch listing projector.
//!
//! The market pushes documents synchronously from its blocking threads; a
//! single tokio task drains the queue and talks HTTP, retrying with backoff.
//! Documents for sold, deleted or drafted listings become deletions.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use ineedit_market::{ListingDocument, ProjectorError, SearchProjector};

use crate::config::MeiliConfig;

const MAX_ATTEMPTS: u32 = 4;
const BASE_BACKOFF: Duration = Duration::from_millis(250);

pub struct MeiliProjector {
    queue: mpsc::UnboundedSender<ListingDocument>,
}

impl MeiliProjector {
    /// Start the delivery worker on the current tokio runtime.
    pub fn spawn(config: MeiliConfig) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver_loop(reqwest::Client::new(), config, rx));
        Self { queue }
    }
}

impl SearchProjector for MeiliProjector {
    fn upsert_or_remove(&self, doc: &ListingDocument) -> Result<(), ProjectorError> {
        self.queue
            .send(doc.clone())
            .map_err(|_| ProjectorError::Unavailable("search worker has stopped".into()))
    }
}

async fn deliver_loop(
    client: reqwest::Client,
    config: MeiliConfig,
    mut rx: mpsc::UnboundedReceiver<ListingDocument>,
) {
    while let Some(doc) = rx.recv().await {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match deliver(&client, &config, &doc).await {
                Ok(()) => {
                    debug!(listing_id = %doc.id, indexed = doc.should_index(), "Search index updated");
                    break;
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(listing_id = %doc.id, attempt, error = %e, "Search index update failed, retrying");
                    tokio::time::sleep(BASE_BACKOFF * 2u32.pow(attempt - 1)).await;
                }
                Err(e) => {
                    error!(listing_id = %doc.id, error = %e, "Giving up on search index update");
                    break;
                }
            }
        }
    }
}

async fn deliver(
    client: &reqwest::Client,
    config: &MeiliConfig,
    doc: &ListingDocument,
) -> Result<(), reqwest::Error> {
    let documents = format!("{}/indexes/{}/documents", config.url, config.index);
    let request = if doc.should_index() {
        client.post(documents).json(&[doc])
    } else {
        client.delete(format!("{documents}/{}", doc.id))
    };
    let request = match &config.api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    };
    request.send().await?.error_for_status()?;
    Ok(())
}
