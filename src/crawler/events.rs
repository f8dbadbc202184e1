//! Lifecycle notifications emitted by a running crawler

use crate::url::ErrorCode;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Something observable happened during a crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlEvent {
    /// A URL was claimed from the frontier
    CrawlUrl(String),

    /// A claimed URL finished processing and its outcome was recorded
    UrlCrawled {
        url: String,
        error_code: Option<ErrorCode>,
        status_code: Option<u16>,
    },

    /// Links discovered on a page, before they are queued
    Links { url: String, links: Vec<String> },

    /// No URL was eligible on this tick
    FrontierEmpty,

    /// No URL was eligible and nothing is in flight
    FrontierExhausted,

    HandlersError { url: String, message: String },

    TransportError { url: String, message: String },

    Redirect { from: String, to: String },

    /// The frontier backend failed; the tick continues
    FrontierError { message: String },
}

/// Fans events out to every live subscriber
#[derive(Debug, Default)]
pub(crate) struct EventSink {
    subscribers: Mutex<Vec<UnboundedSender<CrawlEvent>>>,
}

impl EventSink {
    pub(crate) fn subscribe(&self) -> UnboundedReceiver<CrawlEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Dropped receivers are pruned on the next emit
    pub(crate) fn emit(&self, event: CrawlEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let sink = EventSink::default();
        let mut a = sink.subscribe();
        let mut b = sink.subscribe();

        sink.emit(CrawlEvent::FrontierEmpty);

        assert_eq!(a.recv().await, Some(CrawlEvent::FrontierEmpty));
        assert_eq!(b.recv().await, Some(CrawlEvent::FrontierEmpty));
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let sink = EventSink::default();
        let rx = sink.subscribe();
        drop(rx);

        sink.emit(CrawlEvent::FrontierExhausted);
        assert!(sink.subscribers.lock().unwrap().is_empty());
    }
}
