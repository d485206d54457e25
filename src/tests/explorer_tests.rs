//! Pagination against an in-memory explorer double.

use crate::explorer::{paginate, ExplorerClient, ExplorerError, HistoryItem, HistoryPage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

struct StubExplorer {
    pages: Mutex<VecDeque<HistoryPage>>,
    calls: AtomicUsize,
}

impl StubExplorer {
    fn new(pages: Vec<HistoryPage>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExplorerClient for StubExplorer {
    async fn confirmed_history(
        &self,
        _address: &str,
        _page_token: Option<&str>,
    ) -> Result<HistoryPage, ExplorerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.lock().await.pop_front().unwrap_or_default())
    }
}

fn page(count: usize, start: usize, token: Option<&str>) -> HistoryPage {
    HistoryPage {
        result: (0..count)
            .map(|i| HistoryItem {
                tx_hash: format!("{:064x}", start + i),
                height: 800_000 + (start + i) as i64,
                time: Some(1_700_000_000),
            })
            .collect(),
        next_page_token: token.map(str::to_string),
    }
}

#[tokio::test]
async fn stops_at_the_cap_without_requesting_further_pages() {
    // Five full pages; the fifth carries no continuation token.
    let stub = StubExplorer::new(vec![
        page(100, 0, Some("t1")),
        page(100, 100, Some("t2")),
        page(100, 200, Some("t3")),
        page(100, 300, Some("t4")),
        page(100, 400, None),
    ]);

    let items = paginate(&stub, "addr", 500).await.unwrap();
    assert_eq!(items.len(), 500);
    assert_eq!(stub.calls(), 5, "a sixth page is never requested");
}

#[tokio::test]
async fn cap_trims_the_final_page() {
    let stub = StubExplorer::new(vec![
        page(100, 0, Some("t1")),
        page(100, 100, Some("t2")),
        page(100, 200, Some("t3")),
    ]);

    let items = paginate(&stub, "addr", 250).await.unwrap();
    assert_eq!(items.len(), 250);
    assert_eq!(stub.calls(), 3);
    assert_eq!(items.last().unwrap().tx_hash, format!("{:064x}", 249));
}

#[tokio::test]
async fn short_page_ends_the_history() {
    let stub = StubExplorer::new(vec![page(37, 0, Some("ignored"))]);
    let items = paginate(&stub, "addr", 500).await.unwrap();
    assert_eq!(items.len(), 37);
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn missing_token_ends_the_history() {
    let stub = StubExplorer::new(vec![page(100, 0, None)]);
    let items = paginate(&stub, "addr", 500).await.unwrap();
    assert_eq!(items.len(), 100);
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn empty_history_is_not_an_error() {
    let stub = StubExplorer::new(vec![HistoryPage::default()]);
    let items = paginate(&stub, "addr", 500).await.unwrap();
    assert!(items.is_empty());
    assert_eq!(stub.calls(), 1);
}
