//! Error boundary: every surfaced error is logged and forwarded to a report
//! sink, and a panic flips the page into a fallback banner instead of leaving
//! it blank.

use crate::runtime::Spawner;
use async_trait::async_trait;
use common::ClientErrorReport;
use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;

/// Recent reports kept for the fallback banner
const KEEP_REPORTS: usize = 20;
/// Reports listed on the banner, newest first
const BANNER_REPORTS: usize = 3;

#[async_trait(?Send)]
pub trait ReportSink {
    async fn deliver(&self, report: &ClientErrorReport) -> Result<(), String>;
}

pub struct ErrorBoundary {
    sink: Rc<dyn ReportSink>,
    spawner: Rc<dyn Spawner>,
    clock: fn() -> u64,
    user_agent: Option<String>,
    recent: RefCell<Vec<ClientErrorReport>>,
}

impl ErrorBoundary {
    pub fn new(
        sink: Rc<dyn ReportSink>,
        spawner: Rc<dyn Spawner>,
        clock: fn() -> u64,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            sink,
            spawner,
            clock,
            user_agent,
            recent: RefCell::new(Vec::new()),
        }
    }

    fn record(&self, source: &str, error: &dyn Display, detail: Option<String>) -> ClientErrorReport {
        let report = ClientErrorReport {
            source: source.to_string(),
            message: error.to_string(),
            detail,
            timestamp_ms: (self.clock)(),
            user_agent: self.user_agent.clone(),
        };
        log::error!("[{}] {}", report.source, report.message);

        let mut recent = self.recent.borrow_mut();
        recent.push(report.clone());
        if recent.len() > KEEP_REPORTS {
            let excess = recent.len() - KEEP_REPORTS;
            recent.drain(..excess);
        }
        report
    }

    /// Log `error` and ship it to the sink in the background.
    pub fn report(&self, source: &str, error: &dyn Display, detail: Option<String>) -> ClientErrorReport {
        let report = self.record(source, error, detail);
        let sink = Rc::clone(&self.sink);
        let outgoing = report.clone();
        self.spawner.spawn(Box::pin(async move {
            if let Err(e) = sink.deliver(&outgoing).await {
                log::warn!("Could not deliver error report: {}", e);
            }
        }));
        report
    }

    /// Record a panic without scheduling any work.
    ///
    /// Nothing spawned from a panic hook ever runs, so the caller has to
    /// deliver the returned report synchronously.
    pub fn panicked(&self, message: &str) -> ClientErrorReport {
        self.record("panic", &message, None)
    }

    /// Newest reports, one per line, for the fallback banner
    pub fn fallback_text(&self) -> String {
        self.recent
            .borrow()
            .iter()
            .rev()
            .take(BANNER_REPORTS)
            .map(|r| format!("{}: {}", r.source, r.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
