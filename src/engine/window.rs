//! Paged loading of older messages above the visible transcript.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::history::{HistoryPage, HistorySource};
use crate::transcript::{Transcript, TranscriptMessage};

/// Scroll position of the message list, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug)]
pub struct MessageWindow {
    page_size: usize,
    near_top_threshold: f64,
    visible_step: usize,
    warning_threshold: usize,

    /// Server messages already in the transcript.
    loaded: usize,
    total: Option<usize>,
    has_more: bool,
    in_flight: bool,
    /// Set after a page lands; cleared once the user scrolls away from the top.
    suppress_near_top: bool,
    all_loaded: bool,
    performance_warning: bool,
    visible_count: usize,
    anchor: Option<ScrollMetrics>,
}

impl MessageWindow {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            page_size: config.history_page_size.max(1),
            near_top_threshold: config.near_top_threshold_px,
            visible_step: config.visible_window.max(1),
            warning_threshold: config.load_all_warning_threshold,
            loaded: 0,
            total: None,
            has_more: false,
            in_flight: false,
            suppress_near_top: false,
            all_loaded: false,
            performance_warning: false,
            visible_count: config.visible_window.max(1),
            anchor: None,
        }
    }

    /// Forget paging state when another session is shown.
    pub fn reset(&mut self) {
        self.loaded = 0;
        self.total = None;
        self.has_more = false;
        self.in_flight = false;
        self.suppress_near_top = false;
        self.all_loaded = false;
        self.performance_warning = false;
        self.visible_count = self.visible_step;
        self.anchor = None;
    }

    pub fn has_more(&self) -> bool {
        self.has_more && !self.all_loaded
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn all_loaded(&self) -> bool {
        self.all_loaded
    }

    /// Set by [`finish_load_all`](Self::finish_load_all) for very long sessions.
    pub fn performance_warning(&self) -> bool {
        self.performance_warning
    }

    /// React to a scroll. Returns the page to fetch, if one should start now.
    pub fn on_scroll(&mut self, metrics: ScrollMetrics) -> Option<PageRequest> {
        if metrics.scroll_top > self.near_top_threshold {
            self.suppress_near_top = false;
            return None;
        }
        if self.suppress_near_top {
            return None;
        }
        self.begin_page(metrics)
    }

    /// Start fetching the next older page unless one is already in flight.
    pub fn begin_page(&mut self, metrics: ScrollMetrics) -> Option<PageRequest> {
        if self.in_flight || !self.has_more() {
            return None;
        }
        self.in_flight = true;
        self.anchor = Some(metrics);
        Some(PageRequest {
            offset: self.loaded,
            limit: self.page_size,
        })
    }

    /// Install the newest page of a freshly opened session.
    pub fn load_initial(&mut self, page: HistoryPage, transcript: &mut Transcript) {
        self.reset();
        self.loaded = page.messages.len();
        self.total = Some(page.total);
        self.has_more = page.has_more;
        *transcript = Transcript::from_messages(page.messages);
    }

    /// Prepend a fetched page. Returns how many messages were added.
    pub fn finish_page(&mut self, page: HistoryPage, transcript: &mut Transcript) -> usize {
        self.in_flight = false;
        self.suppress_near_top = true;
        self.has_more = page.has_more;
        self.total = Some(page.total);

        let added = page.messages.len();
        self.loaded += added;
        self.visible_count += added;
        transcript.prepend(page.messages);
        added
    }

    /// Scroll offset that keeps the same content under the reader after a
    /// prepend, given the list height measured after rendering.
    pub fn anchored_scroll_top(&mut self, new_scroll_height: f64) -> Option<f64> {
        let anchor = self.anchor.take()?;
        Some(anchor.scroll_top + (new_scroll_height - anchor.scroll_height))
    }

    /// A page fetch failed; surface it and allow a retry.
    pub fn fail_page(&mut self, error: &EngineError, transcript: &mut Transcript, session_id: Option<&str>) {
        log::error!("Loading older messages failed: {}", error);
        self.in_flight = false;
        self.anchor = None;
        transcript.push(
            TranscriptMessage::error(format!("Failed to load older messages: {}", error))
                .with_session(session_id.map(str::to_string)),
        );
    }

    /// Claim the fetch slot for a full load.
    pub fn begin_load_all(&mut self) -> bool {
        if self.in_flight || self.all_loaded {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Replace the transcript with the full history and stop paging.
    pub fn finish_load_all(&mut self, page: HistoryPage, transcript: &mut Transcript) {
        self.in_flight = false;
        self.all_loaded = true;
        self.has_more = false;
        self.anchor = None;
        self.loaded = page.messages.len();
        self.total = Some(page.total.max(self.loaded));
        self.visible_count = self.loaded.max(self.visible_step);
        self.performance_warning = self.loaded > self.warning_threshold;
        if self.performance_warning {
            log::warn!("Rendering all {} messages; scrolling may be slow", self.loaded);
        }
        *transcript = Transcript::from_messages(page.messages);
    }

    /// The tail of the transcript that should be rendered.
    pub fn visible_messages<'a>(&self, transcript: &'a Transcript) -> &'a [Arc<TranscriptMessage>] {
        let messages = transcript.messages();
        if self.all_loaded {
            return messages;
        }
        let start = messages.len().saturating_sub(self.visible_count);
        &messages[start..]
    }

    /// Render another batch of already-loaded messages.
    pub fn show_more(&mut self) {
        self.visible_count += self.visible_step;
    }

    // ========================================================================
    // Fetch drivers
    // ========================================================================

    pub async fn open_session(
        &mut self,
        source: &dyn HistorySource,
        project: &str,
        session_id: &str,
        transcript: &mut Transcript,
    ) -> Result<(), EngineError> {
        if self.in_flight {
            return Ok(());
        }
        self.in_flight = true;
        let result = source.fetch_page(project, session_id, 0, self.page_size).await;
        self.in_flight = false;
        match result {
            Ok(page) => {
                self.load_initial(page, transcript);
                Ok(())
            }
            Err(e) => {
                self.fail_page(&e, transcript, Some(session_id));
                Err(e)
            }
        }
    }

    /// Fetch the page claimed by [`on_scroll`](Self::on_scroll) and prepend it.
    pub async fn fetch_older(
        &mut self,
        request: PageRequest,
        source: &dyn HistorySource,
        project: &str,
        session_id: &str,
        transcript: &mut Transcript,
    ) -> Result<usize, EngineError> {
        match source
            .fetch_page(project, session_id, request.offset, request.limit)
            .await
        {
            Ok(page) => Ok(self.finish_page(page, transcript)),
            Err(e) => {
                self.fail_page(&e, transcript, Some(session_id));
                Err(e)
            }
        }
    }

    pub async fn load_all(
        &mut self,
        source: &dyn HistorySource,
        project: &str,
        session_id: &str,
        transcript: &mut Transcript,
    ) -> Result<(), EngineError> {
        if !self.begin_load_all() {
            return Ok(());
        }
        match source.fetch_all(project, session_id).await {
            Ok(page) => {
                self.finish_load_all(page, transcript);
                Ok(())
            }
            Err(e) => {
                self.fail_page(&e, transcript, Some(session_id));
                Err(e)
            }
        }
    }
}
