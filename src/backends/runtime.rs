//! Event loop tying the transport stream to the router.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::{CommandSink, RouteContext};
use crate::config::EngineConfig;
use crate::engine::{FlushTick, RouterEffect, SessionEventRouter};
use crate::protocol::SessionEvent;
use crate::storage::ClientState;

/// Owns the router and the receiving end of its flush timers.
///
/// Inbound events and debounce ticks are processed one at a time on the
/// calling task, so router state is never touched concurrently.
pub struct SessionRuntime {
    router: SessionEventRouter,
    ticks: UnboundedReceiver<FlushTick>,
    ctx: RouteContext,
}

impl SessionRuntime {
    pub fn new(
        config: &EngineConfig,
        sink: Arc<dyn CommandSink>,
        state: Option<ClientState>,
        ctx: RouteContext,
    ) -> Self {
        let (tick_tx, ticks) = mpsc::unbounded_channel();
        Self {
            router: SessionEventRouter::new(config, sink, tick_tx, state),
            ticks,
            ctx,
        }
    }

    pub fn router(&self) -> &SessionEventRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut SessionEventRouter {
        &mut self.router
    }

    pub fn context(&self) -> &RouteContext {
        &self.ctx
    }

    pub fn set_context(&mut self, ctx: RouteContext) {
        self.ctx = ctx;
    }

    /// Process events until the stream ends, reporting effects after each step.
    ///
    /// Buffered stream text that has not been flushed when the stream closes
    /// is discarded.
    pub async fn run<S, F>(&mut self, events: S, mut on_effects: F)
    where
        S: Stream<Item = Arc<SessionEvent>> + Unpin,
        F: FnMut(&SessionEventRouter, Vec<RouterEffect>),
    {
        let Self { router, ticks, ctx } = self;
        let mut events = events;
        log::info!("Session runtime started for {}", ctx.provider);

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(event) => {
                        let effects = router.route(event, ctx);
                        if !effects.is_empty() {
                            on_effects(router, effects);
                        }
                    }
                    None => break,
                },
                Some(tick) = ticks.recv() => {
                    let effects = router.on_tick(tick);
                    if !effects.is_empty() {
                        on_effects(router, effects);
                    }
                }
            }
        }

        router.teardown(ctx);
        log::info!("Session runtime stopped");
    }
}
