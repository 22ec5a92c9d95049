//! Debounced assembly of streamed provider text into the transcript.
//!
//! Deltas are buffered and flushed on a short timer instead of producing one
//! transcript mutation per token. Each buffer owns its timer: a tokio task that
//! sleeps for the debounce period and then posts a [`FlushTick`] to the event
//! loop. Dropping the timer aborts the task, and every tick carries the
//! generation it was scheduled with so a tick that raced a cancellation is
//! ignored.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::backends::utils::{abort_task_slot, strip_ansi};
use crate::transcript::{MessageKind, Transcript, TranscriptMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    /// Structured text deltas, concatenated as-is.
    Text,
    /// Line-oriented terminal output, joined with newlines.
    RawOutput,
}

impl StreamChannel {
    fn separator(self) -> &'static str {
        match self {
            StreamChannel::Text => "",
            StreamChannel::RawOutput => "\n",
        }
    }
}

/// Posted by a flush timer when its debounce period elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTick {
    pub channel: StreamChannel,
    pub generation: u64,
}

#[derive(Debug)]
struct FlushTimer {
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        abort_task_slot(&mut self.task);
    }
}

#[derive(Debug)]
struct StreamBuffer {
    channel: StreamChannel,
    pending: String,
    timer: Option<FlushTimer>,
}

impl StreamBuffer {
    fn new(channel: StreamChannel) -> Self {
        Self {
            channel,
            pending: String::new(),
            timer: None,
        }
    }

    fn push(&mut self, chunk: &str) {
        if !self.pending.is_empty() {
            self.pending.push_str(self.channel.separator());
        }
        self.pending.push_str(chunk);
    }

    /// Take the buffered text and drop the timer, keeping the invariant that a
    /// timer exists only while text is waiting.
    fn drain(&mut self) -> String {
        self.timer = None;
        std::mem::take(&mut self.pending)
    }
}

pub struct StreamAssembler {
    debounce: Duration,
    ticks: UnboundedSender<FlushTick>,
    text: StreamBuffer,
    raw: StreamBuffer,
    generation: u64,
}

impl StreamAssembler {
    pub fn new(debounce: Duration, ticks: UnboundedSender<FlushTick>) -> Self {
        Self {
            debounce,
            ticks,
            text: StreamBuffer::new(StreamChannel::Text),
            raw: StreamBuffer::new(StreamChannel::RawOutput),
            generation: 0,
        }
    }

    fn buffer_mut(&mut self, channel: StreamChannel) -> &mut StreamBuffer {
        match channel {
            StreamChannel::Text => &mut self.text,
            StreamChannel::RawOutput => &mut self.raw,
        }
    }

    /// Buffer a text delta, scheduling a flush if none is pending.
    pub fn on_delta(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.text.push(text);
        self.schedule(StreamChannel::Text);
    }

    /// Buffer one chunk of raw terminal output.
    pub fn on_raw_output(&mut self, chunk: &str) {
        let cleaned = strip_ansi(chunk);
        if cleaned.trim().is_empty() {
            return;
        }
        self.raw.push(&cleaned);
        self.schedule(StreamChannel::RawOutput);
    }

    fn schedule(&mut self, channel: StreamChannel) {
        if self.buffer_mut(channel).timer.is_some() {
            return;
        }
        self.generation += 1;
        let tick = FlushTick {
            channel,
            generation: self.generation,
        };
        let ticks = self.ticks.clone();
        let debounce = self.debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = ticks.send(tick);
        });
        self.buffer_mut(channel).timer = Some(FlushTimer {
            task: Some(task),
            generation: tick.generation,
        });
    }

    /// Handle a timer tick. Returns `true` if the transcript changed.
    pub fn on_tick(
        &mut self,
        tick: FlushTick,
        transcript: &mut Transcript,
        session_id: Option<&str>,
    ) -> bool {
        let current = self
            .buffer_mut(tick.channel)
            .timer
            .as_ref()
            .map(|t| t.generation);
        if current != Some(tick.generation) {
            log::debug!("Ignoring stale flush tick {:?}", tick);
            return false;
        }
        self.flush(tick.channel, transcript, session_id)
    }

    /// Drain one channel into the streaming message, creating it if needed.
    pub fn flush(
        &mut self,
        channel: StreamChannel,
        transcript: &mut Transcript,
        session_id: Option<&str>,
    ) -> bool {
        let chunk = self.buffer_mut(channel).drain();
        if chunk.is_empty() {
            return false;
        }

        let streaming_id = transcript
            .streaming_message()
            .filter(|m| m.kind == MessageKind::Assistant)
            .map(|m| m.id.clone());

        match streaming_id {
            Some(id) => {
                transcript.update(&id, |message| {
                    if !message.content.is_empty() {
                        message.content.push_str(channel.separator());
                    }
                    message.content.push_str(&chunk);
                });
            }
            None => {
                let mut message = TranscriptMessage::assistant(chunk)
                    .with_session(session_id.map(str::to_string));
                message.is_streaming = true;
                transcript.push(message);
            }
        }
        true
    }

    /// Final flush of both channels, then close the streaming message.
    pub fn on_stream_stop(&mut self, transcript: &mut Transcript, session_id: Option<&str>) -> bool {
        let mut changed = self.flush(StreamChannel::Text, transcript, session_id);
        changed |= self.flush(StreamChannel::RawOutput, transcript, session_id);

        if let Some(id) = transcript.streaming_message().map(|m| m.id.clone()) {
            transcript.update(&id, |message| message.is_streaming = false);
            changed = true;
        }
        changed
    }

    /// Drop buffered text and abort timers without touching the transcript.
    pub fn cancel(&mut self) {
        let discarded = self.text.drain().len() + self.raw.drain().len();
        if discarded > 0 {
            log::debug!("Discarded {} buffered stream bytes", discarded);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.text.pending.is_empty() || !self.raw.pending.is_empty()
    }

    pub fn is_scheduled(&self, channel: StreamChannel) -> bool {
        match channel {
            StreamChannel::Text => self.text.timer.is_some(),
            StreamChannel::RawOutput => self.raw.timer.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn assembler() -> (StreamAssembler, mpsc::UnboundedReceiver<FlushTick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StreamAssembler::new(Duration::from_millis(100), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_deltas_are_coalesced_into_one_flush() {
        let (mut assembler, mut ticks) = assembler();
        let mut transcript = Transcript::new();

        assembler.on_delta("Hel");
        assembler.on_delta("lo");
        assert!(assembler.is_scheduled(StreamChannel::Text));
        assert!(transcript.is_empty());

        let tick = ticks.recv().await.unwrap();
        assert!(assembler.on_tick(tick, &mut transcript, Some("s1")));

        assert_eq!(transcript.len(), 1);
        let message = &transcript.messages()[0];
        assert_eq!(message.content, "Hello");
        assert!(message.is_streaming);
        assert_eq!(message.session_id.as_deref(), Some("s1"));
        assert!(!assembler.is_scheduled(StreamChannel::Text));
        assert!(ticks.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_stop_flushes_and_closes_message() {
        let (mut assembler, mut ticks) = assembler();
        let mut transcript = Transcript::new();
        let deltas = ["The ", "quick ", "brown ", "fox"];

        assembler.on_delta(deltas[0]);
        let tick = ticks.recv().await.unwrap();
        assembler.on_tick(tick, &mut transcript, None);
        for delta in &deltas[1..] {
            assembler.on_delta(delta);
        }
        assert!(assembler.on_stream_stop(&mut transcript, None));

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.messages()[0].content, deltas.concat());
        assert!(transcript.messages().iter().all(|m| !m.is_streaming));
        assert!(!assembler.has_pending());
        assert!(!assembler.is_scheduled(StreamChannel::Text));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_tick_after_cancel_is_ignored() {
        let (mut assembler, mut ticks) = assembler();
        let mut transcript = Transcript::new();

        assembler.on_delta("old session text");
        let stale = FlushTick {
            channel: StreamChannel::Text,
            generation: 1,
        };
        assembler.cancel();

        assert!(!assembler.on_tick(stale, &mut transcript, None));
        assert!(transcript.is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(ticks.try_recv().is_err(), "aborted timer must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn test_raw_output_is_stripped_and_newline_joined() {
        let (mut assembler, mut ticks) = assembler();
        let mut transcript = Transcript::new();

        assembler.on_raw_output("\x1b[32mCompiling\x1b[0m foo");
        assembler.on_raw_output("   ");
        assembler.on_raw_output("Finished");
        let tick = ticks.recv().await.unwrap();
        assembler.on_tick(tick, &mut transcript, None);

        assembler.on_raw_output("Running");
        assembler.on_stream_stop(&mut transcript, None);

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.messages()[0].content, "Compiling foo\nFinished\nRunning");
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_appends_to_existing_streaming_message_only() {
        let (mut assembler, _ticks) = assembler();
        let mut transcript = Transcript::new();
        transcript.push(TranscriptMessage::user("question"));

        assembler.on_delta("answer");
        assembler.flush(StreamChannel::Text, &mut transcript, None);
        assembler.on_delta(" continues");
        assembler.flush(StreamChannel::Text, &mut transcript, None);

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[1].content, "answer continues");
        assert_eq!(
            transcript.messages().iter().filter(|m| m.is_streaming).count(),
            1
        );
    }
}
