use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::{port::MessagingPort, types::ChatAction},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two Bot API calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between calls into the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
        }
    }
}

#[derive(Debug)]
struct SlotClock {
    spacing: Duration,
    next_free: Instant,
}

impl SlotClock {
    fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next_free: Instant::now(),
        }
    }

    /// Claim the next free slot; returns how long the caller has to wait for it.
    fn claim(&mut self) -> Duration {
        let now = Instant::now();
        let slot = self.next_free.max(now);
        self.next_free = slot + self.spacing;
        slot.saturating_duration_since(now)
    }
}

/// Per-message edit bookkeeping.
///
/// `queued` holds the ticket of the newest edit waiting for its slot; an older
/// ticket that wakes up behind it is dropped. `shown` is the text last
/// accepted by Telegram, which rejects a no-op edit.
#[derive(Debug, Default)]
struct EditBook {
    next_ticket: u64,
    queued: HashMap<MessageRef, u64>,
    shown: HashMap<MessageRef, String>,
}

impl EditBook {
    /// `None` when `html` is already on screen.
    fn enqueue(&mut self, msg: MessageRef, html: &str) -> Option<u64> {
        if self.shown.get(&msg).map(String::as_str) == Some(html) && !self.queued.contains_key(&msg) {
            return None;
        }
        self.next_ticket += 1;
        self.queued.insert(msg, self.next_ticket);
        Some(self.next_ticket)
    }

    fn is_current(&self, msg: MessageRef, ticket: u64) -> bool {
        self.queued.get(&msg) == Some(&ticket)
    }

    fn finish(&mut self, msg: MessageRef, ticket: u64, shown: Option<&str>) {
        if self.is_current(msg, ticket) {
            self.queued.remove(&msg);
        }
        if let Some(html) = shown {
            self.shown.insert(msg, html.to_string());
        }
    }

    fn forget(&mut self, msg: MessageRef) {
        self.queued.remove(&msg);
        self.shown.remove(&msg);
    }
}

/// MessagingPort decorator that spaces out status traffic.
///
/// Progress reflection edits the same message repeatedly for every running
/// batch; without spacing a handful of concurrent batches trips the Bot API
/// flood limit. Edits of one message that pile up behind the per-chat spacing
/// collapse to the newest text, and an edit repeating the text on screen is
/// not sent at all.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<SlotClock>,
    chats: Mutex<HashMap<i64, Arc<Mutex<SlotClock>>>>,
    edits: StdMutex<EditBook>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(SlotClock::new(cfg.global_min_interval)),
            chats: Mutex::new(HashMap::new()),
            edits: StdMutex::new(EditBook::default()),
        }
    }

    async fn clock_for(&self, chat_id: i64) -> Arc<Mutex<SlotClock>> {
        let mut map = self.chats.lock().await;
        map.entry(chat_id)
            .or_insert_with(|| Arc::new(Mutex::new(SlotClock::new(self.cfg.per_chat_min_interval))))
            .clone()
    }

    async fn wait_turn(&self, chat_id: ChatId) {
        let global_wait = self.global.lock().await.claim();
        let chat_wait = {
            let clock = self.clock_for(chat_id.0).await;
            let mut guard = clock.lock().await;
            guard.claim()
        };

        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    fn book(&self) -> std::sync::MutexGuard<'_, EditBook> {
        self.edits.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef> {
        self.wait_turn(chat_id).await;
        self.inner.send_html(chat_id, html, reply_to).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        let Some(ticket) = self.book().enqueue(msg, html) else {
            return Ok(());
        };

        self.wait_turn(msg.chat_id).await;
        if !self.book().is_current(msg, ticket) {
            tracing::trace!(chat = msg.chat_id.0, "superseded edit dropped");
            return Ok(());
        }

        let result = self.inner.edit_html(msg, html).await;
        self.book()
            .finish(msg, ticket, result.is_ok().then_some(html));
        result
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.book().forget(msg);
        self.wait_turn(msg.chat_id).await;
        self.inner.delete_message(msg).await
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.wait_turn(chat_id).await;
        self.inner.send_chat_action(chat_id, action).await
    }
}
