//! Delivery side: subscriber store (SQLite), Bot API long-poll loop for
//! subscribe/unsubscribe commands, and the [`BotBroadcaster`] alert sink.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use sqlite::State;
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::{info, warn};

use crate::pipeline::{AlertSink, Attachment};

// ---------------------------------------------------------------------------
// Subscriber store
// ---------------------------------------------------------------------------

pub type SharedDb = Arc<Mutex<sqlite::Connection>>;

/// Open (or create) the subscriber database and ensure the schema exists.
pub fn open_db(path: &str) -> Result<SharedDb> {
    let conn = sqlite::open(path)?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscribers (
            chat_id  INTEGER PRIMARY KEY,
            added_at TEXT    NOT NULL DEFAULT (datetime('now'))
         );",
    )?;
    info!("Subscriber DB opened at {path}");
    Ok(Arc::new(Mutex::new(conn)))
}

fn lock(db: &SharedDb) -> Result<MutexGuard<'_, sqlite::Connection>> {
    db.lock().map_err(|_| anyhow!("subscriber DB lock poisoned"))
}

pub fn add_subscriber(db: &SharedDb, chat_id: i64) -> Result<()> {
    let db = lock(db)?;
    let mut stmt = db.prepare("INSERT OR IGNORE INTO subscribers (chat_id) VALUES (?)")?;
    stmt.bind((1, chat_id))?;
    stmt.next()?;
    Ok(())
}

pub fn remove_subscriber(db: &SharedDb, chat_id: i64) -> Result<()> {
    let db = lock(db)?;
    let mut stmt = db.prepare("DELETE FROM subscribers WHERE chat_id = ?")?;
    stmt.bind((1, chat_id))?;
    stmt.next()?;
    Ok(())
}

pub fn get_subscribers(db: &SharedDb) -> Result<Vec<i64>> {
    let db = lock(db)?;
    let mut stmt = db.prepare("SELECT chat_id FROM subscribers")?;
    let mut ids = Vec::new();
    while let Ok(State::Row) = stmt.next() {
        ids.push(stmt.read::<i64, _>(0)?);
    }
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Bot API types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    result: Vec<TgUpdate>,
}

#[derive(Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Deserialize)]
struct TgMessage {
    chat: TgChat,
    text: Option<String>,
}

#[derive(Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Serialize)]
struct SendMessagePayload<'a> {
    chat_id: i64,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct CopyMessagePayload<'a> {
    chat_id: i64,
    from_chat_id: &'a str,
    message_id: i32,
    caption: &'a str,
}

// ---------------------------------------------------------------------------
// Sending helpers
// ---------------------------------------------------------------------------

async fn post_method<T: Serialize>(http: &HttpClient, bot_token: &str, method: &str, body: &T) -> Result<()> {
    let url = format!("https://api.telegram.org/bot{bot_token}/{method}");
    let resp = http.post(&url).json(body).send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        return Err(anyhow!("{method} failed: {status} body={raw}"));
    }
    Ok(())
}

/// Send a single text message to one chat.
pub async fn send_message(http: &HttpClient, bot_token: &str, chat_id: i64, text: &str) -> Result<()> {
    let body = SendMessagePayload {
        chat_id,
        text,
        disable_web_page_preview: true,
    };
    post_method(http, bot_token, "sendMessage", &body).await
}

/// Re-post the source media to one chat with `text` as its caption.
pub async fn copy_with_caption(
    http: &HttpClient,
    bot_token: &str,
    chat_id: i64,
    attachment: &Attachment,
    text: &str,
) -> Result<()> {
    let body = CopyMessagePayload {
        chat_id,
        from_chat_id: &attachment.source_chat,
        message_id: attachment.message_id,
        caption: text,
    };
    post_method(http, bot_token, "copyMessage", &body).await
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

/// Fans every alert out to all subscribers.
#[derive(Clone)]
pub struct BotBroadcaster {
    http: HttpClient,
    token: String,
    db: SharedDb,
}

impl BotBroadcaster {
    pub fn new(http: HttpClient, token: String, db: SharedDb) -> Self {
        Self { http, token, db }
    }

    /// Start the command long-poll loop in the background.
    pub fn spawn_polling(&self) {
        let http = self.http.clone();
        let token = self.token.clone();
        let db = self.db.clone();
        tokio::spawn(async move {
            run_bot_polling(http, token, db).await;
        });
    }

    async fn deliver(&self, chat_id: i64, text: &str, attachment: Option<&Attachment>) -> Result<()> {
        if let Some(attachment) = attachment {
            match copy_with_caption(&self.http, &self.token, chat_id, attachment, text).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("copyMessage to chat_id={chat_id} failed, sending text only: {e}"),
            }
        }
        send_message(&self.http, &self.token, chat_id, text).await
    }

    /// Broadcast to every subscriber.  `Ok(false)` when nobody received it.
    pub async fn broadcast(&self, text: &str, attachment: Option<&Attachment>) -> Result<bool> {
        let subscribers = get_subscribers(&self.db)?;
        if subscribers.is_empty() {
            info!("Broadcast skipped – no subscribers.");
            return Ok(false);
        }
        info!("Broadcasting to {} subscriber(s).", subscribers.len());
        let mut delivered = 0usize;
        for chat_id in subscribers {
            match self.deliver(chat_id, text, attachment).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to deliver to chat_id={chat_id}: {e}"),
            }
        }
        Ok(delivered > 0)
    }
}

#[async_trait]
impl AlertSink for BotBroadcaster {
    async fn send(&self, text: &str, attachment: Option<&Attachment>) -> bool {
        match self.broadcast(text, attachment).await {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!("Failed to broadcast alert: {e}");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Long-poll loop
// ---------------------------------------------------------------------------

/// Runs forever: polls `getUpdates` and handles /start_receive / /stop_receive.
pub async fn run_bot_polling(http: HttpClient, bot_token: String, db: SharedDb) {
    let mut offset: i64 = 0;
    info!("Bot long-poll loop started.");

    loop {
        let url = format!(
            "https://api.telegram.org/bot{bot_token}/getUpdates\
             ?timeout=30&offset={offset}&allowed_updates=[\"message\"]"
        );

        let resp = match tokio::time::timeout(Duration::from_secs(40), http.get(&url).send()).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                warn!("getUpdates HTTP error: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
            Err(_elapsed) => {
                warn!("getUpdates request timed out locally – retrying");
                continue;
            }
        };

        let updates: GetUpdatesResponse = match resp.json().await {
            Ok(u) => u,
            Err(e) => {
                warn!("Failed to deserialize getUpdates response: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if !updates.ok {
            warn!("getUpdates returned ok=false");
            tokio::time::sleep(Duration::from_secs(5)).await;
            continue;
        }

        for update in updates.result {
            offset = update.update_id + 1;

            let Some(msg) = update.message else {
                continue;
            };
            let chat_id = msg.chat.id;
            let raw_text = msg.text.unwrap_or_default();

            if let Some(reply) = handle_command(&db, chat_id, &raw_text) {
                let _ = send_message(&http, &bot_token, chat_id, reply).await;
            }
        }
    }
}

/// Apply a bot command; returns the reply to send, if any.
fn handle_command(db: &SharedDb, chat_id: i64, raw_text: &str) -> Option<&'static str> {
    // Strip optional @BotName suffix (e.g. /start_receive@MyBot)
    let cmd = raw_text.trim().split('@').next().unwrap_or("").trim();

    match cmd {
        "/start" => Some(
            "👋 Привіт! Бот пересилає тривоги про БПЛА, ракети та КАБ по населених пунктах.\n\
             /start_receive – підписатися\n\
             /stop_receive  – відписатися",
        ),
        "/start_receive" => {
            info!("chat_id={chat_id} → subscribe");
            match add_subscriber(db, chat_id) {
                Ok(()) => Some("✅ Підписку оформлено. Ви отримуватимете тривоги."),
                Err(e) => {
                    warn!("add_subscriber({chat_id}): {e}");
                    None
                }
            }
        }
        "/stop_receive" => {
            info!("chat_id={chat_id} → unsubscribe");
            match remove_subscriber(db, chat_id) {
                Ok(()) => Some("🛑 Підписку скасовано."),
                Err(e) => {
                    warn!("remove_subscriber({chat_id}): {e}");
                    None
                }
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> SharedDb {
        open_db(":memory:").unwrap()
    }

    #[test]
    fn subscribe_and_unsubscribe() {
        let db = memory_db();
        assert!(handle_command(&db, 7, "/start_receive@AlertBot").is_some());
        assert!(handle_command(&db, 7, "/start_receive").is_some());
        assert_eq!(get_subscribers(&db).unwrap(), vec![7]);

        assert!(handle_command(&db, 7, "/stop_receive").is_some());
        assert!(get_subscribers(&db).unwrap().is_empty());
    }

    #[test]
    fn other_text_is_ignored() {
        let db = memory_db();
        assert!(handle_command(&db, 7, "привіт").is_none());
        assert!(handle_command(&db, 7, "/start").is_some());
        assert!(get_subscribers(&db).unwrap().is_empty());
    }
}
