//! Minimal Telegram Bot API client: just what the monitor needs to validate its
//! token, long-poll for commands and deliver status messages.

use std::time;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::notifier::{MessageSender, SendError};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Extra time granted on top of a long-poll timeout before the request itself gives up.
const LONG_POLL_GRACE: time::Duration = time::Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum TelegramError {
    /// The request URL embeds the bot token, so it is stripped before the error is kept.
    #[error("request to telegram failed: {0}")]
    Request(reqwest::Error),
    #[error("telegram rejected {method}: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
}

impl From<reqwest::Error> for TelegramError {
    fn from(error: reqwest::Error) -> Self {
        TelegramError::Request(error.without_url())
    }
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Clone)]
pub struct TelegramBot {
    client: Client,
    base_url: String,
}

impl TelegramBot {
    pub fn new(
        api_url: &str,
        token: &str,
        request_timeout: time::Duration,
    ) -> Result<Self, TelegramError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .user_agent("svitlo monitor")
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    /// Checks the token by asking who we are.
    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &json!({}), None).await
    }

    /// Long-polls for updates with ids of at least `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: time::Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &body, Some(timeout + LONG_POLL_GRACE))
            .await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, TelegramError> {
        self.call("sendMessage", &SendMessage { chat_id, text }, None)
            .await
    }

    async fn call<B, T>(
        &self,
        method: &'static str,
        body: &B,
        timeout: Option<time::Duration>,
    ) -> Result<T, TelegramError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        // Telegram reports failures in the JSON envelope, with a matching 4xx/5xx status.
        let response: ApiResponse<T> = request.send().await?.json().await?;
        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TelegramError::Api {
                method,
                description: response
                    .description
                    .unwrap_or_else(|| "no description".to_owned()),
            }),
        }
    }
}

#[async_trait]
impl MessageSender for TelegramBot {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        self.send_message(chat_id, text)
            .await
            .map(|_| ())
            .map_err(|e| SendError {
                chat_id,
                reason: e.to_string(),
            })
    }
}
