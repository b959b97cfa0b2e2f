//! Concrete delivery channels.
//!
//! Both adapters are thin HTTP clients: Telegram through the bot API,
//! email through the Resend API. A non-success response is an
//! [`AppError::Send`]; the retry policy lives in the send handler, not
//! here.

use async_trait::async_trait;
use serde::Serialize;

use herald_common::error::AppError;
use herald_dispatch::Notifier;

/// Sends notifications to a Telegram chat via the bot API.
pub struct TelegramNotifier {
    token: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(token: String) -> Self {
        Self {
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, to: &str, message: &str) -> Result<(), AppError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);

        let response = self
            .client
            .post(&url)
            .json(&SendMessageRequest {
                chat_id: to,
                text: message,
            })
            .send()
            .await
            .map_err(|e| AppError::Send(format!("telegram request: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Send(format!(
                "telegram API error: {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Sends notification emails through the Resend HTTP API.
pub struct EmailNotifier {
    api_key: String,
    from: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

impl EmailNotifier {
    pub fn new(api_key: String, from: String) -> Self {
        Self {
            api_key,
            from,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, to: &str, message: &str) -> Result<(), AppError> {
        let response = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&SendEmailRequest {
                from: &self.from,
                to: [to],
                subject: "Notification",
                text: message,
            })
            .send()
            .await
            .map_err(|e| AppError::Send(format!("email request: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Send(format!(
                "email API error: {}",
                response.status()
            )));
        }

        Ok(())
    }
}
