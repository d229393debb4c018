//! Client for the Telegram Bot API.
//!
//! Photos are first sent by URL so the API fetches them itself. When that
//! fails the image is downloaded, normalized by [`PhotoTranscoder`] and
//! uploaded as multipart form data.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::app::{DealwatchError, Result};
use crate::config::TelegramConfig;
use crate::domain::{OutboundMessage, PhotoMessage, TextMessage};
use crate::notify::{MessageSender, PhotoTranscoder};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramClient {
    client: Client,
    /// `{api_url}bot{token}/`
    endpoint: String,
    transcoder: PhotoTranscoder,
    cancel: CancellationToken,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig, cancel: CancellationToken) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let mut api_url = config.api_url.clone();
        if !api_url.ends_with('/') {
            api_url.push('/');
        }

        Ok(Self {
            client,
            endpoint: format!("{}bot{}/", api_url, config.token),
            transcoder: PhotoTranscoder::default(),
            cancel,
        })
    }

    async fn cancellable<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = reqwest::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DealwatchError::Cancelled),
            result = fut => result.map_err(DealwatchError::from),
        }
    }

    async fn call(&self, method: &str, request: reqwest::RequestBuilder) -> Result<()> {
        let response = self.cancellable(request.send()).await?;
        let status = response.status();
        let body = self.cancellable(response.text()).await?;

        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();
        match parsed {
            Some(api) if api.ok && status.is_success() => {
                debug!(method, "api call succeeded");
                Ok(())
            }
            Some(api) => Err(DealwatchError::Delivery(format!(
                "{} returned {}: {}",
                method,
                status,
                api.description.unwrap_or_else(|| "ok is false".to_string())
            ))),
            None => Err(DealwatchError::Delivery(format!(
                "{} returned {} without a valid response body",
                method, status
            ))),
        }
    }

    async fn send_text(&self, chat_id: i64, message: &TextMessage) -> Result<()> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": message.text,
            "disable_web_page_preview": message.disable_web_page_preview,
        });
        if let Some(mode) = message.parse_mode.wire_name() {
            payload["parse_mode"] = Value::from(mode);
        }

        let request = self
            .client
            .post(format!("{}sendMessage", self.endpoint))
            .json(&payload);
        self.call("sendMessage", request).await
    }

    async fn send_photo_url(&self, chat_id: i64, message: &PhotoMessage) -> Result<()> {
        let mut payload = json!({
            "chat_id": chat_id,
            "photo": message.photo,
        });
        if let Some(caption) = &message.caption {
            payload["caption"] = Value::from(caption.as_str());
        }
        if let Some(mode) = message.parse_mode.wire_name() {
            payload["parse_mode"] = Value::from(mode);
        }

        let request = self
            .client
            .post(format!("{}sendPhoto", self.endpoint))
            .json(&payload);
        self.call("sendPhoto", request).await
    }

    async fn upload_photo(&self, chat_id: i64, message: &PhotoMessage) -> Result<()> {
        let response = self
            .cancellable(self.client.get(&message.photo).send())
            .await?
            .error_for_status()?;
        let bytes = self.cancellable(response.bytes()).await?;
        let transcoder = self.transcoder.clone();
        let photo = tokio::task::spawn_blocking(move || transcoder.prepare(bytes.to_vec()))
            .await
            .map_err(|e| DealwatchError::Other(format!("photo transcoding task failed: {}", e)))??;

        let mut form = Form::new().text("chat_id", chat_id.to_string());
        if let Some(caption) = &message.caption {
            form = form.text("caption", caption.clone());
        }
        if let Some(mode) = message.parse_mode.wire_name() {
            form = form.text("parse_mode", mode);
        }
        let part = Part::bytes(photo.data)
            .file_name(photo.file_name)
            .mime_str(photo.mime)?;
        form = form.part("photo", part);

        let request = self
            .client
            .post(format!("{}sendPhoto", self.endpoint))
            .multipart(form);
        self.call("sendPhoto", request).await
    }
}

#[async_trait]
impl MessageSender for TelegramClient {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let chat_id = message
            .chat_id()
            .ok_or_else(|| DealwatchError::Validation("message has no chat id".into()))?;

        match message {
            OutboundMessage::Text(text) => self.send_text(chat_id, text).await,
            OutboundMessage::Photo(photo) => match self.send_photo_url(chat_id, photo).await {
                Ok(()) => Ok(()),
                Err(DealwatchError::Cancelled) => Err(DealwatchError::Cancelled),
                Err(e) => {
                    warn!(photo = %photo.photo, error = %e, "photo by URL failed, uploading it");
                    self.upload_photo(chat_id, photo).await
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use wiremock::matchers::{body_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::domain::ParseMode;

    fn client(server: &MockServer) -> TelegramClient {
        let config = TelegramConfig {
            token: "T0K".into(),
            chat: -100,
            api_url: server.uri(),
            ..TelegramConfig::default()
        };
        TelegramClient::new(&config, CancellationToken::new()).unwrap()
    }

    fn ok() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}}))
    }

    fn png() -> Vec<u8> {
        png_sized(8, 8)
    }

    fn png_sized(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::new(width, height);
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn test_send_text_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botT0K/sendMessage"))
            .and(body_json(json!({
                "chat_id": -100,
                "text": "<b>hi</b>",
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            })))
            .respond_with(ok())
            .expect(1)
            .mount(&server)
            .await;

        let message = OutboundMessage::text("<b>hi</b>", ParseMode::Html).with_chat_id(-100);
        client(&server).send(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_plain_text_omits_parse_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botT0K/sendMessage"))
            .and(body_json(json!({
                "chat_id": 5,
                "text": "plain",
                "disable_web_page_preview": true,
            })))
            .respond_with(ok())
            .expect(1)
            .mount(&server)
            .await;

        let message = OutboundMessage::text("plain", ParseMode::Text).with_chat_id(5);
        client(&server).send(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_ok_false_is_delivery_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botT0K/sendMessage"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"ok": false, "description": "Bad Request: chat not found"})),
            )
            .mount(&server)
            .await;

        let message = OutboundMessage::text("x", ParseMode::Text).with_chat_id(5);
        let err = client(&server).send(&message).await.unwrap_err();
        assert!(err.to_string().contains("chat not found"));
        assert_eq!(err.kind(), "delivery");
    }

    #[tokio::test]
    async fn test_missing_chat_id_is_rejected() {
        let server = MockServer::start().await;
        let message = OutboundMessage::text("x", ParseMode::Text);
        let err = client(&server).send(&message).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_photo_by_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botT0K/sendPhoto"))
            .and(body_json(json!({
                "chat_id": 5,
                "photo": "https://img.test/a.png",
                "caption": "cap",
                "parse_mode": "HTML",
            })))
            .respond_with(ok())
            .expect(1)
            .mount(&server)
            .await;

        let message =
            OutboundMessage::photo("https://img.test/a.png", Some("cap".into()), ParseMode::Html)
                .with_chat_id(5);
        client(&server).send(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_photo_falls_back_to_upload() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/img/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png()))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/botT0K/sendPhoto"))
            .and(body_string_contains("name=\"photo\""))
            .respond_with(ok())
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/botT0K/sendPhoto"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"ok": false, "description": "wrong file identifier"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/img/a.png", server.uri());
        let message = OutboundMessage::photo(url, Some("cap".into()), ParseMode::Html).with_chat_id(5);
        client(&server).send(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_upload_is_transcoded_to_jpeg() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/img/wide.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_sized(2100, 4)))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/botT0K/sendPhoto"))
            .and(body_string_contains("filename=\"photo.jpg\""))
            .respond_with(ok())
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/botT0K/sendPhoto"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"ok": false})))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/img/wide.png", server.uri());
        let message = OutboundMessage::photo(url, None, ParseMode::Text).with_chat_id(5);
        client(&server).send(&message).await.unwrap();
    }
}
