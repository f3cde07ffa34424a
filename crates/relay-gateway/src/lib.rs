//! Delegated-session adapter over the user-session gateway HTTP API.
//!
//! The gateway holds the requester's logged-in user session and exposes the
//! few calls the relay needs. Every session-scoped call carries the
//! requester's token in `X-Session-Token`.
//!
//! | call                      | route                               |
//! |---------------------------|-------------------------------------|
//! | validate token            | `POST /v1/sessions/validate`        |
//! | fetch item                | `GET  /v1/messages?chat=..&id=..`   |
//! | download file             | `GET  /v1/files/{file_ref}`         |
//! | forward item              | `POST /v1/messages/forward`         |
//! | join via invite           | `POST /v1/chats/join`               |
//! | close                     | `POST /v1/sessions/close`           |

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use relay_core::{
    content::{MediaFile, RetrievedItem},
    domain::{ChatId, SessionToken, SourceChat},
    errors::Error,
    ports::{ProgressSink, SourceReader, SourceSession},
    Result,
};

const TOKEN_HEADER: &str = "X-Session-Token";

#[derive(Clone, Debug)]
struct Endpoint {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl Endpoint {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, req: RequestBuilder, token: &SessionToken) -> RequestBuilder {
        let req = req.header(TOKEN_HEADER, &token.0);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

/// Opens delegated sessions through the gateway.
#[derive(Clone, Debug)]
pub struct GatewayReader {
    endpoint: Endpoint,
}

impl GatewayReader {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("gateway client build failed: {e}")))?;
        Ok(Self {
            endpoint: Endpoint {
                base_url: base_url.into(),
                api_key,
                http,
            },
        })
    }
}

#[async_trait]
impl SourceReader for GatewayReader {
    async fn connect(&self, token: &SessionToken) -> Result<Arc<dyn SourceSession>> {
        let ep = &self.endpoint;
        let resp = ep
            .authorize(ep.http.post(ep.url("/v1/sessions/validate")), token)
            .send()
            .await
            .map_err(request_error)?;
        check(resp, "validate").await?;

        tracing::debug!("gateway session validated");
        Ok(Arc::new(GatewaySession {
            endpoint: ep.clone(),
            token: token.clone(),
        }))
    }
}

/// One validated delegated session.
pub struct GatewaySession {
    endpoint: Endpoint,
    token: SessionToken,
}

impl GatewaySession {
    fn get(&self, path: &str) -> RequestBuilder {
        let ep = &self.endpoint;
        ep.authorize(ep.http.get(ep.url(path)), &self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let ep = &self.endpoint;
        ep.authorize(ep.http.post(ep.url(path)), &self.token)
    }

    async fn stream_to(
        &self,
        file_ref: &str,
        dest: &Path,
        size_hint: Option<u64>,
        progress: Option<ProgressSink>,
    ) -> Result<()> {
        let resp = self
            .get(&file_path(file_ref))
            .send()
            .await
            .map_err(request_error)?;
        let mut resp = check(resp, "download").await?;

        let total = resp.content_length().or(size_hint).unwrap_or(0);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut current = 0u64;

        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| Error::TransferFailed(format!("download interrupted: {e}")))?
        {
            file.write_all(&chunk).await?;
            current += chunk.len() as u64;
            if let Some(p) = &progress {
                p(current, total.max(current));
            }
        }
        file.flush().await?;

        if let Some(p) = &progress {
            if current < total {
                p(current, current);
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct MessageEnvelope {
    #[serde(default)]
    message: Option<RetrievedItem>,
}

#[async_trait]
impl SourceSession for GatewaySession {
    async fn fetch_item(&self, chat: &SourceChat, id: i32) -> Result<Option<RetrievedItem>> {
        let resp = self
            .get("/v1/messages")
            .query(&[("chat", chat.to_string()), ("id", id.to_string())])
            .send()
            .await
            .map_err(request_error)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check(resp, "fetch").await?;
        let envelope: MessageEnvelope = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("gateway json error: {e}")))?;
        Ok(envelope.message)
    }

    async fn download_media(
        &self,
        media: &MediaFile,
        dest: &Path,
        progress: ProgressSink,
    ) -> Result<()> {
        self.stream_to(&media.file_ref, dest, media.size, Some(progress))
            .await
    }

    async fn download_file(&self, file_ref: &str, dest: &Path) -> Result<()> {
        self.stream_to(file_ref, dest, None, None).await
    }

    async fn forward_item(&self, from: &SourceChat, id: i32, to: ChatId) -> Result<()> {
        let resp = self
            .post("/v1/messages/forward")
            .json(&serde_json::json!({
                "from": from.to_string(),
                "id": id,
                "to": to.0,
                "drop_author": true,
            }))
            .send()
            .await
            .map_err(request_error)?;
        check(resp, "forward").await.map(|_| ())
    }

    async fn join_chat(&self, invite_link: &str) -> Result<()> {
        let resp = self
            .post("/v1/chats/join")
            .json(&serde_json::json!({ "invite_link": invite_link }))
            .send()
            .await
            .map_err(request_error)?;
        check(resp, "join").await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        let resp = self
            .post("/v1/sessions/close")
            .send()
            .await
            .map_err(request_error)?;
        check(resp, "close").await.map(|_| ())
    }
}

fn file_path(file_ref: &str) -> String {
    let encoded: String = file_ref
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            other => format!("%{other:02X}"),
        })
        .collect();
    format!("/v1/files/{encoded}")
}

fn request_error(e: reqwest::Error) -> Error {
    Error::External(format!("gateway request error: {e}"))
}

/// Map non-success statuses onto the relay's error taxonomy.
fn status_error(status: StatusCode, op: &str, body: &str) -> Error {
    let detail = format!(
        "{op}: {status} {}",
        body.chars().take(200).collect::<String>()
    );
    match status {
        StatusCode::UNAUTHORIZED => Error::SessionInvalid(detail),
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Error::SourceUnavailable(detail),
        _ => Error::External(format!("gateway {detail}")),
    }
}

async fn check(resp: Response, op: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    tracing::debug!(op, %status, "gateway call failed");
    Err(status_error(status, op, &body))
}
