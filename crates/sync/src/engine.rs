//! Extraction-engine interface.
//!
//! The engine is the expensive downstream step that turns a finalized part
//! into memory records. The pipeline only depends on this trait; handoffs
//! must be idempotent under retry with the same `(session, part_index)` key.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use memsync_core::{MessageRecord, SessionId, config::EngineConfig};
use serde::Serialize;
use tracing::info;

use crate::error::EngineError;

/// Consumer of finalized parts.
#[async_trait]
pub trait ExtractionEngine: Send + Sync {
  async fn ingest(&self, session: &SessionId, part_index: u32, messages: &[MessageRecord])
  -> Result<(), EngineError>;
}

/// Run one handoff under the configured timeout. A timeout is a finalization
/// failure like any other: the part stays durable and is retried next pass.
pub async fn ingest_with_timeout(
  engine: &Arc<dyn ExtractionEngine>,
  timeout: Duration,
  session: &SessionId,
  part_index: u32,
  messages: &[MessageRecord],
) -> Result<(), EngineError> {
  match tokio::time::timeout(timeout, engine.ingest(session, part_index, messages)).await {
    Ok(result) => result,
    Err(_) => Err(EngineError::Timeout { timeout }),
  }
}

/// Build the configured engine: HTTP when a URL is set, otherwise a logging
/// no-op (parts stay on disk for out-of-band ingestion).
pub fn engine_from_config(config: &EngineConfig) -> Arc<dyn ExtractionEngine> {
  match &config.url {
    Some(url) => Arc::new(HttpEngine::new(url.clone(), config.user_id.clone())),
    None => Arc::new(LogEngine),
  }
}

/// No-op engine that only logs. Used when no engine URL is configured and in
/// dry runs.
pub struct LogEngine;

#[async_trait]
impl ExtractionEngine for LogEngine {
  async fn ingest(
    &self,
    session: &SessionId,
    part_index: u32,
    messages: &[MessageRecord],
  ) -> Result<(), EngineError> {
    info!(session = %session, part = part_index, messages = messages.len(), "No engine configured, part kept on disk");
    Ok(())
  }
}

#[derive(Serialize)]
struct IngestRequest<'a> {
  session_id: &'a str,
  part_index: u32,
  user_id: &'a str,
  modality: &'static str,
  messages: &'a [MessageRecord],
}

/// HTTP extraction engine: POSTs each part to `{url}/ingest`.
pub struct HttpEngine {
  client: reqwest::Client,
  url: String,
  user_id: String,
}

impl HttpEngine {
  pub fn new(url: String, user_id: String) -> Self {
    Self {
      client: reqwest::Client::new(),
      url,
      user_id,
    }
  }
}

#[async_trait]
impl ExtractionEngine for HttpEngine {
  async fn ingest(
    &self,
    session: &SessionId,
    part_index: u32,
    messages: &[MessageRecord],
  ) -> Result<(), EngineError> {
    let request = IngestRequest {
      session_id: session.as_str(),
      part_index,
      user_id: &self.user_id,
      modality: "conversation",
      messages,
    };

    let response = self
      .client
      .post(format!("{}/ingest", self.url.trim_end_matches('/')))
      .json(&request)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      if body.is_empty() {
        return Err(EngineError::Status { status: status.as_u16() });
      }
      return Err(EngineError::Rejected(body));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use memsync_core::Role;

  struct SlowEngine;

  #[async_trait]
  impl ExtractionEngine for SlowEngine {
    async fn ingest(&self, _: &SessionId, _: u32, _: &[MessageRecord]) -> Result<(), EngineError> {
      tokio::time::sleep(Duration::from_secs(3600)).await;
      Ok(())
    }
  }

  #[tokio::test]
  async fn test_log_engine_accepts() {
    let engine: Arc<dyn ExtractionEngine> = Arc::new(LogEngine);
    let messages = [MessageRecord::new(Role::User, "hi")];
    let result = ingest_with_timeout(&engine, Duration::from_secs(1), &SessionId::from("s"), 0, &messages).await;
    assert!(result.is_ok());
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_surfaces_as_engine_error() {
    let engine: Arc<dyn ExtractionEngine> = Arc::new(SlowEngine);
    let result = ingest_with_timeout(&engine, Duration::from_secs(5), &SessionId::from("s"), 0, &[]).await;
    match result {
      Err(EngineError::Timeout { timeout }) => assert_eq!(timeout, Duration::from_secs(5)),
      other => panic!("expected timeout, got {other:?}"),
    }
  }
}
