use async_trait::async_trait;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::Serialize;
use std::error::Error as StdError;

use super::KnowledgeBase;
use crate::error::KnowledgeError;

pub struct HttpKnowledgeBase {
    http: HttpClient,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest<'a> {
    user_id: &'a str,
    content: &'a str,
    timestamp: i64,
    source: &'static str,
}

impl HttpKnowledgeBase {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| format!("Invalid knowledge base API key format: {}", e))?
            );
        }
        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    async fn upload_conversation(
        &self,
        user_id: &str,
        formatted_text: &str,
        timestamp: i64
    ) -> Result<(), KnowledgeError> {
        let url = format!("{}/conversations", self.base_url);
        let req = UploadRequest {
            user_id,
            content: formatted_text,
            timestamp,
            source: "call",
        };
        let resp = self.http.post(&url).json(&req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(KnowledgeError::Status { status: status.as_u16(), body });
        }
        Ok(())
    }
}
