//! REST 社交网络客户端（LinkedIn v2 风格端点）
//!
//! - `GET  {base}/connections?count=n`                → `{"elements": [Connection]}`
//! - `GET  {base}/connections/{id}/posts?since=ts`    → `{"elements": [RemotePost]}`
//! - `POST {base}/socialActions/{post}/likes`
//! - `POST {base}/socialActions/{post}/comments`
//! - `POST {base}/ugcPosts`                            → 新帖 id 取自 `x-restli-id` 头或响应体 `id`
//!
//! 状态码经 `ActionError::from_status` 分类；传输层超时 / 连接错误视为瞬时错误，
//! 2xx 响应体无法解析视为永久错误（重试不会改变内容）。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{Connection, Post, SocialClient};
use crate::core::ActionError;

#[derive(Debug, Deserialize)]
struct Elements<T> {
    #[serde(default = "Vec::new")]
    elements: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemotePost {
    id: String,
    #[serde(default)]
    text: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    num_likes: u32,
    #[serde(default)]
    num_comments: u32,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: Option<String>,
}

pub struct RestSocialClient {
    http: reqwest::Client,
    base_url: Url,
    access_token: String,
    author_urn: String,
}

impl RestSocialClient {
    pub fn new(
        base_url: &str,
        access_token: &str,
        author_urn: &str,
        timeout: Duration,
    ) -> Result<Self, ActionError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ActionError::InvalidTarget(format!("bad base url {base_url}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ActionError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            access_token: access_token.to_string(),
            author_urn: author_urn.to_string(),
        })
    }

    /// 在 base_url 后追加路径段（逐段百分号编码，帖子 URN 中的 ':' 安全）
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ActionError> {
        let mut url = self.base_url.clone();
        let not_a_base = || {
            ActionError::InvalidTarget(format!("base url cannot be a base: {}", self.base_url))
        };
        url.path_segments_mut()
            .map_err(|_| not_a_base())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ActionError> {
        let response = self.authorized(request).send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        Err(ActionError::from_status(status.as_u16(), truncate(&body, 300), retry_after))
    }
}

fn transport_error(err: reqwest::Error) -> ActionError {
    if err.is_timeout() {
        ActionError::Timeout
    } else {
        ActionError::Network(err.to_string())
    }
}

/// 读取并解析成功响应的 JSON 响应体
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ActionError> {
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(transport_error)?;
    parse_body(status, &body)
}

fn parse_body<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T, ActionError> {
    serde_json::from_slice(body).map_err(|e| ActionError::Rejected {
        status,
        message: format!("malformed response body: {e}"),
    })
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[async_trait]
impl SocialClient for RestSocialClient {
    async fn fetch_top_connections(&self, n: usize) -> Result<Vec<Connection>, ActionError> {
        let url = self.endpoint(&["connections"])?;
        let response = self
            .send(self.http.get(url).query(&[("count", n.to_string())]))
            .await?;
        let body: Elements<Connection> = decode(response).await?;
        tracing::debug!(count = body.elements.len(), "Fetched top connections");
        Ok(body.elements.into_iter().take(n).collect())
    }

    async fn fetch_recent_posts(
        &self,
        connection: &Connection,
        since: DateTime<Utc>,
    ) -> Result<Vec<Post>, ActionError> {
        let url = self.endpoint(&["connections", &connection.id, "posts"])?;
        let response = self
            .send(self.http.get(url).query(&[("since", since.to_rfc3339())]))
            .await?;
        let body: Elements<RemotePost> = decode(response).await?;
        Ok(body
            .elements
            .into_iter()
            .filter(|p| p.published_at >= since)
            .map(|p| Post {
                id: p.id,
                connection_id: connection.id.clone(),
                author_name: connection.name.clone(),
                text: p.text,
                published_at: p.published_at,
                num_likes: p.num_likes,
                num_comments: p.num_comments,
            })
            .collect())
    }

    async fn like(&self, post_id: &str) -> Result<(), ActionError> {
        let url = self.endpoint(&["socialActions", post_id, "likes"])?;
        let payload = json!({ "actor": self.author_urn, "object": post_id });
        self.send(self.http.post(url).json(&payload)).await?;
        Ok(())
    }

    async fn comment(&self, post_id: &str, text: &str) -> Result<(), ActionError> {
        let url = self.endpoint(&["socialActions", post_id, "comments"])?;
        let payload = json!({
            "actor": self.author_urn,
            "object": post_id,
            "message": { "text": text },
        });
        self.send(self.http.post(url).json(&payload)).await?;
        Ok(())
    }

    async fn publish(&self, text: &str) -> Result<String, ActionError> {
        let url = self.endpoint(&["ugcPosts"])?;
        let payload = json!({
            "author": self.author_urn,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": text },
                    "shareMediaCategory": "NONE"
                }
            },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" }
        });
        let response = self.send(self.http.post(url).json(&payload)).await?;
        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(id) = header_id {
            return Ok(id);
        }
        // 已发布成功，响应体缺 id 时不能当作失败
        let created: Created = response.json().await.unwrap_or(Created { id: None });
        Ok(created.id.unwrap_or_else(|| "unknown".to_string()))
    }
}
