use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::SyncConfig;

const API_PATH: &str = "/api/";
const PAGES_PATH: &str = "pages";
const BOOKS_PATH: &str = "books";
const CHAPTERS_PATH: &str = "chapters";
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build BookStack HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("BookStack API returned HTTP {status} for {url}{}", render_body(body))]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("failed to decode BookStack response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

fn render_body(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {body}")
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PageSummary {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ChapterDetail {
    #[serde(default)]
    pub pages: Vec<PageSummary>,
}

/// One entry of a book's `contents`, which interleaves chapters and pages.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BookContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: u64,
    pub name: String,
}

impl BookContent {
    pub fn is_page(&self) -> bool {
        self.kind == "page"
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BookDetail {
    #[serde(default)]
    pub contents: Vec<BookContent>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PageRecord {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub book_id: Option<u64>,
    #[serde(default)]
    pub chapter_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageTag {
    pub name: String,
    pub value: String,
}

/// Body of `POST /api/pages` and `PUT /api/pages/{id}`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PagePayload {
    pub name: String,
    pub markdown: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<PageTag>,
}

pub trait BookStackApi {
    fn get_chapter(&mut self, chapter_id: u64) -> Result<ChapterDetail, ApiError>;
    fn get_book(&mut self, book_id: u64) -> Result<BookDetail, ApiError>;
    fn create_page(&mut self, payload: &PagePayload) -> Result<PageRecord, ApiError>;
    fn update_page(&mut self, page_id: u64, payload: &PagePayload)
    -> Result<PageRecord, ApiError>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct BookStackClientConfig {
    pub base_url: String,
    pub token_id: String,
    pub token_secret: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl BookStackClientConfig {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            base_url: config.credentials.url.clone(),
            token_id: config.credentials.token_id.clone(),
            token_secret: config.credentials.token_secret.clone(),
            user_agent: config.user_agent.clone(),
            timeout_ms: config.timeout_ms,
        }
    }
}

pub struct BookStackClient {
    client: Client,
    api_root: String,
    authorization: String,
    request_count: usize,
}

impl BookStackClient {
    pub fn new(config: BookStackClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ApiError::Client)?;

        Ok(Self {
            client,
            api_root: api_root(&config.base_url),
            authorization: authorization_header(&config.token_id, &config.token_secret),
            request_count: 0,
        })
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path.trim_start_matches('/'))
    }

    fn send_json<T: DeserializeOwned>(
        &mut self,
        request: RequestBuilder,
        url: String,
    ) -> Result<T, ApiError> {
        self.request_count += 1;
        let response = request
            .header(AUTHORIZATION, self.authorization.as_str())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        debug!(%url, %status, "BookStack API response");
        let text = response.text().map_err(|source| ApiError::Transport {
            url: url.clone(),
            source,
        })?;
        if !status.is_success() {
            return Err(ApiError::Status {
                url,
                status,
                body: truncate_body(&text),
            });
        }

        serde_json::from_str(&text).map_err(|source| ApiError::Decode { url, source })
    }
}

impl BookStackApi for BookStackClient {
    fn get_chapter(&mut self, chapter_id: u64) -> Result<ChapterDetail, ApiError> {
        let url = self.endpoint(&format!("{CHAPTERS_PATH}/{chapter_id}"));
        let request = self.client.get(&url);
        self.send_json(request, url)
    }

    fn get_book(&mut self, book_id: u64) -> Result<BookDetail, ApiError> {
        let url = self.endpoint(&format!("{BOOKS_PATH}/{book_id}"));
        let request = self.client.get(&url);
        self.send_json(request, url)
    }

    fn create_page(&mut self, payload: &PagePayload) -> Result<PageRecord, ApiError> {
        let url = self.endpoint(PAGES_PATH);
        let request = self.client.post(&url).json(payload);
        self.send_json(request, url)
    }

    fn update_page(
        &mut self,
        page_id: u64,
        payload: &PagePayload,
    ) -> Result<PageRecord, ApiError> {
        let url = self.endpoint(&format!("{PAGES_PATH}/{page_id}"));
        let request = self.client.put(&url).json(payload);
        self.send_json(request, url)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// `https://wiki.example.org//` -> `https://wiki.example.org/api/`
pub fn api_root(base_url: &str) -> String {
    format!("{}{API_PATH}", base_url.trim().trim_end_matches('/'))
}

pub fn authorization_header(token_id: &str, token_secret: &str) -> String {
    format!("Token {token_id}:{token_secret}")
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= ERROR_BODY_LIMIT {
        return trimmed.to_string();
    }
    let mut out = trimmed.chars().take(ERROR_BODY_LIMIT).collect::<String>();
    out.push_str("...");
    out
}
