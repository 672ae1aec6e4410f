use image::DynamicImage;
use log::{debug, warn};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use super::error::ApiError;
use crate::reader::context::BookContext;
use crate::reader::spread::PageDimensions;

const USER_AGENT: &str = concat!("comic-shelf/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub format: String,
    #[serde(default)]
    pub page_count: Option<u32>,
}

impl Book {
    pub fn context(&self) -> BookContext {
        BookContext::new(self.id, &self.format)
    }
}

#[derive(Debug, Deserialize)]
struct BookListResponse {
    items: Vec<Book>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageInfo {
    pub page_number: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl PageInfo {
    pub fn dimensions(&self) -> Option<PageDimensions> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(PageDimensions::new(width, height)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageList {
    pub total_pages: u32,
    #[serde(default)]
    pub pages: Vec<PageInfo>,
}

/// Persisted reading position as returned by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadingProgress {
    pub progress: f64,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub cfi: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressPayload {
    pub book_id: i64,
    pub format: String,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

/// Pulls a human-readable message out of an error response body.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.detail.or(parsed.message).or(parsed.error) {
            return message;
        }
    }
    let body = body.trim();
    if !body.is_empty() && body.len() <= 200 && !body.starts_with('<') {
        return body.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("unexpected server response")
        .to_string()
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status,
        message: error_message(status, &body),
    })
}

/// Client for the library server's REST API.
#[derive(Debug, Clone)]
pub struct LibraryClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl LibraryClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get(&self, url: &str) -> Result<Response, ApiError> {
        debug!("GET {}", url);
        let response = self.authorize(self.client.get(url)).send().await?;
        check_status(response).await
    }

    pub async fn list_books(&self) -> Result<Vec<Book>, ApiError> {
        let url = format!("{}/api/books?limit=200", self.base_url);
        let response: BookListResponse = self.get(&url).await?.json().await?;
        Ok(response.items)
    }

    /// Lists the pages of a comic. Returns `Ok(None)` without touching the network while
    /// the format is still unknown.
    pub async fn get_pages(
        &self,
        book_id: i64,
        format: Option<&str>,
        with_dimensions: bool,
    ) -> Result<Option<PageList>, ApiError> {
        let Some(format) = format else {
            return Ok(None);
        };
        let url = format!(
            "{}/api/comic/{}/pages?format={}&dimensions={}",
            self.base_url,
            book_id,
            urlencoding::encode(format),
            with_dimensions
        );
        let pages: PageList = self.get(&url).await?.json().await?;
        Ok(Some(pages))
    }

    /// Fetches the persisted position; a 404 means the book has never been opened.
    pub async fn get_progress(
        &self,
        context: &BookContext,
    ) -> Result<Option<ReadingProgress>, ApiError> {
        let url = format!(
            "{}/api/progress/{}?format={}",
            self.base_url,
            context.book_id,
            urlencoding::encode(&context.format)
        );
        match self.get(&url).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(ApiError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn save_progress(
        &self,
        payload: &ProgressPayload,
    ) -> Result<ReadingProgress, ApiError> {
        let url = format!("{}/api/progress", self.base_url);
        debug!(
            "PUT {} book={} progress={:.3}",
            url, payload.book_id, payload.progress
        );
        let response = self
            .authorize(self.client.put(&url).json(payload))
            .send()
            .await?;
        let response = check_status(response).await.inspect_err(|err| {
            warn!("progress write for book {} failed: {}", payload.book_id, err);
        })?;
        Ok(response.json().await?)
    }

    pub async fn fetch_page_image(
        &self,
        context: &BookContext,
        page_number: u32,
    ) -> Result<DynamicImage, ApiError> {
        let url = format!(
            "{}/api/comic/{}/page/{}?format={}",
            self.base_url,
            context.book_id,
            page_number,
            urlencoding::encode(&context.format)
        );
        let bytes = self.get(&url).await?.bytes().await?;
        let image = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(image::ImageError::IoError)?
            .decode()?;
        Ok(image)
    }
}
