use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DEFAULT_USER_AGENT, WikiCredentials, WikiSection};

/// Where a new page is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    pub space_key: String,
    pub parent_page_id: String,
}

impl PageLocation {
    pub fn from_section(section: &WikiSection) -> Self {
        Self {
            space_key: section.space_key.clone(),
            parent_page_id: section.parent_page_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub trait WikiPublishApi {
    /// Create a page and return its id.
    fn create_page(&mut self, location: &PageLocation, title: &str, body: &str) -> Result<String>;
    fn get_version(&mut self, page_id: &str) -> Result<u64>;
    fn update_page(&mut self, page_id: &str, title: &str, body: &str, version: u64) -> Result<()>;
    /// Upload an attachment and return the filename the wiki assigned.
    fn attach_file(&mut self, page_id: &str, attachment: &Attachment) -> Result<String>;
}

pub struct ConfluenceClient {
    client: Client,
    content_url: String,
    credentials: WikiCredentials,
}

impl ConfluenceClient {
    pub fn new(section: &WikiSection, credentials: WikiCredentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(section.timeout_ms))
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .context("failed to build wiki HTTP client")?;
        Ok(Self {
            client,
            content_url: section.content_url(),
            credentials,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.credentials.user, Some(&self.credentials.token))
    }

    fn page_url(&self, page_id: &str) -> String {
        format!("{}{page_id}", self.content_url)
    }
}

fn ensure_success(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    bail!("wiki {action} failed with HTTP {status}: {body}");
}

impl WikiPublishApi for ConfluenceClient {
    fn create_page(&mut self, location: &PageLocation, title: &str, body: &str) -> Result<String> {
        let payload = CreatePageRequest {
            kind: "page",
            title,
            ancestors: vec![AncestorRef {
                id: &location.parent_page_id,
            }],
            space: SpaceRef {
                key: &location.space_key,
            },
            body: StorageBody::new(body),
        };
        debug!(title, space = %location.space_key, "creating wiki page");
        let response = self
            .authorized(self.client.post(&self.content_url))
            .json(&payload)
            .send()
            .context("failed to call wiki create-page API")?;
        let created: CreatePageResponse = ensure_success(response, "create-page")?
            .json()
            .context("failed to decode create-page response")?;
        Ok(created.id)
    }

    fn get_version(&mut self, page_id: &str) -> Result<u64> {
        let response = self
            .authorized(self.client.get(self.page_url(page_id)))
            .query(&[("expand", "version")])
            .send()
            .context("failed to call wiki get-version API")?;
        let page: VersionedPageResponse = ensure_success(response, "get-version")?
            .json()
            .context("failed to decode page version response")?;
        Ok(page.version.number)
    }

    fn update_page(&mut self, page_id: &str, title: &str, body: &str, version: u64) -> Result<()> {
        let payload = UpdatePageRequest {
            version: VersionRef {
                number: version,
                minor_edit: true,
            },
            title,
            kind: "page",
            body: StorageBody::new(body),
        };
        debug!(page_id, version, "updating wiki page");
        let response = self
            .authorized(self.client.put(self.page_url(page_id)))
            .json(&payload)
            .send()
            .context("failed to call wiki update-page API")?;
        ensure_success(response, "update-page")?;
        Ok(())
    }

    fn attach_file(&mut self, page_id: &str, attachment: &Attachment) -> Result<String> {
        let part = Part::bytes(attachment.bytes.clone())
            .file_name(attachment.filename.clone())
            .mime_str(&attachment.content_type)
            .with_context(|| format!("invalid content type {}", attachment.content_type))?;
        let form = Form::new().part("file", part);
        debug!(page_id, filename = %attachment.filename, "uploading wiki attachment");
        let response = self
            .authorized(
                self.client
                    .post(format!("{}/child/attachment", self.page_url(page_id))),
            )
            .header("X-Atlassian-Token", "no-check")
            .multipart(form)
            .send()
            .context("failed to call wiki attachment API")?;
        let uploaded: AttachmentResponse = ensure_success(response, "attach-file")?
            .json()
            .context("failed to decode attachment response")?;
        uploaded
            .results
            .into_iter()
            .next()
            .map(|result| result.title)
            .ok_or_else(|| anyhow::anyhow!("attachment response listed no files"))
    }
}

#[derive(Debug, Serialize)]
struct CreatePageRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    title: &'a str,
    ancestors: Vec<AncestorRef<'a>>,
    space: SpaceRef<'a>,
    body: StorageBody<'a>,
}

#[derive(Debug, Serialize)]
struct UpdatePageRequest<'a> {
    version: VersionRef,
    title: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    body: StorageBody<'a>,
}

#[derive(Debug, Serialize)]
struct AncestorRef<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct SpaceRef<'a> {
    key: &'a str,
}

#[derive(Debug, Serialize)]
struct VersionRef {
    number: u64,
    #[serde(rename = "minorEdit")]
    minor_edit: bool,
}

#[derive(Debug, Serialize)]
struct StorageBody<'a> {
    storage: StorageValue<'a>,
}

#[derive(Debug, Serialize)]
struct StorageValue<'a> {
    value: &'a str,
    representation: &'a str,
}

impl<'a> StorageBody<'a> {
    fn new(value: &'a str) -> Self {
        Self {
            storage: StorageValue {
                value,
                representation: "storage",
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatePageResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VersionedPageResponse {
    version: VersionPayload,
}

#[derive(Debug, Deserialize)]
struct VersionPayload {
    number: u64,
}

#[derive(Debug, Deserialize, Default)]
struct AttachmentResponse {
    #[serde(default)]
    results: Vec<AttachmentResult>,
}

#[derive(Debug, Deserialize)]
struct AttachmentResult {
    title: String,
}
