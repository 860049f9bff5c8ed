use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::confluence::{Attachment, PageLocation, WikiPublishApi};
use crate::render::attachment_link_macro;

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub location: PageLocation,
    pub title: String,
    pub body: String,
    pub attachment: Attachment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub page_id: String,
    pub attachment_name: String,
    pub version: u64,
}

/// Create the page, attach the raw data, then bump the page version with a
/// link to the attachment. The first failure aborts the rest.
pub fn publish_report<A: WikiPublishApi>(
    api: &mut A,
    request: &PublishRequest,
) -> Result<PublishReport> {
    let page_id = api
        .create_page(&request.location, &request.title, &request.body)
        .with_context(|| format!("failed to create page `{}`", request.title))?;
    info!(page_id = %page_id, "page created");

    let attachment_name = api
        .attach_file(&page_id, &request.attachment)
        .with_context(|| format!("failed to attach {}", request.attachment.filename))?;
    info!(page_id = %page_id, attachment = %attachment_name, "attachment uploaded");

    let current = api
        .get_version(&page_id)
        .with_context(|| format!("failed to read version of page {page_id}"))?;
    let version = current + 1;
    let linked_body = format!("{}{}", request.body, attachment_link_macro(&attachment_name));
    api.update_page(&page_id, &request.title, &linked_body, version)
        .with_context(|| format!("failed to link attachment on page {page_id}"))?;
    info!(page_id = %page_id, version, "attachment link added");

    Ok(PublishReport {
        page_id,
        attachment_name,
        version,
    })
}
