//! Google Drive v3 HTTP client
//!
//! Implements [`DriveSource`] against the Drive REST API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use serde::de::DeserializeOwned;
use url::Url;

use super::api::{ChangeList, DriveFile, FileList, StartPageToken};
use super::{ChunkStream, DriveAuth, DriveSource};
use crate::error::DriveError;
use crate::models::{ChangeCursor, ChangeEvent, ChangePage, ChildPage, RemoteNode};

/// Google Drive API client
pub struct DriveClient {
    auth: DriveAuth,
    page_size: usize,
    chunk_size: u64,
}

impl DriveClient {
    /// Drive API base URL
    const BASE_URL: &'static str = "https://www.googleapis.com/drive/v3";

    const LIST_FIELDS: &'static str = "nextPageToken, files(id, name, mimeType)";
    const CHANGE_FIELDS: &'static str = "changes(fileId,removed,file(id,name,mimeType,trashed),time),newStartPageToken,nextPageToken";

    /// Create a new Drive client
    pub fn new(auth: DriveAuth) -> Self {
        Self {
            auth,
            page_size: 1000,
            chunk_size: 1024 * 1024,
        }
    }

    /// Items requested per listing page (capped at 1000 by the API)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, 1000);
        self
    }

    /// Bytes requested per download chunk
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Obtain a token up front so credential problems surface before a run
    pub fn authenticate(&self) -> Result<(), DriveError> {
        self.auth.get_access_token()?;
        Ok(())
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, DriveError> {
        let mut url = Url::parse(&format!("{}/{}", Self::BASE_URL, path))
            .map_err(|e| DriveError::permanent(format!("bad url for {path}: {e}")))?;
        url.query_pairs_mut()
            .extend_pairs(query)
            .append_pair("supportsAllDrives", "true");
        Ok(url)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &Url, context: &str) -> Result<T, DriveError> {
        let access_token = self.auth.get_access_token()?;

        let mut response = ureq::get(url.as_str())
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .map_err(|e| DriveError::from_ureq(e, context))?;

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| DriveError::from_ureq(e, context))?;

        serde_json::from_str(&body)
            .map_err(|e| DriveError::permanent(format!("{context}: malformed response: {e}")))
    }

    fn get_file(&self, id: &str, fields: &str) -> Result<DriveFile, DriveError> {
        let url = self.url(&format!("files/{id}"), &[("fields", fields)])?;
        self.get_json(&url, "get file")
    }
}

impl DriveSource for DriveClient {
    fn get_node(&self, id: &str) -> Result<RemoteNode, DriveError> {
        Ok(self.get_file(id, "id,name,mimeType")?.into_node(""))
    }

    fn list_children(
        &self,
        folder: &RemoteNode,
        page_token: Option<&str>,
    ) -> Result<ChildPage, DriveError> {
        let query = format!("'{}' in parents and trashed = false", folder.id);
        let page_size = self.page_size.to_string();
        let mut params = vec![
            ("q", query.as_str()),
            ("fields", Self::LIST_FIELDS),
            ("pageSize", page_size.as_str()),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let url = self.url("files", &params)?;
        let list: FileList = self.get_json(&url, "list folder")?;

        let parent_path = folder.path();
        Ok(ChildPage {
            items: list
                .files
                .unwrap_or_default()
                .into_iter()
                .map(|f| f.into_node(&parent_path))
                .collect(),
            next_page_token: list.next_page_token,
        })
    }

    fn open_download(&self, file_id: &str) -> Result<Box<dyn ChunkStream + '_>, DriveError> {
        let meta = self.get_file(file_id, "id,size")?;
        let url = self.url(&format!("files/{file_id}"), &[("alt", "media")])?;

        Ok(Box::new(RangedDownload {
            client: self,
            url,
            offset: 0,
            total: meta.size.and_then(|s| s.parse().ok()),
            finished: false,
        }))
    }

    fn get_start_token(&self) -> Result<ChangeCursor, DriveError> {
        let url = self.url("changes/startPageToken", &[])?;
        let token: StartPageToken = self.get_json(&url, "get start page token")?;
        Ok(ChangeCursor::new(token.start_page_token))
    }

    fn list_changes(&self, page_token: &str) -> Result<ChangePage, DriveError> {
        let url = self.url(
            "changes",
            &[
                ("pageToken", page_token),
                ("fields", Self::CHANGE_FIELDS),
                ("includeItemsFromAllDrives", "true"),
            ],
        )?;
        let list: ChangeList = self.get_json(&url, "list changes")?;

        let events = list
            .changes
            .unwrap_or_default()
            .into_iter()
            .filter_map(|change| {
                let file_id = change
                    .file_id
                    .or_else(|| change.file.as_ref().map(|f| f.id.clone()))?;
                let trashed = change.file.as_ref().and_then(|f| f.trashed).unwrap_or(false);
                Some(ChangeEvent {
                    file_id,
                    removed: change.removed.unwrap_or(false) || trashed,
                    file: change.file.map(|f| f.into_node("")),
                })
            })
            .collect();

        Ok(ChangePage {
            events,
            next_page_token: list.next_page_token,
            rotation_token: list.new_start_page_token.map(ChangeCursor::new),
        })
    }
}

/// Chunked download using HTTP range requests
///
/// Each chunk is an independent request, so a failed chunk can be retried
/// without restarting the whole transfer.
struct RangedDownload<'a> {
    client: &'a DriveClient,
    url: Url,
    offset: u64,
    total: Option<u64>,
    finished: bool,
}

impl ChunkStream for RangedDownload<'_> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DriveError> {
        if self.finished || self.total.is_some_and(|total| self.offset >= total) {
            return Ok(None);
        }

        let access_token = self.client.auth.get_access_token()?;
        let end = self.offset + self.client.chunk_size - 1;

        let result = ureq::get(self.url.as_str())
            .header("Authorization", &format!("Bearer {}", access_token))
            .header("Range", &format!("bytes={}-{}", self.offset, end))
            .call();

        let mut response = match result {
            Ok(response) => response,
            // Requested range starts past the end: nothing left
            Err(ureq::Error::StatusCode(416)) => {
                self.finished = true;
                return Ok(None);
            }
            Err(e) => return Err(DriveError::from_ureq(e, "download chunk")),
        };

        let partial = response.status().as_u16() == 206;
        let range_total = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        let bytes = response
            .body_mut()
            .with_config()
            .limit(self.client.chunk_size.max(MAX_DOCUMENT_BYTES))
            .read_to_vec()
            .map_err(|e| DriveError::from_ureq(e, "download chunk"))?;

        if partial {
            self.offset += bytes.len() as u64;
            if range_total.is_some() {
                self.total = range_total;
            }
            if bytes.is_empty() {
                self.finished = true;
            }
        } else {
            // Server ignored the range and sent the whole body
            self.finished = true;
        }

        Ok(Some(bytes))
    }
}

/// Upper bound for a full-body response when the range header is ignored
const MAX_DOCUMENT_BYTES: u64 = 64 * 1024 * 1024;

/// Total length from a `Content-Range: bytes 0-99/1234` header
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}
