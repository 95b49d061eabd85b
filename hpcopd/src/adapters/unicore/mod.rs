// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Remote execution over the UNICORE REST API.

mod error;
mod wire;

pub use error::{GatewayError, RemoteCall};

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::OnceCell;

use crate::app::errors::AppResult;
use crate::app::ports::RemoteExecutionPort;
use crate::app::types::{
    Credentials, JobPoll, JobSubmission, RemoteEntry, RemoteEntryKind, RemoteJobHandle,
    RemoteJobStatus,
};
use wire::{DirectoryListing, JobProperties, RegistryListing};

/// Default folder for uploaded inputs inside the working directory.
pub const DATA_FOLDER: &str = "data";
const CLIENT_STAGE_IN: &str = "haveClientStageIn";
const OCTET_STREAM: &str = "application/octet-stream";
const JSON: &str = "application/json";
const UPLOAD_CHUNK_BYTES: usize = 256 * 1024;
/// Slowest transfer rate an upload is allowed before it times out.
const MIN_UPLOAD_BYTES_PER_SEC: u64 = 1024 * 1024;

type GatewayResult<T> = Result<T, GatewayError>;

pub struct UnicoreGateway {
    client: Client,
    registry_url: String,
    compute_site: String,
    call_timeout: Duration,
    site_url: OnceCell<String>,
}

impl UnicoreGateway {
    pub fn new(
        registry_url: impl Into<String>,
        compute_site: impl Into<String>,
        call_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().connect_timeout(call_timeout).build()?;
        Ok(Self {
            client,
            registry_url: registry_url.into(),
            compute_site: compute_site.into(),
            call_timeout,
            site_url: OnceCell::new(),
        })
    }

    /// Site endpoint, looked up in the registry once and cached.
    async fn site_url(&self, credentials: &Credentials) -> GatewayResult<&str> {
        self.site_url
            .get_or_try_init(|| async {
                let registry: RegistryListing =
                    self.get_json(&self.registry_url, credentials).await?;
                let url = registry.site_url(&self.compute_site).ok_or_else(|| {
                    GatewayError::UnknownSite {
                        site: self.compute_site.clone(),
                    }
                })?;
                tracing::info!(site = %self.compute_site, %url, "resolved compute site");
                Ok::<_, GatewayError>(url)
            })
            .await
            .map(String::as_str)
    }

    fn request(&self, builder: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
        builder.bearer_auth(credentials.token())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        credentials: &Credentials,
    ) -> GatewayResult<T> {
        let response = self
            .request(self.client.get(url), credentials)
            .header(ACCEPT, JSON)
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(|err| classify_send_error(err, url))?;
        let text = ensure_success(response, url).await?.text().await?;
        serde_json::from_str(&text).map_err(|err| GatewayError::Malformed {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }

    async fn post_action(
        &self,
        job_url: &str,
        action: &str,
        credentials: &Credentials,
    ) -> GatewayResult<()> {
        let url = format!("{}/actions/{action}", job_url.trim_end_matches('/'));
        let response = self
            .request(self.client.post(&url), credentials)
            .json(&serde_json::json!({}))
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(|err| classify_send_error(err, &url))?;
        ensure_success(response, &url).await?;
        Ok(())
    }

    async fn job_properties(
        &self,
        job_url: &str,
        credentials: &Credentials,
    ) -> GatewayResult<JobProperties> {
        self.get_json(job_url, credentials).await
    }

    async fn working_dir(
        &self,
        handle: &RemoteJobHandle,
        credentials: &Credentials,
    ) -> GatewayResult<String> {
        if let Some(dir) = &handle.working_dir {
            return Ok(dir.clone());
        }
        let props = self.job_properties(&handle.job_url, credentials).await?;
        props
            .links
            .working_directory
            .map(|link| link.href.trim_end_matches('/').to_string())
            .ok_or_else(|| GatewayError::Malformed {
                url: handle.job_url.clone(),
                reason: "job has no working directory link".into(),
            })
    }

    async fn create_job(
        &self,
        description: &serde_json::Value,
        credentials: &Credentials,
    ) -> GatewayResult<String> {
        let url = format!("{}/jobs", self.site_url(credentials).await?);
        let response = self
            .request(self.client.post(&url), credentials)
            .json(description)
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(|err| classify_send_error(err, &url))?;
        let response = ensure_success(response, &url).await?;
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(GatewayError::MissingLocation { url })
    }

    async fn upload(
        &self,
        working_dir: &str,
        local: &Path,
        subfolder: Option<&str>,
        credentials: &Credentials,
    ) -> GatewayResult<()> {
        let file_name = local
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| GatewayError::Io {
                path: local.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
            })?;
        let url = match subfolder {
            Some(folder) => format!("{working_dir}/files/{folder}/{file_name}"),
            None => format!("{working_dir}/files/{file_name}"),
        };
        let io_err = |source| GatewayError::Io {
            path: local.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(local).await.map_err(io_err)?;
        let size = file.metadata().await.map_err(io_err)?.len();
        tracing::debug!(%url, bytes = size, "uploading");
        let response = self
            .request(self.client.put(&url), credentials)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(file_chunks(file)))
            .timeout(upload_deadline(self.call_timeout, size))
            .send()
            .await
            .map_err(|err| classify_send_error(err, &url))?;
        ensure_success(response, &url).await?;
        Ok(())
    }

    async fn submit_job(
        &self,
        submission: &JobSubmission,
        credentials: &Credentials,
    ) -> GatewayResult<RemoteJobHandle> {
        let description = job_description(submission);
        let client_stage_in = description
            .get(CLIENT_STAGE_IN)
            .and_then(|value| value.as_str())
            == Some("true");

        let job_url = self.create_job(&description, credentials).await?;
        tracing::info!(%job_url, "job created");
        let mut handle = RemoteJobHandle::from_url(job_url);
        let working_dir = self.working_dir(&handle, credentials).await?;

        if let Some(script) = &submission.script {
            self.upload(&working_dir, script, None, credentials).await?;
        }
        let subfolder = submission
            .inputs_subfolder
            .as_deref()
            .filter(|folder| !folder.is_empty())
            .unwrap_or(DATA_FOLDER);
        for input in &submission.inputs {
            self.upload(&working_dir, input, Some(subfolder), credentials)
                .await?;
        }
        if client_stage_in {
            self.post_action(&handle.job_url, "start", credentials)
                .await?;
        }
        handle.working_dir = Some(working_dir);
        Ok(handle)
    }

    async fn list(
        &self,
        handle: &RemoteJobHandle,
        subdirectory: &str,
        credentials: &Credentials,
    ) -> GatewayResult<BTreeMap<String, RemoteEntry>> {
        let working_dir = self.working_dir(handle, credentials).await?;
        let base = format!("/{}", subdirectory.trim_start_matches('/'));
        let listing: DirectoryListing = self
            .get_json(&format!("{working_dir}/files{base}"), credentials)
            .await?;

        Ok(listing
            .content
            .into_iter()
            .map(|(path, meta)| {
                let absolute = format!("/{}", path.trim_start_matches('/'));
                let relative = absolute[1..].to_string();
                let entry = RemoteEntry {
                    path: relative.clone(),
                    url: format!("{working_dir}/files{absolute}"),
                    kind: if meta.is_directory {
                        RemoteEntryKind::Directory
                    } else {
                        RemoteEntryKind::File
                    },
                    size: meta.size,
                };
                (relative, entry)
            })
            .collect())
    }

    async fn fetch(
        &self,
        entry: &RemoteEntry,
        local_path: &Path,
        credentials: &Credentials,
    ) -> GatewayResult<u64> {
        let request = self
            .request(self.client.get(&entry.url), credentials)
            .header(ACCEPT, OCTET_STREAM)
            .send();
        // Headers must arrive within the call timeout; the body is bounded per chunk below.
        let response = tokio::time::timeout(self.call_timeout, async {
            let response = request
                .await
                .map_err(|err| classify_send_error(err, &entry.url))?;
            ensure_success(response, &entry.url).await
        })
        .await
        .map_err(|_| GatewayError::Timeout {
            url: entry.url.clone(),
        })??;

        let io_err = |source| GatewayError::Io {
            path: local_path.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(local_path).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        // Files can be large; bound the wait for each chunk instead of the whole body.
        loop {
            let next = tokio::time::timeout(self.call_timeout, stream.next())
                .await
                .map_err(|_| GatewayError::Timeout {
                    url: entry.url.clone(),
                })?;
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;
        Ok(written)
    }
}

/// Job description as posted: inputs imply client stage-in, which keeps the
/// job from starting until uploads are done.
fn job_description(submission: &JobSubmission) -> serde_json::Value {
    let mut description = submission.job_config.clone();
    if let Some(map) = description.as_object_mut() {
        let requested = map.get(CLIENT_STAGE_IN) == Some(&serde_json::Value::Bool(true));
        if !submission.inputs.is_empty() || requested {
            map.insert(CLIENT_STAGE_IN.into(), serde_json::Value::from("true"));
        }
    }
    description
}

/// Inputs can be several gigabytes; the deadline grows with the file.
fn upload_deadline(call_timeout: Duration, size: u64) -> Duration {
    call_timeout + Duration::from_secs(size / MIN_UPLOAD_BYTES_PER_SEC)
}

fn file_chunks(
    file: tokio::fs::File,
) -> impl futures::Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    futures::stream::try_unfold(file, |mut file| async move {
        let mut chunk = vec![0u8; UPLOAD_CHUNK_BYTES];
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        chunk.truncate(read);
        Ok(Some((chunk, file)))
    })
}

fn classify_send_error(err: reqwest::Error, url: &str) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout {
            url: url.to_string(),
        }
    } else {
        GatewayError::Http(err)
    }
}

async fn ensure_success(response: Response, url: &str) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        status: status.as_u16(),
        url: url.to_string(),
        body,
    })
}

#[async_trait]
impl RemoteExecutionPort for UnicoreGateway {
    #[tracing::instrument(name = "unicore", level = "debug", skip_all, fields(op = "submit"))]
    async fn submit(
        &self,
        submission: &JobSubmission,
        credentials: &Credentials,
    ) -> AppResult<RemoteJobHandle> {
        self.submit_job(submission, credentials)
            .await
            .map_err(|err| err.into_app(RemoteCall::Submit, "job submission"))
    }

    #[tracing::instrument(name = "unicore", level = "debug", skip_all, fields(op = "poll", job_url = %handle.job_url))]
    async fn poll_status(
        &self,
        handle: &RemoteJobHandle,
        credentials: &Credentials,
    ) -> AppResult<JobPoll> {
        let props = self
            .job_properties(&handle.job_url, credentials)
            .await
            .map_err(|err| err.into_app(RemoteCall::Poll, &handle.job_url))?;
        let status = RemoteJobStatus::from_str(&props.status).unwrap_or_else(|reason| {
            tracing::warn!(%reason, "treating job as still running");
            RemoteJobStatus::Undefined
        });
        Ok(JobPoll::from(status))
    }

    #[tracing::instrument(name = "unicore", level = "debug", skip_all, fields(op = "list", job_url = %handle.job_url, %subdirectory))]
    async fn list_remote_files(
        &self,
        handle: &RemoteJobHandle,
        subdirectory: &str,
        credentials: &Credentials,
    ) -> AppResult<BTreeMap<String, RemoteEntry>> {
        self.list(handle, subdirectory, credentials)
            .await
            .map_err(|err| err.into_app(RemoteCall::List, subdirectory))
    }

    #[tracing::instrument(name = "unicore", level = "debug", skip_all, fields(op = "download", url = %entry.url))]
    async fn download(
        &self,
        entry: &RemoteEntry,
        local_path: &Path,
        credentials: &Credentials,
    ) -> AppResult<()> {
        let written = self
            .fetch(entry, local_path, credentials)
            .await
            .map_err(|err| err.into_app(RemoteCall::Download, &entry.url))?;
        tracing::debug!(bytes = written, path = %local_path.display(), "downloaded");
        Ok(())
    }

    #[tracing::instrument(name = "unicore", level = "debug", skip_all, fields(op = "abort", job_url = %handle.job_url))]
    async fn abort(&self, handle: &RemoteJobHandle, credentials: &Credentials) -> AppResult<()> {
        self.post_action(&handle.job_url, "abort", credentials)
            .await
            .map_err(|err| err.into_app(RemoteCall::Abort, &handle.job_url))
    }
}
