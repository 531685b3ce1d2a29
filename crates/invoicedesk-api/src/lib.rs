// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use invoicedesk_app::{
    HealthStatus, Invoice, InvoiceId, InvoiceItem, InvoicePatch, ReviewFilter, UploadReceipt,
};
use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const PROXY_PREFIX: &str = "/api";
pub const UPLOAD_FIELD: &str = "file";
const PDF_MIME: &str = "application/pdf";

/// Picks the API base: an explicitly configured origin, else the
/// same-origin proxy prefix under `proxy_origin`.
pub fn resolve_base_url(configured: Option<&str>, proxy_origin: &str) -> String {
    match configured.map(str::trim).filter(|value| !value.is_empty()) {
        Some(origin) => origin.trim_end_matches('/').to_owned(),
        None => format!("{}{PROXY_PREFIX}", proxy_origin.trim().trim_end_matches('/')),
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    timeout: Duration,
    http: HttpClient,
}

impl Client {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            bail!("api.base_url must not be empty");
        }
        Url::parse(&base_url)
            .with_context(|| format!("api base url {base_url:?} is not an absolute URL"))?;

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url,
            timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn health(&self) -> Result<HealthStatus> {
        let response = self.send(self.http.get(self.endpoint("/")), "GET", "/")?;
        response.json().context("decode health response")
    }

    pub fn list_invoices(&self, filter: ReviewFilter) -> Result<Vec<Invoice>> {
        let mut request = self.http.get(self.endpoint("/invoices"));
        if let Some(value) = filter.query_value() {
            request = request.query(&[("needs_review", value)]);
        }
        let response = self.send(request, "GET", "/invoices")?;
        let invoices: Vec<Invoice> = decode_json(response, "decode invoice list")?;
        debug!(count = invoices.len(), filter = filter.as_str(), "invoices loaded");
        Ok(invoices)
    }

    pub fn get_invoice(&self, id: InvoiceId) -> Result<Invoice> {
        let path = format!("/invoices/{id}");
        let response = self.send(self.http.get(self.endpoint(&path)), "GET", &path)?;
        decode_json(response, "decode invoice")
    }

    pub fn patch_invoice(&self, id: InvoiceId, patch: &InvoicePatch) -> Result<Invoice> {
        let path = format!("/invoices/{id}");
        debug!(invoice = id.get(), fields = ?patch.field_names(), "patching invoice");
        let response = self.send(
            self.http.patch(self.endpoint(&path)).json(patch),
            "PATCH",
            &path,
        )?;
        decode_json(response, "decode updated invoice")
    }

    pub fn delete_invoice(&self, id: InvoiceId) -> Result<()> {
        let path = format!("/invoices/{id}");
        self.send(self.http.delete(self.endpoint(&path)), "DELETE", &path)?;
        Ok(())
    }

    /// Posts the file as multipart field `file`. The Content-Type header is
    /// left to reqwest so the boundary matches the body.
    pub fn upload_invoice(&self, path: &Path) -> Result<UploadReceipt> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("read upload file {} -- check the path", path.display()))?;
        if !metadata.is_file() {
            bail!("upload path {} is not a file", path.display());
        }

        let part = Part::file(path)
            .with_context(|| format!("open upload file {}", path.display()))?
            .mime_str(PDF_MIME)
            .context("set upload MIME type")?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let response = self.send(
            self.http.post(self.endpoint("/upload")).multipart(form),
            "POST",
            "/upload",
        )?;
        let body = response.text().context("read upload response")?;
        let raw = if body.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body))
        };
        Ok(UploadReceipt::from_json(raw))
    }

    pub fn list_items(&self, id: InvoiceId) -> Result<Vec<InvoiceItem>> {
        let path = format!("/invoices/{id}/items");
        let response = self.send(self.http.get(self.endpoint(&path)), "GET", &path)?;
        let items: Option<Vec<InvoiceItem>> = decode_json(response, "decode invoice items")?;
        Ok(items.unwrap_or_default())
    }

    /// URL of the stored source document, used both for opening it in a
    /// viewer and for downloading it.
    pub fn file_url(&self, source_file: &str) -> Result<String> {
        let reference = source_file.trim();
        if reference.is_empty() {
            bail!("invoice has no source file");
        }
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("parse api base url {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("api base url {} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .push("files")
            .push(reference);
        Ok(url.into())
    }

    /// Streams the source document into `dir`, returning the written path.
    pub fn download_file(&self, source_file: &str, dir: &Path) -> Result<PathBuf> {
        let url = self.file_url(source_file)?;
        let mut response = self.send(self.http.get(&url), "GET", "/files")?;

        let file_name = Path::new(source_file)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "invoice.pdf".to_owned());
        fs::create_dir_all(dir)
            .with_context(|| format!("create download directory {}", dir.display()))?;
        let target = dir.join(file_name);
        let mut file = File::create(&target)
            .with_context(|| format!("create download file {}", target.display()))?;
        io::copy(&mut response, &mut file)
            .with_context(|| format!("write download file {}", target.display()))?;
        Ok(target)
    }

    fn endpoint(&self, path: &str) -> String {
        if path == "/" {
            format!("{}/", self.base_url)
        } else {
            format!("{}{path}", self.base_url)
        }
    }

    fn send(&self, request: RequestBuilder, method: &str, path: &str) -> Result<Response> {
        debug!(method, path, "api request");
        let response = request
            .send()
            .map_err(|error| connection_error(&self.base_url, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(method, path, status = status.as_u16(), "api request failed");
            return Err(clean_error_response(status, &body));
        }
        Ok(response)
    }
}

fn decode_json<T: DeserializeOwned>(response: Response, what: &'static str) -> Result<T> {
    let body = response.text().with_context(|| format!("{what}: read body"))?;
    serde_json::from_str(&body).context(what)
}

fn connection_error(base_url: &str, error: reqwest::Error) -> anyhow::Error {
    warn!(base_url, %error, "api unreachable");
    anyhow!(
        "cannot reach {} -- check that the invoice server is running and api.base_url is right ({})",
        base_url,
        error
    )
}

#[derive(Debug, Deserialize)]
struct DetailEnvelope {
    detail: Option<serde_json::Value>,
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<DetailEnvelope>(body)
        && let Some(detail) = parsed.detail
    {
        let message = match detail {
            serde_json::Value::String(text) => text,
            serde_json::Value::Array(entries) => entries
                .iter()
                .filter_map(|entry| entry.get("msg").and_then(serde_json::Value::as_str))
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        };
        if !message.is_empty() {
            return anyhow!("server error ({}): {}", status.as_u16(), message);
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() && trimmed.len() < 100 && !trimmed.contains('{') {
        return anyhow!("server error ({}): {}", status.as_u16(), trimmed);
    }

    anyhow!("server returned {}", status.as_u16())
}
