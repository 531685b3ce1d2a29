// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use invoicedesk_api::Client;
use invoicedesk_app::{Invoice, InvoiceId, InvoiceItem, InvoicePatch, ReviewFilter, UploadReceipt};
use invoicedesk_tui::InternalEvent;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::Sender;
use std::thread;
use tracing::{debug, info, warn};

pub struct ApiRuntime {
    client: Client,
    download_dir: PathBuf,
}

impl ApiRuntime {
    pub fn new(client: Client, download_dir: PathBuf) -> Self {
        Self {
            client,
            download_dir,
        }
    }
}

/// Downloads land in the user's download folder, else home, else the
/// working directory.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl invoicedesk_tui::AppRuntime for ApiRuntime {
    fn load_invoices(&mut self, filter: ReviewFilter) -> Result<Vec<Invoice>> {
        self.client.list_invoices(filter)
    }

    fn patch_invoice(&mut self, id: InvoiceId, patch: &InvoicePatch) -> Result<()> {
        self.client.patch_invoice(id, patch).map(|_| ())
    }

    fn delete_invoice(&mut self, id: InvoiceId) -> Result<()> {
        self.client.delete_invoice(id)
    }

    fn upload_invoice(&mut self, path: &Path) -> Result<UploadReceipt> {
        self.client.upload_invoice(path)
    }

    fn load_items(&mut self, id: InvoiceId) -> Result<Vec<InvoiceItem>> {
        self.client.list_items(id)
    }

    fn file_url(&self, source_file: &str) -> Result<String> {
        self.client.file_url(source_file)
    }

    fn open_external(&mut self, target: &str) -> Result<()> {
        open_in_system_viewer(target)
    }

    fn download_file(&mut self, source_file: &str) -> Result<PathBuf> {
        let written = self.client.download_file(source_file, &self.download_dir)?;
        info!(path = %written.display(), "document downloaded");
        Ok(written)
    }

    fn spawn_items_fetch(
        &mut self,
        request_id: u64,
        invoice_id: InvoiceId,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let client = self.client.clone();
        spawn_worker(format!("items-{invoice_id}"), tx, move || {
            InternalEvent::ItemsLoaded {
                request_id,
                invoice_id,
                result: client
                    .list_items(invoice_id)
                    .map_err(|error| error.to_string()),
            }
        })
    }

    fn spawn_list_load(
        &mut self,
        request_id: u64,
        filter: ReviewFilter,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let client = self.client.clone();
        spawn_worker(format!("list-{request_id}"), tx, move || {
            InternalEvent::ListLoaded {
                request_id,
                filter,
                result: client
                    .list_invoices(filter)
                    .map_err(|error| error.to_string()),
            }
        })
    }

    fn spawn_save(
        &mut self,
        invoice_id: InvoiceId,
        patch: InvoicePatch,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let client = self.client.clone();
        spawn_worker(format!("save-{invoice_id}"), tx, move || {
            InternalEvent::Saved {
                invoice_id,
                result: client
                    .patch_invoice(invoice_id, &patch)
                    .map(|_| ())
                    .map_err(|error| error.to_string()),
            }
        })
    }

    fn spawn_delete(&mut self, invoice_id: InvoiceId, tx: Sender<InternalEvent>) -> Result<()> {
        let client = self.client.clone();
        spawn_worker(format!("delete-{invoice_id}"), tx, move || {
            InternalEvent::Deleted {
                invoice_id,
                result: client
                    .delete_invoice(invoice_id)
                    .map_err(|error| error.to_string()),
            }
        })
    }

    fn spawn_upload(&mut self, path: PathBuf, tx: Sender<InternalEvent>) -> Result<()> {
        let client = self.client.clone();
        spawn_worker("upload".to_owned(), tx, move || {
            let result = client
                .upload_invoice(&path)
                .map_err(|error| error.to_string());
            InternalEvent::Uploaded { path, result }
        })
    }
}

/// Runs one blocking API call on its own named thread and posts the outcome
/// back to the UI loop.
fn spawn_worker<F>(name: String, tx: Sender<InternalEvent>, job: F) -> Result<()>
where
    F: FnOnce() -> InternalEvent + Send + 'static,
{
    let worker = name.clone();
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            if tx.send(job()).is_err() {
                debug!(worker = %worker, "response dropped; UI already gone");
            }
        })
        .with_context(|| format!("spawn {name} thread"))?;
    Ok(())
}

fn opener_command(target: &str) -> Command {
    #[cfg(target_os = "macos")]
    {
        let mut command = Command::new("open");
        command.arg(target);
        command
    }

    #[cfg(target_os = "windows")]
    {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", "", target]);
        command
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let mut command = Command::new("xdg-open");
        command.arg(target);
        command
    }
}

/// Hands the URL to the desktop opener. Output is discarded so it cannot
/// scribble over the terminal UI; the child is reaped off-thread.
fn open_in_system_viewer(target: &str) -> Result<()> {
    let mut command = opener_command(target);
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|error| anyhow!("launch {program} for {target}: {error}"))?;

    let url = target.to_owned();
    thread::spawn(move || match child.wait() {
        Ok(status) if !status.success() => {
            warn!(program, url, %status, "document opener exited with failure");
        }
        Ok(_) => {}
        Err(error) => warn!(program, url, %error, "wait for document opener"),
    });
    Ok(())
}
