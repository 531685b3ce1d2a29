// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use invoicedesk_app::{
    AppCommand, AppEvent, AppMode, AppState, DraftField, EditSession, Invoice, InvoiceId,
    InvoiceItem, InvoicePatch, ItemsPanel, ItemsState, ListOutcome, PreviewState, PreviewTab,
    ReviewFilter, SortDirection, SortKey, Toast, ToastKind, UploadReceipt,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Tabs, Wrap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const PAGE_ROWS: usize = 10;
const EMPTY_CELL: &str = "-";
const SORT_ASC_MARK: &str = "▲";
const SORT_DESC_MARK: &str = "▼";

/// Everything the UI needs from the outside world. The CLI backs it with the
/// HTTP client; tests back it with a recording fake.
pub trait AppRuntime {
    fn load_invoices(&mut self, filter: ReviewFilter) -> Result<Vec<Invoice>>;
    fn patch_invoice(&mut self, id: InvoiceId, patch: &InvoicePatch) -> Result<()>;
    fn delete_invoice(&mut self, id: InvoiceId) -> Result<()>;
    fn upload_invoice(&mut self, path: &Path) -> Result<UploadReceipt>;
    fn load_items(&mut self, id: InvoiceId) -> Result<Vec<InvoiceItem>>;
    fn file_url(&self, source_file: &str) -> Result<String>;
    fn open_external(&mut self, target: &str) -> Result<()>;
    fn download_file(&mut self, source_file: &str) -> Result<PathBuf>;

    /// Fetches line items and reports back through `tx`. The default runs
    /// inline; runtimes with real I/O move the call off the UI thread.
    fn spawn_items_fetch(
        &mut self,
        request_id: u64,
        invoice_id: InvoiceId,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let result = self
            .load_items(invoice_id)
            .map_err(|error| error.to_string());
        report(
            &tx,
            InternalEvent::ItemsLoaded {
                request_id,
                invoice_id,
                result,
            },
        )
    }

    /// Fetches the invoice list for `filter`; the answer carries `request_id`
    /// so only the newest request is applied.
    fn spawn_list_load(
        &mut self,
        request_id: u64,
        filter: ReviewFilter,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let result = self
            .load_invoices(filter)
            .map_err(|error| error.to_string());
        report(
            &tx,
            InternalEvent::ListLoaded {
                request_id,
                filter,
                result,
            },
        )
    }

    fn spawn_save(
        &mut self,
        invoice_id: InvoiceId,
        patch: InvoicePatch,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let result = self
            .patch_invoice(invoice_id, &patch)
            .map_err(|error| error.to_string());
        report(&tx, InternalEvent::Saved { invoice_id, result })
    }

    fn spawn_delete(&mut self, invoice_id: InvoiceId, tx: Sender<InternalEvent>) -> Result<()> {
        let result = self
            .delete_invoice(invoice_id)
            .map_err(|error| error.to_string());
        report(&tx, InternalEvent::Deleted { invoice_id, result })
    }

    fn spawn_upload(&mut self, path: PathBuf, tx: Sender<InternalEvent>) -> Result<()> {
        let result = self
            .upload_invoice(&path)
            .map_err(|error| error.to_string());
        report(&tx, InternalEvent::Uploaded { path, result })
    }
}

fn report(tx: &Sender<InternalEvent>, event: InternalEvent) -> Result<()> {
    tx.send(event)
        .map_err(|_| anyhow::anyhow!("internal event channel closed"))
}

#[derive(Debug, Clone, PartialEq)]
pub enum InternalEvent {
    ClearStatus {
        token: u64,
    },
    DelayedReload,
    ItemsLoaded {
        request_id: u64,
        invoice_id: InvoiceId,
        result: Result<Vec<InvoiceItem>, String>,
    },
    ListLoaded {
        request_id: u64,
        filter: ReviewFilter,
        result: Result<Vec<Invoice>, String>,
    },
    Saved {
        invoice_id: InvoiceId,
        result: Result<(), String>,
    },
    Deleted {
        invoice_id: InvoiceId,
        result: Result<(), String>,
    },
    Uploaded {
        path: PathBuf,
        result: Result<UploadReceipt, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub toast: Duration,
    pub upload_reload_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            toast: Duration::from_millis(2500),
            upload_reload_delay: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
struct ViewData {
    selected_row: usize,
    help_visible: bool,
    status_token: u64,
    timings: Timings,
    /// List request whose arrival should be announced with a row count.
    announce_list: Option<u64>,
    upload_in_flight: Option<PathBuf>,
}

pub fn run_app<R: AppRuntime>(state: &mut AppState, runtime: &mut R, timings: Timings) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let mut view_data = ViewData {
        timings,
        ..ViewData::default()
    };
    let (internal_tx, internal_rx) = mpsc::channel();

    dispatch_and_follow(state, runtime, &mut view_data, &internal_tx, AppCommand::ReloadList);

    let mut result = Ok(());
    loop {
        process_internal_events(state, runtime, &mut view_data, &internal_tx, &internal_rx);

        if let Err(error) = terminal.draw(|frame| render(frame, state, &view_data)) {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = match event::poll(Duration::from_millis(120)).context("poll event") {
            Ok(has_event) => has_event,
            Err(error) => {
                result = Err(error);
                break;
            }
        };
        if has_event {
            match event::read().context("read event") {
                Ok(Event::Key(key)) => {
                    if handle_key_event(state, runtime, &mut view_data, &internal_tx, key) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_internal_events<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    rx: &Receiver<InternalEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        handle_internal_event(state, runtime, view_data, tx, event);
    }
}

fn handle_internal_event<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    event: InternalEvent,
) {
    match event {
        InternalEvent::ClearStatus { token } if token == view_data.status_token => {
            state.dispatch(AppCommand::ClearStatus);
        }
        InternalEvent::ClearStatus { .. } => {}
        InternalEvent::DelayedReload => {
            dispatch_and_follow(state, runtime, view_data, tx, AppCommand::ReloadList);
        }
        InternalEvent::ItemsLoaded {
            request_id,
            invoice_id,
            result,
        } => {
            if !state.apply_items(request_id, invoice_id, result) {
                debug!(request_id, invoice = invoice_id.get(), "dropped stale items response");
            }
        }
        InternalEvent::ListLoaded {
            request_id,
            filter,
            result,
        } => finish_list_load(state, view_data, tx, request_id, filter, result),
        InternalEvent::Saved { invoice_id, result } => {
            finish_save(state, runtime, view_data, tx, invoice_id, result);
        }
        InternalEvent::Deleted { invoice_id, result } => {
            finish_delete(state, runtime, view_data, tx, invoice_id, result);
        }
        InternalEvent::Uploaded { path, result } => {
            finish_upload(state, runtime, view_data, tx, path, result);
        }
    }
}

fn schedule_status_clear(internal_tx: &Sender<InternalEvent>, token: u64, after: Duration) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(after);
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn schedule_delayed_reload(internal_tx: &Sender<InternalEvent>, after: Duration) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(after);
        let _ = sender.send(InternalEvent::DelayedReload);
    });
}

fn arm_status_clear(view_data: &mut ViewData, internal_tx: &Sender<InternalEvent>) {
    view_data.status_token = view_data.status_token.saturating_add(1);
    schedule_status_clear(internal_tx, view_data.status_token, view_data.timings.toast);
}

fn emit_status(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    toast: Toast,
) {
    state.dispatch(AppCommand::ShowToast(toast));
    arm_status_clear(view_data, internal_tx);
}

fn dispatch_and_follow<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    command: AppCommand,
) {
    let events = state.dispatch(command);
    for event in events {
        match event {
            AppEvent::FilterRequested(filter) => {
                let message = format!("filter: {} (loading)", filter.label());
                emit_status(state, view_data, internal_tx, Toast::info(message));
            }
            AppEvent::ListRequested { request_id, filter } => {
                if let Err(error) = runtime.spawn_list_load(request_id, filter, internal_tx.clone())
                {
                    finish_list_load(
                        state,
                        view_data,
                        internal_tx,
                        request_id,
                        filter,
                        Err(error.to_string()),
                    );
                }
            }
            AppEvent::SearchChanged(_) | AppEvent::SortChanged(_) => {
                view_data.selected_row = 0;
            }
            AppEvent::StatusUpdated(_) => arm_status_clear(view_data, internal_tx),
            AppEvent::ItemsRequested {
                request_id,
                invoice_id,
            } => {
                if let Err(error) = runtime.spawn_items_fetch(request_id, invoice_id, internal_tx.clone())
                {
                    state.apply_items(request_id, invoice_id, Err(error.to_string()));
                }
            }
            AppEvent::EditSubmitted(draft) => {
                let invoice_id = draft.invoice_id;
                if let Err(error) =
                    runtime.spawn_save(invoice_id, draft.to_patch(), internal_tx.clone())
                {
                    finish_save(
                        state,
                        runtime,
                        view_data,
                        internal_tx,
                        invoice_id,
                        Err(error.to_string()),
                    );
                }
            }
            AppEvent::DeleteConfirmed(invoice_id) => {
                if let Err(error) = runtime.spawn_delete(invoice_id, internal_tx.clone()) {
                    finish_delete(
                        state,
                        runtime,
                        view_data,
                        internal_tx,
                        invoice_id,
                        Err(error.to_string()),
                    );
                }
            }
            _ => {}
        }
    }
}

/// Applies a finished list fetch. Answers to superseded requests are dropped;
/// on failure the previous rows, filter and timestamp stay as they were.
fn finish_list_load(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    request_id: u64,
    filter: ReviewFilter,
    result: Result<Vec<Invoice>, String>,
) {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let outcome = state.apply_list(request_id, filter, result, now);
    let announce = view_data.announce_list == Some(request_id);
    if outcome != ListOutcome::Stale && announce {
        view_data.announce_list = None;
    }
    match outcome {
        ListOutcome::Stale => {
            debug!(request_id, filter = filter.as_str(), "dropped stale list response");
        }
        ListOutcome::Loaded {
            count,
            filter_changed,
        } => {
            debug!(count, filter = filter.as_str(), "list reloaded");
            if filter_changed {
                view_data.selected_row = 0;
                let message = format!("filter: {} ({count} invoices)", filter.label());
                emit_status(state, view_data, internal_tx, Toast::info(message));
            } else if announce {
                let message = format!("{count} invoices loaded");
                emit_status(state, view_data, internal_tx, Toast::info(message));
            }
        }
        ListOutcome::Failed(error) => {
            warn!(%error, filter = filter.as_str(), "list reload failed");
            emit_status(
                state,
                view_data,
                internal_tx,
                Toast::error(format!("could not load invoices: {error}")),
            );
        }
    }
    clamp_selection(state, view_data);
}

fn finish_save<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    id: InvoiceId,
    result: Result<(), String>,
) {
    match result {
        Ok(()) => {
            info!(invoice = id.get(), "invoice saved");
            emit_status(
                state,
                view_data,
                internal_tx,
                Toast::success(format!("invoice {id} saved")),
            );
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::ReloadList);
        }
        Err(error) => emit_status(
            state,
            view_data,
            internal_tx,
            Toast::error(format!("save failed: {error}")),
        ),
    }
}

fn finish_delete<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    id: InvoiceId,
    result: Result<(), String>,
) {
    match result {
        Ok(()) => {
            info!(invoice = id.get(), "invoice deleted");
            emit_status(
                state,
                view_data,
                internal_tx,
                Toast::success(format!("invoice {id} deleted")),
            );
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::ReloadList);
        }
        Err(error) => emit_status(
            state,
            view_data,
            internal_tx,
            Toast::error(format!("delete failed: {error}")),
        ),
    }
}

fn submit_upload<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    if view_data.upload_in_flight.is_some() {
        emit_status(
            state,
            view_data,
            internal_tx,
            Toast::info("an upload is already running"),
        );
        return;
    }
    let Some(path) = state.selected_upload() else {
        emit_status(
            state,
            view_data,
            internal_tx,
            Toast::info("choose a PDF file first"),
        );
        return;
    };

    view_data.upload_in_flight = Some(path.clone());
    let message = format!("uploading {}...", display_name(&path));
    emit_status(state, view_data, internal_tx, Toast::info(message));
    if let Err(error) = runtime.spawn_upload(path.clone(), internal_tx.clone()) {
        finish_upload(
            state,
            runtime,
            view_data,
            internal_tx,
            path,
            Err(error.to_string()),
        );
    }
}

fn finish_upload<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    path: PathBuf,
    result: Result<UploadReceipt, String>,
) {
    view_data.upload_in_flight = None;
    match result {
        Ok(receipt) => {
            let name = display_name(&path);
            let message = match receipt.invoice {
                Some(invoice) => format!("uploaded {name} as invoice {}", invoice.id),
                None => format!("uploaded {name}"),
            };
            info!(file = %path.display(), "upload accepted");
            if state.selected_upload().as_deref() == Some(path.as_path()) {
                state.dispatch(AppCommand::ClearUploadSelection);
            }
            if state.mode == AppMode::Upload {
                state.dispatch(AppCommand::CloseUpload);
            }
            emit_status(state, view_data, internal_tx, Toast::success(message));
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::ReloadList);
            // Extraction may still be settling; look again shortly after.
            schedule_delayed_reload(internal_tx, view_data.timings.upload_reload_delay);
        }
        Err(error) => emit_status(
            state,
            view_data,
            internal_tx,
            Toast::error(format!("upload failed: {error}")),
        ),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn open_document<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let Some(source) = preview_source(state) else {
        emit_status(
            state,
            view_data,
            internal_tx,
            Toast::info("no source document for this invoice"),
        );
        return;
    };
    let opened = runtime
        .file_url(&source)
        .and_then(|url| runtime.open_external(&url).map(|()| url));
    let toast = match opened {
        Ok(url) => Toast::info(format!("opened {url}")),
        Err(error) => Toast::error(format!("could not open document: {error}")),
    };
    emit_status(state, view_data, internal_tx, toast);
}

fn download_document<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let Some(source) = preview_source(state) else {
        emit_status(
            state,
            view_data,
            internal_tx,
            Toast::info("no source document for this invoice"),
        );
        return;
    };
    let toast = match runtime.download_file(&source) {
        Ok(path) => Toast::success(format!("saved {}", path.display())),
        Err(error) => Toast::error(format!("download failed: {error}")),
    };
    emit_status(state, view_data, internal_tx, toast);
}

fn preview_source(state: &AppState) -> Option<String> {
    state
        .preview
        .as_ref()
        .and_then(|preview| preview.source_file.clone())
        .filter(|source| !source.trim().is_empty())
}

fn handle_key_event<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    if view_data.help_visible {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('?')) {
            view_data.help_visible = false;
        }
        return false;
    }

    match state.mode {
        AppMode::Nav => return handle_nav_key(state, runtime, view_data, internal_tx, key),
        AppMode::Search => handle_search_key(state, runtime, view_data, internal_tx, key),
        AppMode::Upload => handle_upload_key(state, runtime, view_data, internal_tx, key),
        AppMode::Edit => handle_edit_key(state, runtime, view_data, internal_tx, key),
        AppMode::ConfirmDelete => handle_confirm_key(state, runtime, view_data, internal_tx, key),
        AppMode::Preview => handle_preview_key(state, runtime, view_data, internal_tx, key),
    }
    false
}

fn handle_nav_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    let row_count = state.list.visible().len();
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('j') | KeyCode::Down => move_selection(view_data, row_count, 1),
        KeyCode::Char('k') | KeyCode::Up => move_selection(view_data, row_count, -1),
        KeyCode::PageDown => move_selection(view_data, row_count, PAGE_ROWS as isize),
        KeyCode::PageUp => move_selection(view_data, row_count, -(PAGE_ROWS as isize)),
        KeyCode::Char('g') | KeyCode::Home => view_data.selected_row = 0,
        KeyCode::Char('G') | KeyCode::End => view_data.selected_row = row_count.saturating_sub(1),
        KeyCode::Char('?') => view_data.help_visible = true,
        KeyCode::Char('r') => {
            view_data.announce_list = Some(state.latest_list_request().saturating_add(1));
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::ReloadList);
        }
        KeyCode::Char('f') => {
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::CycleFilter);
        }
        KeyCode::Char('/') => {
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::BeginSearch);
        }
        KeyCode::Char('S') => {
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::ClearSort);
        }
        KeyCode::Char(digit @ '1'..='5') => {
            let index = digit as usize - '1' as usize;
            let command = AppCommand::ToggleSort(SortKey::ALL[index]);
            dispatch_and_follow(state, runtime, view_data, internal_tx, command);
        }
        KeyCode::Char('u') => {
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::OpenUpload);
        }
        KeyCode::Char('e') => {
            with_selected(state, runtime, view_data, internal_tx, AppCommand::OpenEdit);
        }
        KeyCode::Char('d') => {
            with_selected(state, runtime, view_data, internal_tx, AppCommand::RequestDelete);
        }
        KeyCode::Char('p') | KeyCode::Enter => {
            with_selected(state, runtime, view_data, internal_tx, AppCommand::OpenPreview);
        }
        _ => {}
    }
    false
}

fn with_selected<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    command: impl FnOnce(InvoiceId) -> AppCommand,
) {
    match selected_invoice_id(state, view_data) {
        Some(id) => dispatch_and_follow(state, runtime, view_data, internal_tx, command(id)),
        None => emit_status(state, view_data, internal_tx, Toast::info("no invoice selected")),
    }
}

fn handle_search_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Enter => {
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::EndSearch);
        }
        KeyCode::Esc => {
            let clear = AppCommand::SetSearch(String::new());
            dispatch_and_follow(state, runtime, view_data, internal_tx, clear);
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::EndSearch);
        }
        KeyCode::Backspace => {
            let mut term = state.list.search.clone();
            term.pop();
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::SetSearch(term));
        }
        KeyCode::Char(value) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            let mut term = state.list.search.clone();
            term.push(value);
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::SetSearch(term));
        }
        _ => {}
    }
}

fn handle_upload_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Enter => submit_upload(state, runtime, view_data, internal_tx),
        KeyCode::Esc => {
            dispatch_and_follow(state, runtime, view_data, internal_tx, AppCommand::CloseUpload);
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let clear = AppCommand::ClearUploadSelection;
            dispatch_and_follow(state, runtime, view_data, internal_tx, clear);
        }
        KeyCode::Backspace => {
            let mut input = state.upload_input.clone();
            input.pop();
            let command = AppCommand::SetUploadInput(input);
            dispatch_and_follow(state, runtime, view_data, internal_tx, command);
        }
        KeyCode::Char(value) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            let mut input = state.upload_input.clone();
            input.push(value);
            let command = AppCommand::SetUploadInput(input);
            dispatch_and_follow(state, runtime, view_data, internal_tx, command);
        }
        _ => {}
    }
}

fn handle_edit_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let command = match key.code {
        KeyCode::Esc => AppCommand::CloseEdit,
        KeyCode::Enter => AppCommand::SaveEdit,
        KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => AppCommand::SaveEdit,
        KeyCode::Tab | KeyCode::Down => AppCommand::EditNextField,
        KeyCode::BackTab | KeyCode::Up => AppCommand::EditPrevField,
        KeyCode::Backspace => AppCommand::EditBackspace,
        KeyCode::Char(value) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            AppCommand::EditInput(value)
        }
        _ => return,
    };
    dispatch_and_follow(state, runtime, view_data, internal_tx, command);
}

fn handle_confirm_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let command = match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') => AppCommand::ConfirmDelete,
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => AppCommand::CancelDelete,
        _ => return,
    };
    dispatch_and_follow(state, runtime, view_data, internal_tx, command);
}

fn handle_preview_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let current_tab = state.preview.as_ref().map(|preview| preview.tab);
    let command = match key.code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('p') => AppCommand::ClosePreview,
        KeyCode::Char('1') => AppCommand::SelectPreviewTab(PreviewTab::Document),
        KeyCode::Char('2') => AppCommand::SelectPreviewTab(PreviewTab::Items),
        KeyCode::Tab | KeyCode::BackTab | KeyCode::Left | KeyCode::Right => {
            let next = match current_tab {
                Some(PreviewTab::Items) => PreviewTab::Document,
                _ => PreviewTab::Items,
            };
            AppCommand::SelectPreviewTab(next)
        }
        KeyCode::Char('o') => {
            open_document(state, runtime, view_data, internal_tx);
            return;
        }
        KeyCode::Char('w') => {
            download_document(state, runtime, view_data, internal_tx);
            return;
        }
        _ => return,
    };
    dispatch_and_follow(state, runtime, view_data, internal_tx, command);
}

fn move_selection(view_data: &mut ViewData, row_count: usize, delta: isize) {
    if row_count == 0 {
        view_data.selected_row = 0;
        return;
    }
    let max = row_count as isize - 1;
    let next = (view_data.selected_row as isize + delta).clamp(0, max);
    view_data.selected_row = next as usize;
}

fn clamp_selection(state: &AppState, view_data: &mut ViewData) {
    let rows = state.list.visible().len();
    view_data.selected_row = view_data.selected_row.min(rows.saturating_sub(1));
}

fn selected_invoice_id(state: &AppState, view_data: &ViewData) -> Option<InvoiceId> {
    state
        .list
        .visible()
        .get(view_data.selected_row)
        .map(|invoice| invoice.id)
}

fn render(frame: &mut ratatui::Frame<'_>, state: &AppState, view_data: &ViewData) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let header = Paragraph::new(header_text(state))
        .block(Block::default().title("invoicedesk").borders(Borders::ALL));
    frame.render_widget(header, layout[0]);

    render_table(frame, layout[1], state, view_data);

    let status = Paragraph::new(status_text(state))
        .style(status_style(state))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status, layout[2]);

    match state.mode {
        AppMode::Upload => {
            let area = centered_rect(60, 20, frame.area());
            frame.render_widget(Clear, area);
            let prompt = Paragraph::new(upload_prompt_text(state)).block(
                Block::default()
                    .title("upload PDF")
                    .borders(Borders::ALL)
                    .style(Style::default().fg(Color::Cyan)),
            );
            frame.render_widget(prompt, area);
        }
        AppMode::Edit => {
            if let Some(edit) = &state.edit {
                let area = centered_rect(60, 50, frame.area());
                frame.render_widget(Clear, area);
                let form = Paragraph::new(edit_overlay_text(edit)).block(
                    Block::default()
                        .title(format!("edit invoice {}", edit.draft.invoice_id))
                        .borders(Borders::ALL),
                );
                frame.render_widget(form, area);
            }
        }
        AppMode::ConfirmDelete => {
            if let Some(id) = state.pending_delete {
                let area = centered_rect(44, 18, frame.area());
                frame.render_widget(Clear, area);
                let confirm = Paragraph::new(confirm_delete_text(state, id)).block(
                    Block::default()
                        .title("delete")
                        .borders(Borders::ALL)
                        .style(Style::default().fg(Color::Red)),
                );
                frame.render_widget(confirm, area);
            }
        }
        AppMode::Preview => {
            if let Some(preview) = &state.preview {
                render_preview(frame, preview);
            }
        }
        AppMode::Nav | AppMode::Search => {}
    }

    if view_data.help_visible {
        let area = centered_rect(70, 70, frame.area());
        frame.render_widget(Clear, area);
        let help = Paragraph::new(help_overlay_text())
            .block(Block::default().title("help").borders(Borders::ALL));
        frame.render_widget(help, area);
    }
}

fn render_table(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    state: &AppState,
    view_data: &ViewData,
) {
    let visible = state.list.visible();
    if visible.is_empty() {
        let empty = Paragraph::new(empty_list_text(state))
            .block(Block::default().borders(Borders::ALL).title("invoices"));
        frame.render_widget(empty, area);
        return;
    }

    let header = Row::new(COLUMNS.iter().map(|column| {
        Cell::from(column_header(column, state)).style(
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
    }));

    let rows = visible.iter().enumerate().map(|(index, invoice)| {
        let mut style = Style::default();
        if invoice.review_status() == invoicedesk_app::ReviewStatus::NeedsReview {
            style = style.fg(Color::Yellow);
        }
        if index == view_data.selected_row {
            style = style.bg(Color::DarkGray).add_modifier(Modifier::BOLD);
        }
        Row::new(table_row_cells(invoice)).style(style)
    });

    let widths = [
        Constraint::Length(6),
        Constraint::Min(16),
        Constraint::Min(10),
        Constraint::Length(12),
        Constraint::Length(14),
        Constraint::Length(6),
        Constraint::Length(7),
        Constraint::Min(10),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .column_spacing(1)
        .block(
            Block::default()
                .title(format!("invoices ({})", visible.len()))
                .borders(Borders::ALL),
        );
    frame.render_widget(table, area);
}

fn render_preview(frame: &mut ratatui::Frame<'_>, preview: &PreviewState) {
    let area = centered_rect(80, 80, frame.area());
    frame.render_widget(Clear, area);
    let outer = Block::default()
        .title(format!("preview: {}", preview.title))
        .borders(Borders::ALL);
    let inner = outer.inner(area);
    frame.render_widget(outer, area);

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(inner);

    let selected = match preview.tab {
        PreviewTab::Document => 0,
        PreviewTab::Items => 1,
    };
    let tabs = Tabs::new(vec![PreviewTab::Document.label(), PreviewTab::Items.label()])
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .select(selected);
    frame.render_widget(tabs, parts[0]);

    let body = match preview.tab {
        PreviewTab::Document => document_tab_text(preview),
        PreviewTab::Items => match &preview.items {
            Some(panel) => items_panel_text(panel),
            None => String::new(),
        },
    };
    frame.render_widget(Paragraph::new(body).wrap(Wrap { trim: false }), parts[1]);
}

const COLUMNS: [&str; 8] = [
    "id", "supplier", "number", "date", "total", "conf", "status", "document",
];

fn column_sort_key(column: &str) -> Option<SortKey> {
    match column {
        "id" => Some(SortKey::Id),
        "supplier" => Some(SortKey::SupplierName),
        "date" => Some(SortKey::InvoiceDate),
        "total" => Some(SortKey::TotalAmount),
        "conf" => Some(SortKey::ExtractionConfidence),
        _ => None,
    }
}

fn column_header(column: &str, state: &AppState) -> String {
    match (column_sort_key(column), state.list.sort) {
        (Some(key), Some(spec)) if spec.key == key => {
            let mark = match spec.direction {
                SortDirection::Asc => SORT_ASC_MARK,
                SortDirection::Desc => SORT_DESC_MARK,
            };
            format!("{column} {mark}")
        }
        _ => column.to_owned(),
    }
}

fn table_row_cells(invoice: &Invoice) -> Vec<String> {
    vec![
        invoice.id.to_string(),
        text_or_dash(invoice.supplier_name.as_deref()),
        text_or_dash(invoice.invoice_number.as_deref()),
        text_or_dash(invoice.invoice_date.as_deref()),
        format_amount(invoice.total_amount, invoice.currency.as_deref()),
        invoice
            .extraction_confidence
            .map(|value| format!("{value:.0}"))
            .unwrap_or_else(|| EMPTY_CELL.to_owned()),
        invoice.review_status().label().to_owned(),
        text_or_dash(invoice.source_file.as_deref()),
    ]
}

fn text_or_dash(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => text.to_owned(),
        _ => EMPTY_CELL.to_owned(),
    }
}

fn format_amount(amount: Option<f64>, currency: Option<&str>) -> String {
    match (amount, currency) {
        (Some(amount), Some(currency)) => format!("{amount:.2} {currency}"),
        (Some(amount), None) => format!("{amount:.2}"),
        (None, _) => EMPTY_CELL.to_owned(),
    }
}

fn format_optional_number(value: Option<f64>) -> String {
    value
        .map(|value| value.to_string())
        .unwrap_or_else(|| EMPTY_CELL.to_owned())
}

fn header_text(state: &AppState) -> String {
    let sort = match state.list.sort {
        Some(spec) => format!("{} {}", spec.key.label(), spec.direction.as_str()),
        None => "server order".to_owned(),
    };
    let search = if state.mode == AppMode::Search {
        format!("/{}_", state.list.search)
    } else if state.list.search.is_empty() {
        EMPTY_CELL.to_owned()
    } else {
        state.list.search.clone()
    };
    let loaded = state
        .list
        .last_loaded_label()
        .unwrap_or_else(|| "never".to_owned());
    format!(
        "filter: {} | search: {search} | sort: {sort} | last updated: {loaded}",
        state.list.filter.label()
    )
}

fn empty_list_text(state: &AppState) -> String {
    if state.list.invoices.is_empty() {
        "no invoices yet -- press u to upload a PDF".to_owned()
    } else {
        "no invoices match the search".to_owned()
    }
}

fn status_text(state: &AppState) -> String {
    if let Some(toast) = &state.toast {
        return toast.message.clone();
    }
    let hints = match state.mode {
        AppMode::Nav => {
            "j/k move | / search | f filter | 1-5 sort S clear | r reload | u upload | e edit | d delete | p preview | ? help | q quit"
        }
        AppMode::Search => "type to search | enter keep | esc clear",
        AppMode::Upload => "type a path | enter upload | ctrl+u clear | esc close",
        AppMode::Edit => "tab/shift+tab field | space toggles reviewed | enter save | esc cancel",
        AppMode::ConfirmDelete => "y delete | n keep",
        AppMode::Preview => "tab switch | o open | w download | esc/q/p close",
    };
    hints.to_owned()
}

fn status_style(state: &AppState) -> Style {
    match state.toast.as_ref().map(|toast| toast.kind) {
        Some(ToastKind::Success) => Style::default().fg(Color::Green),
        Some(ToastKind::Error) => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        Some(ToastKind::Info) => Style::default().fg(Color::Yellow),
        None => Style::default().fg(Color::Gray),
    }
}

fn upload_prompt_text(state: &AppState) -> String {
    let selection = match state.selected_upload() {
        Some(path) => path.display().to_string(),
        None => "(none)".to_owned(),
    };
    format!(
        "path: {}_\n\nselected: {selection}\n\nenter uploads the file as application/pdf",
        state.upload_input
    )
}

fn edit_overlay_text(edit: &EditSession) -> String {
    let active = edit.field();
    let mut lines = Vec::with_capacity(DraftField::ALL.len() + 2);
    for field in DraftField::ALL {
        let cursor = if field == active { ">" } else { " " };
        let mut value = edit.draft.field_text(field);
        if field == active && !field.is_toggle() {
            value.push('_');
        }
        lines.push(format!("{cursor} {:<16} {value}", field.label()));
    }
    lines.push(String::new());
    lines.push("enter save | esc cancel".to_owned());
    lines.join("\n")
}

fn confirm_delete_text(state: &AppState, id: InvoiceId) -> String {
    let title = state
        .list
        .find(id)
        .map(Invoice::display_title)
        .unwrap_or_else(|| format!("invoice #{id}"));
    format!("delete {title}?\n\ny = delete   n = keep")
}

fn document_tab_text(preview: &PreviewState) -> String {
    let Some(source) = preview
        .source_file
        .as_deref()
        .filter(|source| !source.trim().is_empty())
    else {
        return "no source document stored for this invoice".to_owned();
    };
    format!("file: {source}\n\no open in viewer   w download")
}

fn items_panel_text(panel: &ItemsPanel) -> String {
    match panel.state() {
        ItemsState::Loading => "loading items...\n░░░░░░░░\n░░░░░░░░░░░░░░░░\n░░░░░░░░░░".to_owned(),
        ItemsState::Failed(message) => format!("could not load line items: {message}"),
        ItemsState::Loaded(items) if items.is_empty() => "no line items recognized".to_owned(),
        ItemsState::Loaded(items) => {
            let mut lines = vec![format!(
                "{:<4} {:<32} {:>8} {:>12} {:>12}",
                "#", "description", "qty", "unit price", "line total"
            )];
            for item in items {
                lines.push(format!(
                    "{:<4} {:<32} {:>8} {:>12} {:>12}",
                    item.line_index
                        .map(|index| index.to_string())
                        .unwrap_or_else(|| EMPTY_CELL.to_owned()),
                    text_or_dash(item.description.as_deref()),
                    format_optional_number(item.quantity),
                    format_optional_number(item.unit_price),
                    format_optional_number(item.line_total),
                ));
            }
            lines.push(format!(
                "{:>58} {:>12.2}",
                "sum (from items)",
                panel.total().unwrap_or_default()
            ));
            lines.join("\n")
        }
    }
}

fn help_overlay_text() -> &'static str {
    "j/k or arrows  move selection\n\
g/G            first/last row\n\
/              search supplier, number, id\n\
f              cycle review filter (reloads)\n\
1-5            sort by id, supplier, date, total, confidence\n\
S              back to server order\n\
r              reload\n\
u              upload a PDF\n\
e              edit selected invoice\n\
d              delete selected invoice\n\
p / enter      preview document and line items\n\
?              toggle help\n\
q / ctrl+q     quit"
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::{
        AppRuntime, InternalEvent, Timings, ViewData, column_header, dispatch_and_follow,
        document_tab_text, handle_internal_event, handle_key_event, header_text, items_panel_text,
        process_internal_events, status_text, table_row_cells,
    };
    use anyhow::{Result, anyhow};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use invoicedesk_app::{
        AppCommand, AppMode, AppState, Invoice, InvoiceId, InvoiceItem, InvoicePatch, ItemsPanel,
        PreviewTab, ReviewFilter, ToastKind, UploadReceipt,
    };
    use invoicedesk_testkit::{demo_invoices, sample_invoice, sample_item};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::mpsc;
    use std::time::Duration;

    /// Work handed to the runtime while `defer_jobs` holds it back.
    #[derive(Debug, Clone, PartialEq)]
    enum Job {
        List { request_id: u64, filter: ReviewFilter },
        Save { invoice_id: InvoiceId, patch: InvoicePatch },
        Delete { invoice_id: InvoiceId },
        Upload { path: PathBuf },
    }

    #[derive(Debug, Default)]
    struct TestRuntime {
        invoices: Vec<Invoice>,
        items: HashMap<i64, Vec<InvoiceItem>>,
        load_calls: Vec<ReviewFilter>,
        patches: Vec<(InvoiceId, InvoicePatch)>,
        deletes: Vec<InvoiceId>,
        uploads: Vec<PathBuf>,
        opened: Vec<String>,
        downloads: Vec<String>,
        pending_items: Vec<(u64, InvoiceId)>,
        defer_items: bool,
        pending_jobs: Vec<Job>,
        defer_jobs: bool,
        fail_load: Option<String>,
        fail_patch: Option<String>,
        fail_delete: Option<String>,
        fail_upload: Option<String>,
    }

    impl TestRuntime {
        fn with_invoices(invoices: Vec<Invoice>) -> Self {
            Self {
                invoices,
                ..Self::default()
            }
        }

        fn schedule(&mut self, job: Job, tx: mpsc::Sender<InternalEvent>) -> Result<()> {
            if self.defer_jobs {
                self.pending_jobs.push(job);
                return Ok(());
            }
            let event = self.run_job(job);
            tx.send(event).map_err(|_| anyhow!("channel closed"))
        }

        fn run_job(&mut self, job: Job) -> InternalEvent {
            match job {
                Job::List { request_id, filter } => InternalEvent::ListLoaded {
                    request_id,
                    filter,
                    result: self.load_invoices(filter).map_err(|error| error.to_string()),
                },
                Job::Save { invoice_id, patch } => InternalEvent::Saved {
                    invoice_id,
                    result: self
                        .patch_invoice(invoice_id, &patch)
                        .map_err(|error| error.to_string()),
                },
                Job::Delete { invoice_id } => InternalEvent::Deleted {
                    invoice_id,
                    result: self.delete_invoice(invoice_id).map_err(|error| error.to_string()),
                },
                Job::Upload { path } => {
                    let result = self.upload_invoice(&path).map_err(|error| error.to_string());
                    InternalEvent::Uploaded { path, result }
                }
            }
        }
    }

    fn failure(message: &Option<String>) -> Result<()> {
        match message {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    impl AppRuntime for TestRuntime {
        fn load_invoices(&mut self, filter: ReviewFilter) -> Result<Vec<Invoice>> {
            self.load_calls.push(filter);
            failure(&self.fail_load)?;
            Ok(self
                .invoices
                .iter()
                .filter(|invoice| filter.admits(invoice))
                .cloned()
                .collect())
        }

        fn patch_invoice(&mut self, id: InvoiceId, patch: &InvoicePatch) -> Result<()> {
            self.patches.push((id, patch.clone()));
            failure(&self.fail_patch)?;
            if let Some(invoice) = self.invoices.iter_mut().find(|invoice| invoice.id == id) {
                if let Some(name) = &patch.supplier_name {
                    invoice.supplier_name = Some(name.clone());
                }
                if let Some(flag) = patch.needs_review {
                    invoice.needs_review = Some(flag);
                }
            }
            Ok(())
        }

        fn delete_invoice(&mut self, id: InvoiceId) -> Result<()> {
            self.deletes.push(id);
            failure(&self.fail_delete)?;
            self.invoices.retain(|invoice| invoice.id != id);
            Ok(())
        }

        fn upload_invoice(&mut self, path: &Path) -> Result<UploadReceipt> {
            self.uploads.push(path.to_path_buf());
            failure(&self.fail_upload)?;
            let id = self.invoices.len() as i64 + 100;
            let invoice = sample_invoice(id, None, None);
            self.invoices.push(invoice.clone());
            Ok(UploadReceipt::from_json(serde_json::to_value(invoice)?))
        }

        fn load_items(&mut self, id: InvoiceId) -> Result<Vec<InvoiceItem>> {
            Ok(self.items.get(&id.get()).cloned().unwrap_or_default())
        }

        fn file_url(&self, source_file: &str) -> Result<String> {
            Ok(format!("http://127.0.0.1:5173/api/files/{source_file}"))
        }

        fn open_external(&mut self, target: &str) -> Result<()> {
            self.opened.push(target.to_owned());
            Ok(())
        }

        fn download_file(&mut self, source_file: &str) -> Result<PathBuf> {
            self.downloads.push(source_file.to_owned());
            Ok(PathBuf::from("/downloads").join(source_file))
        }

        fn spawn_items_fetch(
            &mut self,
            request_id: u64,
            invoice_id: InvoiceId,
            tx: mpsc::Sender<InternalEvent>,
        ) -> Result<()> {
            if self.defer_items {
                self.pending_items.push((request_id, invoice_id));
                return Ok(());
            }
            let result = self.load_items(invoice_id).map_err(|error| error.to_string());
            tx.send(InternalEvent::ItemsLoaded {
                request_id,
                invoice_id,
                result,
            })
            .map_err(|_| anyhow!("channel closed"))
        }

        fn spawn_list_load(
            &mut self,
            request_id: u64,
            filter: ReviewFilter,
            tx: mpsc::Sender<InternalEvent>,
        ) -> Result<()> {
            self.schedule(Job::List { request_id, filter }, tx)
        }

        fn spawn_save(
            &mut self,
            invoice_id: InvoiceId,
            patch: InvoicePatch,
            tx: mpsc::Sender<InternalEvent>,
        ) -> Result<()> {
            self.schedule(Job::Save { invoice_id, patch }, tx)
        }

        fn spawn_delete(
            &mut self,
            invoice_id: InvoiceId,
            tx: mpsc::Sender<InternalEvent>,
        ) -> Result<()> {
            self.schedule(Job::Delete { invoice_id }, tx)
        }

        fn spawn_upload(&mut self, path: PathBuf, tx: mpsc::Sender<InternalEvent>) -> Result<()> {
            self.schedule(Job::Upload { path }, tx)
        }
    }

    struct Harness {
        state: AppState,
        runtime: TestRuntime,
        view_data: ViewData,
        tx: mpsc::Sender<InternalEvent>,
        rx: mpsc::Receiver<InternalEvent>,
    }

    impl Harness {
        fn new(runtime: TestRuntime) -> Self {
            let (tx, rx) = mpsc::channel();
            let mut harness = Self {
                state: AppState::default(),
                runtime,
                view_data: ViewData {
                    timings: Timings {
                        toast: Duration::from_secs(60),
                        upload_reload_delay: Duration::from_millis(200),
                    },
                    ..ViewData::default()
                },
                tx,
                rx,
            };
            dispatch_and_follow(
                &mut harness.state,
                &mut harness.runtime,
                &mut harness.view_data,
                &harness.tx,
                AppCommand::ReloadList,
            );
            harness.pump();
            harness
        }

        fn press(&mut self, code: KeyCode) -> bool {
            self.press_with(code, KeyModifiers::NONE)
        }

        /// Handles one key, then drains whatever the runtime reported.
        fn press_with(&mut self, code: KeyCode, modifiers: KeyModifiers) -> bool {
            let quit = handle_key_event(
                &mut self.state,
                &mut self.runtime,
                &mut self.view_data,
                &self.tx,
                KeyEvent::new(code, modifiers),
            );
            self.pump();
            quit
        }

        fn type_text(&mut self, text: &str) {
            for value in text.chars() {
                self.press(KeyCode::Char(value));
            }
        }

        fn pump(&mut self) {
            process_internal_events(
                &mut self.state,
                &mut self.runtime,
                &mut self.view_data,
                &self.tx,
                &self.rx,
            );
        }

        fn deliver(&mut self, event: InternalEvent) {
            handle_internal_event(
                &mut self.state,
                &mut self.runtime,
                &mut self.view_data,
                &self.tx,
                event,
            );
            self.pump();
        }

        fn finish_job(&mut self, index: usize) {
            let job = self.runtime.pending_jobs.remove(index);
            let event = self.runtime.run_job(job);
            self.deliver(event);
        }

        fn visible_ids(&self) -> Vec<i64> {
            self.state
                .list
                .visible()
                .iter()
                .map(|invoice| invoice.id.get())
                .collect()
        }

        fn toast(&self) -> Option<(ToastKind, String)> {
            self.state
                .toast
                .as_ref()
                .map(|toast| (toast.kind, toast.message.clone()))
        }
    }

    fn three_unsorted() -> Vec<Invoice> {
        vec![
            sample_invoice(3, Some("Cloudhost AG"), Some(30.0)),
            sample_invoice(1, Some("Acme GmbH"), Some(10.0)),
            sample_invoice(2, Some("Bürobedarf Nord"), None),
        ]
    }

    #[test]
    fn startup_load_fills_list_and_stamps_time() {
        let harness = Harness::new(TestRuntime::with_invoices(demo_invoices()));
        assert_eq!(harness.state.list.invoices.len(), 7);
        assert!(harness.state.list.last_loaded_label().is_some());
        assert!(header_text(&harness.state).contains("last updated: "));
        assert_eq!(harness.runtime.load_calls, vec![ReviewFilter::All]);
    }

    #[test]
    fn filter_key_refetches_with_server_side_filter() {
        let mut harness = Harness::new(TestRuntime::with_invoices(demo_invoices()));
        harness.press(KeyCode::Char('f'));
        assert_eq!(
            harness.runtime.load_calls,
            vec![ReviewFilter::All, ReviewFilter::NeedsReview]
        );
        assert!(
            harness
                .state
                .list
                .invoices
                .iter()
                .all(|invoice| invoice.needs_review == Some(1))
        );
    }

    #[test]
    fn failed_reload_keeps_previous_list_and_reports() {
        let mut harness = Harness::new(TestRuntime::with_invoices(demo_invoices()));
        let stamp = harness.state.list.last_loaded_at;
        harness.runtime.fail_load = Some("connection refused".to_owned());

        harness.press(KeyCode::Char('r'));
        assert_eq!(harness.state.list.invoices.len(), 7);
        assert_eq!(harness.state.list.last_loaded_at, stamp);
        let (kind, message) = harness.toast().expect("error toast");
        assert_eq!(kind, ToastKind::Error);
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn reload_key_announces_row_count() {
        let mut harness = Harness::new(TestRuntime::with_invoices(demo_invoices()));
        harness.press(KeyCode::Char('r'));
        assert_eq!(harness.runtime.load_calls.len(), 2);
        assert_eq!(
            harness.toast(),
            Some((ToastKind::Info, "7 invoices loaded".to_owned()))
        );
    }

    #[test]
    fn failed_filter_reload_keeps_previous_filter() {
        let mut harness = Harness::new(TestRuntime::with_invoices(demo_invoices()));
        harness.runtime.fail_load = Some("connection refused".to_owned());
        harness.press(KeyCode::Char('f'));

        assert_eq!(harness.state.list.filter, ReviewFilter::All);
        assert_eq!(harness.state.pending_filter(), None);
        assert_eq!(harness.state.list.invoices.len(), 7);
        assert_eq!(harness.toast().map(|(kind, _)| kind), Some(ToastKind::Error));

        harness.runtime.fail_load = None;
        harness.press(KeyCode::Char('f'));
        assert_eq!(harness.runtime.load_calls.last(), Some(&ReviewFilter::NeedsReview));
        assert_eq!(harness.state.list.filter, ReviewFilter::NeedsReview);
    }

    #[test]
    fn older_list_response_cannot_overwrite_newer() {
        let mut harness = Harness::new(TestRuntime::with_invoices(demo_invoices()));
        harness.runtime.defer_jobs = true;
        harness.press(KeyCode::Char('f'));
        harness.press(KeyCode::Char('f'));
        assert_eq!(harness.runtime.pending_jobs.len(), 2);
        assert_eq!(harness.state.list.filter, ReviewFilter::All);

        harness.finish_job(1);
        assert_eq!(harness.state.list.filter, ReviewFilter::Reviewed);
        let reviewed = harness.state.list.invoices.clone();
        assert!(reviewed.iter().all(|invoice| invoice.needs_review == Some(0)));

        harness.finish_job(0);
        assert_eq!(harness.state.list.filter, ReviewFilter::Reviewed);
        assert_eq!(harness.state.list.invoices, reviewed);
        assert_eq!(
            harness.runtime.load_calls,
            vec![
                ReviewFilter::All,
                ReviewFilter::Reviewed,
                ReviewFilter::NeedsReview
            ]
        );
    }

    #[test]
    fn search_narrows_rows_without_refetch() {
        let mut harness = Harness::new(TestRuntime::with_invoices(demo_invoices()));
        harness.press(KeyCode::Char('/'));
        assert_eq!(harness.state.mode, AppMode::Search);
        harness.type_text("CLOUD");
        harness.press(KeyCode::Enter);

        assert_eq!(harness.state.mode, AppMode::Nav);
        assert_eq!(harness.visible_ids(), vec![3]);
        assert_eq!(harness.runtime.load_calls.len(), 1);

        harness.press(KeyCode::Char('/'));
        harness.press(KeyCode::Esc);
        assert_eq!(harness.visible_ids().len(), 7);
    }

    #[test]
    fn sort_by_id_ascending_then_descending() {
        let mut harness = Harness::new(TestRuntime::with_invoices(three_unsorted()));
        assert_eq!(harness.visible_ids(), vec![3, 1, 2]);

        harness.press(KeyCode::Char('1'));
        assert_eq!(harness.visible_ids(), vec![1, 2, 3]);
        assert_eq!(column_header("id", &harness.state), "id ▲");

        harness.press(KeyCode::Char('1'));
        assert_eq!(harness.visible_ids(), vec![3, 2, 1]);

        harness.press(KeyCode::Char('S'));
        assert_eq!(harness.visible_ids(), vec![3, 1, 2]);
    }

    #[test]
    fn missing_totals_sort_last_both_ways() {
        let mut harness = Harness::new(TestRuntime::with_invoices(three_unsorted()));
        harness.press(KeyCode::Char('4'));
        assert_eq!(harness.visible_ids(), vec![1, 3, 2]);
        harness.press(KeyCode::Char('4'));
        assert_eq!(harness.visible_ids(), vec![3, 1, 2]);
    }

    #[test]
    fn upload_without_selection_sends_nothing() {
        let mut harness = Harness::new(TestRuntime::with_invoices(Vec::new()));
        harness.press(KeyCode::Char('u'));
        assert_eq!(harness.state.mode, AppMode::Upload);

        harness.press(KeyCode::Enter);
        assert!(harness.runtime.uploads.is_empty());
        assert_eq!(
            harness.toast(),
            Some((ToastKind::Info, "choose a PDF file first".to_owned()))
        );
        assert_eq!(harness.runtime.load_calls.len(), 1);
    }

    #[test]
    fn upload_success_clears_selection_and_reloads_twice() {
        let mut harness = Harness::new(TestRuntime::with_invoices(Vec::new()));
        harness.press(KeyCode::Char('u'));
        harness.type_text("/tmp/march.pdf");
        harness.press(KeyCode::Enter);

        assert_eq!(harness.runtime.uploads, vec![PathBuf::from("/tmp/march.pdf")]);
        assert!(harness.state.selected_upload().is_none());
        assert_eq!(harness.state.mode, AppMode::Nav);
        assert_eq!(harness.runtime.load_calls.len(), 2);
        assert_eq!(harness.toast().map(|(kind, _)| kind), Some(ToastKind::Success));

        let event = harness
            .rx
            .recv_timeout(Duration::from_secs(2))
            .expect("delayed reload should arrive");
        assert_eq!(event, InternalEvent::DelayedReload);
        harness.deliver(event);
        assert_eq!(harness.runtime.load_calls.len(), 3);
        assert_eq!(harness.state.list.invoices.len(), 1);
    }

    #[test]
    fn upload_runs_off_the_key_handler() {
        let mut harness = Harness::new(TestRuntime::with_invoices(Vec::new()));
        harness.runtime.defer_jobs = true;
        harness.press(KeyCode::Char('u'));
        harness.type_text("/tmp/april.pdf");
        harness.press(KeyCode::Enter);

        assert!(harness.runtime.uploads.is_empty());
        assert_eq!(harness.state.mode, AppMode::Upload);
        assert_eq!(
            harness.toast(),
            Some((ToastKind::Info, "uploading april.pdf...".to_owned()))
        );

        harness.press(KeyCode::Enter);
        assert_eq!(
            harness.toast(),
            Some((ToastKind::Info, "an upload is already running".to_owned()))
        );
        assert_eq!(harness.runtime.pending_jobs.len(), 1);

        harness.finish_job(0);
        assert_eq!(harness.runtime.uploads, vec![PathBuf::from("/tmp/april.pdf")]);
        assert_eq!(harness.state.mode, AppMode::Nav);
        assert!(harness.state.selected_upload().is_none());
        assert_eq!(harness.toast().map(|(kind, _)| kind), Some(ToastKind::Success));
        assert_eq!(
            harness.runtime.pending_jobs,
            vec![Job::List {
                request_id: 2,
                filter: ReviewFilter::All,
            }]
        );
    }

    #[test]
    fn save_and_delete_wait_for_runtime_answer() {
        let mut harness = Harness::new(TestRuntime::with_invoices(three_unsorted()));
        harness.runtime.defer_jobs = true;
        harness.press(KeyCode::Char('e'));
        harness.press(KeyCode::Enter);
        assert_eq!(harness.state.mode, AppMode::Nav);
        assert!(harness.runtime.patches.is_empty());
        assert!(matches!(
            harness.runtime.pending_jobs.as_slice(),
            [Job::Save { invoice_id, .. }] if *invoice_id == InvoiceId::new(3)
        ));

        harness.finish_job(0);
        assert_eq!(harness.runtime.patches.len(), 1);
        assert_eq!(
            harness.toast(),
            Some((ToastKind::Success, "invoice 3 saved".to_owned()))
        );
        assert!(matches!(
            harness.runtime.pending_jobs.as_slice(),
            [Job::List { .. }]
        ));
        harness.finish_job(0);

        harness.press(KeyCode::Char('d'));
        harness.press(KeyCode::Char('y'));
        assert!(harness.runtime.deletes.is_empty());
        assert_eq!(harness.visible_ids(), vec![3, 1, 2]);
        harness.deliver(InternalEvent::Deleted {
            invoice_id: InvoiceId::new(3),
            result: Err("server error (404): Invoice not found".to_owned()),
        });
        let (kind, message) = harness.toast().expect("error toast");
        assert_eq!(kind, ToastKind::Error);
        assert!(message.contains("Invoice not found"));
        assert_eq!(harness.runtime.pending_jobs.len(), 1);
    }

    #[test]
    fn upload_failure_keeps_selection_and_skips_reload() {
        let mut runtime = TestRuntime::with_invoices(Vec::new());
        runtime.fail_upload = Some("server error (500): extraction crashed".to_owned());
        let mut harness = Harness::new(runtime);
        harness.press(KeyCode::Char('u'));
        harness.type_text("a.pdf");
        harness.press(KeyCode::Enter);

        assert_eq!(harness.runtime.uploads.len(), 1);
        assert_eq!(harness.state.selected_upload(), Some(PathBuf::from("a.pdf")));
        assert_eq!(harness.state.mode, AppMode::Upload);
        assert_eq!(harness.runtime.load_calls.len(), 1);
        let (kind, message) = harness.toast().expect("error toast");
        assert_eq!(kind, ToastKind::Error);
        assert!(message.contains("extraction crashed"));
    }

    #[test]
    fn edit_save_sends_draft_closes_and_reloads() {
        let mut harness = Harness::new(TestRuntime::with_invoices(three_unsorted()));
        harness.press(KeyCode::Char('e'));
        assert_eq!(harness.state.mode, AppMode::Edit);
        harness.press(KeyCode::Backspace);
        harness.press(KeyCode::Backspace);
        harness.type_text("SE");
        harness.press(KeyCode::BackTab);
        harness.press(KeyCode::Char(' '));
        harness.press(KeyCode::Enter);

        assert!(harness.state.edit.is_none());
        assert_eq!(harness.state.mode, AppMode::Nav);
        let (id, patch) = harness.runtime.patches.first().cloned().expect("patch sent");
        assert_eq!(id, InvoiceId::new(3));
        assert_eq!(patch.supplier_name.as_deref(), Some("Cloudhost SE"));
        assert_eq!(patch.needs_review, Some(0));
        assert_eq!(patch.field_names().len(), 6);
        assert_eq!(harness.runtime.load_calls.len(), 2);
        assert_eq!(
            harness.state.list.find(InvoiceId::new(3)).and_then(|inv| inv.supplier_name.clone()),
            Some("Cloudhost SE".to_owned())
        );
        assert_eq!(harness.toast().map(|(kind, _)| kind), Some(ToastKind::Success));
    }

    #[test]
    fn failed_save_closes_modal_and_leaves_list() {
        let mut runtime = TestRuntime::with_invoices(three_unsorted());
        runtime.fail_patch = Some("server error (422): bad date".to_owned());
        let mut harness = Harness::new(runtime);
        let before = harness.state.list.invoices.clone();

        harness.press(KeyCode::Char('e'));
        harness.type_text("zzz");
        harness.press(KeyCode::Enter);

        assert!(harness.state.edit.is_none());
        assert_eq!(harness.state.mode, AppMode::Nav);
        assert_eq!(harness.state.list.invoices, before);
        assert_eq!(harness.runtime.load_calls.len(), 1);
        let (kind, message) = harness.toast().expect("error toast");
        assert_eq!(kind, ToastKind::Error);
        assert!(message.contains("bad date"));
    }

    #[test]
    fn cancelled_edit_sends_nothing() {
        let mut harness = Harness::new(TestRuntime::with_invoices(three_unsorted()));
        harness.press(KeyCode::Char('e'));
        harness.type_text("changed");
        harness.press(KeyCode::Esc);
        assert!(harness.runtime.patches.is_empty());
        assert_eq!(harness.state.mode, AppMode::Nav);
    }

    #[test]
    fn delete_requires_confirmation() {
        let mut harness = Harness::new(TestRuntime::with_invoices(three_unsorted()));
        harness.press(KeyCode::Char('j'));
        harness.press(KeyCode::Char('d'));
        assert_eq!(harness.state.mode, AppMode::ConfirmDelete);
        harness.press(KeyCode::Char('n'));
        assert!(harness.runtime.deletes.is_empty());
        assert_eq!(harness.runtime.load_calls.len(), 1);

        harness.press(KeyCode::Char('d'));
        harness.press(KeyCode::Char('y'));
        assert_eq!(harness.runtime.deletes, vec![InvoiceId::new(1)]);
        assert_eq!(harness.runtime.load_calls.len(), 2);
        assert_eq!(harness.visible_ids(), vec![3, 2]);
        assert_eq!(harness.toast().map(|(kind, _)| kind), Some(ToastKind::Success));
    }

    #[test]
    fn failed_delete_reports_and_keeps_row() {
        let mut runtime = TestRuntime::with_invoices(three_unsorted());
        runtime.fail_delete = Some("server error (404): Invoice not found".to_owned());
        let mut harness = Harness::new(runtime);
        harness.press(KeyCode::Char('d'));
        harness.press(KeyCode::Char('y'));
        assert_eq!(harness.visible_ids(), vec![3, 1, 2]);
        assert_eq!(harness.runtime.load_calls.len(), 1);
        assert_eq!(harness.toast().map(|(kind, _)| kind), Some(ToastKind::Error));
    }

    #[test]
    fn preview_items_tab_loads_and_sums() {
        let mut runtime = TestRuntime::with_invoices(three_unsorted());
        runtime.items.insert(
            3,
            vec![sample_item(1, 3, Some(10.005)), sample_item(2, 3, Some(5.00))],
        );
        let mut harness = Harness::new(runtime);
        harness.press(KeyCode::Char('p'));
        assert_eq!(harness.state.mode, AppMode::Preview);
        harness.press(KeyCode::Tab);
        harness.pump();

        let panel = harness
            .state
            .preview
            .as_ref()
            .and_then(|preview| preview.items.as_ref())
            .expect("items panel mounted");
        assert_eq!(panel.total(), Some(15.0));
        assert!(items_panel_text(panel).contains("sum (from items)"));
        assert!(items_panel_text(panel).contains("15.00"));
    }

    #[test]
    fn stale_items_after_close_are_ignored() {
        let mut runtime = TestRuntime::with_invoices(three_unsorted());
        runtime.defer_items = true;
        let mut harness = Harness::new(runtime);
        harness.press(KeyCode::Char('p'));
        harness.press(KeyCode::Char('2'));
        let (request_id, invoice_id) = harness.runtime.pending_items[0];
        harness.press(KeyCode::Char('q'));
        assert_eq!(harness.state.mode, AppMode::Nav);

        harness.deliver(InternalEvent::ItemsLoaded {
            request_id,
            invoice_id,
            result: Ok(vec![sample_item(1, 3, Some(1.0))]),
        });
        assert!(harness.state.preview.is_none());

        harness.press(KeyCode::Char('p'));
        let preview = harness.state.preview.as_ref().expect("reopened");
        assert_eq!(preview.tab, PreviewTab::Document);
        assert!(preview.items.is_none());
    }

    #[test]
    fn stale_items_after_tab_switch_are_ignored() {
        let mut runtime = TestRuntime::with_invoices(three_unsorted());
        runtime.defer_items = true;
        let mut harness = Harness::new(runtime);
        harness.press(KeyCode::Char('p'));
        harness.press(KeyCode::Char('2'));
        harness.press(KeyCode::Char('1'));
        harness.press(KeyCode::Char('2'));
        let (old_request, invoice_id) = harness.runtime.pending_items[0];
        let (new_request, _) = harness.runtime.pending_items[1];

        harness.deliver(InternalEvent::ItemsLoaded {
            request_id: old_request,
            invoice_id,
            result: Ok(vec![sample_item(1, 3, Some(99.0))]),
        });
        let loading = harness
            .state
            .preview
            .as_ref()
            .and_then(|preview| preview.items.as_ref())
            .and_then(ItemsPanel::total);
        assert_eq!(loading, None);

        harness.deliver(InternalEvent::ItemsLoaded {
            request_id: new_request,
            invoice_id,
            result: Err("timeout".to_owned()),
        });
        let panel = harness
            .state
            .preview
            .as_ref()
            .and_then(|preview| preview.items.as_ref())
            .expect("panel");
        assert_eq!(
            items_panel_text(panel),
            "could not load line items: timeout"
        );
    }

    #[test]
    fn preview_document_actions_use_file_url() {
        let mut harness = Harness::new(TestRuntime::with_invoices(three_unsorted()));
        harness.press(KeyCode::Char('p'));
        harness.press(KeyCode::Char('o'));
        assert_eq!(
            harness.runtime.opened,
            vec!["http://127.0.0.1:5173/api/files/0003-scan.pdf".to_owned()]
        );
        harness.press(KeyCode::Char('w'));
        assert_eq!(harness.runtime.downloads, vec!["0003-scan.pdf".to_owned()]);
        assert_eq!(harness.toast().map(|(kind, _)| kind), Some(ToastKind::Success));

        let preview = harness.state.preview.as_ref().expect("preview open");
        assert!(document_tab_text(preview).contains("0003-scan.pdf"));
    }

    #[test]
    fn preview_without_source_file_shows_empty_state() {
        let mut invoice = sample_invoice(1, Some("Acme"), None);
        invoice.source_file = None;
        let mut harness = Harness::new(TestRuntime::with_invoices(vec![invoice]));
        harness.press(KeyCode::Enter);
        harness.press(KeyCode::Char('o'));
        assert!(harness.runtime.opened.is_empty());
        assert_eq!(harness.toast().map(|(kind, _)| kind), Some(ToastKind::Info));
        let preview = harness.state.preview.as_ref().expect("preview open");
        assert!(document_tab_text(preview).contains("no source document"));
    }

    #[test]
    fn q_closes_preview_before_quitting() {
        let mut harness = Harness::new(TestRuntime::with_invoices(three_unsorted()));
        harness.press(KeyCode::Char('p'));
        assert!(!harness.press(KeyCode::Char('q')));
        assert_eq!(harness.state.mode, AppMode::Nav);
        assert!(harness.press(KeyCode::Char('q')));
        assert!(harness.press_with(KeyCode::Char('q'), KeyModifiers::CONTROL));
    }

    #[test]
    fn older_status_timer_does_not_clear_newer_toast() {
        let mut harness = Harness::new(TestRuntime::with_invoices(three_unsorted()));
        harness.press(KeyCode::Char('f'));
        let first_token = harness.view_data.status_token;
        harness.press(KeyCode::Char('1'));
        assert!(harness.view_data.status_token > first_token);

        harness.deliver(InternalEvent::ClearStatus { token: first_token });
        assert!(harness.state.toast.is_some());

        let latest = harness.view_data.status_token;
        harness.deliver(InternalEvent::ClearStatus { token: latest });
        assert!(harness.state.toast.is_none());
        assert!(status_text(&harness.state).contains("q quit"));
    }

    #[test]
    fn items_panel_text_covers_loading_and_empty() {
        let mut panel = ItemsPanel::mount(InvoiceId::new(1), 1);
        assert!(items_panel_text(&panel).starts_with("loading items"));
        panel.accept(1, InvoiceId::new(1), Ok(Vec::new()));
        assert_eq!(items_panel_text(&panel), "no line items recognized");
    }

    #[test]
    fn table_cells_render_missing_values_as_dash() {
        let mut invoice = sample_invoice(7, None, None);
        invoice.extraction_confidence = Some(82.4);
        invoice.needs_review = Some(0);
        let cells = table_row_cells(&invoice);
        assert_eq!(cells[0], "7");
        assert_eq!(cells[1], "-");
        assert_eq!(cells[4], "-");
        assert_eq!(cells[5], "82");
        assert_eq!(cells[6], "ok");
    }
}
