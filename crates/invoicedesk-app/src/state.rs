// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::path::PathBuf;

use time::OffsetDateTime;

use crate::{
    DraftField, Invoice, InvoiceDraft, InvoiceId, InvoiceItem, InvoiceList, ItemsPanel,
    ReviewFilter, SortKey, SortSpec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Nav,
    Search,
    Upload,
    Edit,
    ConfirmDelete,
    Preview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewTab {
    Document,
    Items,
}

impl PreviewTab {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Items => "items",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
}

impl Toast {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Info,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditSession {
    pub draft: InvoiceDraft,
    pub field_index: usize,
}

impl EditSession {
    pub fn field(&self) -> DraftField {
        DraftField::ALL[self.field_index.min(DraftField::ALL.len() - 1)]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewState {
    pub invoice_id: InvoiceId,
    pub title: String,
    pub source_file: Option<String>,
    pub tab: PreviewTab,
    pub items: Option<ItemsPanel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOutcome {
    Stale,
    Loaded { count: usize, filter_changed: bool },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub mode: AppMode,
    pub list: InvoiceList,
    pub edit: Option<EditSession>,
    pub pending_delete: Option<InvoiceId>,
    pub preview: Option<PreviewState>,
    pub upload_input: String,
    pub toast: Option<Toast>,
    next_items_request: u64,
    list_request: u64,
    pending_filter: Option<ReviewFilter>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            mode: AppMode::Nav,
            list: InvoiceList::default(),
            edit: None,
            pending_delete: None,
            preview: None,
            upload_input: String::new(),
            toast: None,
            next_items_request: 0,
            list_request: 0,
            pending_filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    CycleFilter,
    ReloadList,
    BeginSearch,
    SetSearch(String),
    EndSearch,
    ToggleSort(SortKey),
    ClearSort,
    OpenEdit(InvoiceId),
    EditNextField,
    EditPrevField,
    EditInput(char),
    EditBackspace,
    SaveEdit,
    CloseEdit,
    RequestDelete(InvoiceId),
    ConfirmDelete,
    CancelDelete,
    OpenPreview(InvoiceId),
    SelectPreviewTab(PreviewTab),
    ClosePreview,
    OpenUpload,
    SetUploadInput(String),
    ClearUploadSelection,
    CloseUpload,
    ShowToast(Toast),
    ClearStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    ModeChanged(AppMode),
    FilterRequested(ReviewFilter),
    ListRequested {
        request_id: u64,
        filter: ReviewFilter,
    },
    SearchChanged(String),
    SortChanged(Option<SortSpec>),
    EditOpened(InvoiceId),
    EditFieldChanged(DraftField),
    EditSubmitted(InvoiceDraft),
    EditClosed,
    DeleteRequested(InvoiceId),
    DeleteConfirmed(InvoiceId),
    DeleteCancelled,
    PreviewOpened(InvoiceId),
    PreviewTabChanged(PreviewTab),
    ItemsRequested {
        request_id: u64,
        invoice_id: InvoiceId,
    },
    PreviewClosed,
    UploadSelectionChanged(Option<PathBuf>),
    StatusUpdated(Toast),
    StatusCleared,
}

impl AppState {
    pub fn dispatch(&mut self, command: AppCommand) -> Vec<AppEvent> {
        match command {
            AppCommand::CycleFilter => self.request_filter(self.requested_filter().next()),
            AppCommand::ReloadList => vec![self.request_list(self.requested_filter())],
            AppCommand::BeginSearch => self.set_mode(AppMode::Search),
            AppCommand::SetSearch(term) => {
                self.list.search = term.clone();
                vec![AppEvent::SearchChanged(term)]
            }
            AppCommand::EndSearch => self.set_mode(AppMode::Nav),
            AppCommand::ToggleSort(key) => {
                let spec = self.list.toggle_sort(key);
                let label = format!("sort {} {}", spec.key.label(), spec.direction.as_str());
                vec![
                    AppEvent::SortChanged(Some(spec)),
                    self.set_status(Toast::info(label)),
                ]
            }
            AppCommand::ClearSort => {
                self.list.clear_sort();
                vec![
                    AppEvent::SortChanged(None),
                    self.set_status(Toast::info("sort cleared")),
                ]
            }
            AppCommand::OpenEdit(id) => self.open_edit(id),
            AppCommand::EditNextField => self.move_edit_field(1),
            AppCommand::EditPrevField => self.move_edit_field(-1),
            AppCommand::EditInput(value) => self.edit_text(|draft, field| draft.push_char(field, value)),
            AppCommand::EditBackspace => self.edit_text(|draft, field| draft.pop_char(field)),
            AppCommand::SaveEdit => {
                // The modal closes whether or not the request later succeeds.
                let Some(edit) = self.edit.take() else {
                    return Vec::new();
                };
                let mut events = vec![AppEvent::EditSubmitted(edit.draft), AppEvent::EditClosed];
                events.extend(self.set_mode(AppMode::Nav));
                events
            }
            AppCommand::CloseEdit => {
                if self.edit.take().is_none() {
                    return Vec::new();
                }
                let mut events = vec![AppEvent::EditClosed];
                events.extend(self.set_mode(AppMode::Nav));
                events
            }
            AppCommand::RequestDelete(id) => {
                if self.list.find(id).is_none() {
                    return vec![self.set_status(Toast::error(format!("invoice {id} not loaded")))];
                }
                self.pending_delete = Some(id);
                let mut events = vec![AppEvent::DeleteRequested(id)];
                events.extend(self.set_mode(AppMode::ConfirmDelete));
                events
            }
            AppCommand::ConfirmDelete => {
                let Some(id) = self.pending_delete.take() else {
                    return Vec::new();
                };
                let mut events = vec![AppEvent::DeleteConfirmed(id)];
                events.extend(self.set_mode(AppMode::Nav));
                events
            }
            AppCommand::CancelDelete => {
                if self.pending_delete.take().is_none() {
                    return Vec::new();
                }
                let mut events = vec![AppEvent::DeleteCancelled];
                events.extend(self.set_mode(AppMode::Nav));
                events
            }
            AppCommand::OpenPreview(id) => self.open_preview(id),
            AppCommand::SelectPreviewTab(tab) => self.select_preview_tab(tab),
            AppCommand::ClosePreview => {
                if self.preview.take().is_none() {
                    return Vec::new();
                }
                let mut events = vec![AppEvent::PreviewClosed];
                events.extend(self.set_mode(AppMode::Nav));
                events
            }
            AppCommand::OpenUpload => self.set_mode(AppMode::Upload),
            AppCommand::SetUploadInput(value) => {
                self.upload_input = value;
                vec![AppEvent::UploadSelectionChanged(self.selected_upload())]
            }
            AppCommand::ClearUploadSelection => {
                self.upload_input.clear();
                vec![AppEvent::UploadSelectionChanged(None)]
            }
            AppCommand::CloseUpload => self.set_mode(AppMode::Nav),
            AppCommand::ShowToast(toast) => vec![self.set_status(toast)],
            AppCommand::ClearStatus => {
                self.toast = None;
                vec![AppEvent::StatusCleared]
            }
        }
    }

    /// The file chosen in the upload prompt, if any.
    pub fn selected_upload(&self) -> Option<PathBuf> {
        let trimmed = self.upload_input.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }

    /// Routes a finished item fetch to the mounted panel. Returns false when
    /// the drawer closed, the items tab unmounted, or the panel moved on.
    pub fn apply_items(
        &mut self,
        request_id: u64,
        invoice_id: InvoiceId,
        result: Result<Vec<InvoiceItem>, String>,
    ) -> bool {
        self.preview
            .as_mut()
            .and_then(|preview| preview.items.as_mut())
            .is_some_and(|panel| panel.accept(request_id, invoice_id, result))
    }

    /// Filter of the newest list request, falling back to the one on screen.
    pub fn requested_filter(&self) -> ReviewFilter {
        self.pending_filter.unwrap_or(self.list.filter)
    }

    /// A filter change still waiting for its list to arrive.
    pub fn pending_filter(&self) -> Option<ReviewFilter> {
        self.pending_filter
    }

    pub fn latest_list_request(&self) -> u64 {
        self.list_request
    }

    /// Applies a finished list fetch. Only the newest request counts; the
    /// filter it was made with is committed together with its rows, so a
    /// failed fetch leaves both the filter and the rows as they were.
    pub fn apply_list(
        &mut self,
        request_id: u64,
        filter: ReviewFilter,
        result: Result<Vec<Invoice>, String>,
        loaded_at: OffsetDateTime,
    ) -> ListOutcome {
        if request_id != self.list_request {
            return ListOutcome::Stale;
        }
        self.pending_filter = None;
        match result {
            Ok(invoices) => {
                let filter_changed = filter != self.list.filter;
                let count = invoices.len();
                self.list.filter = filter;
                self.list.replace(invoices, loaded_at);
                ListOutcome::Loaded {
                    count,
                    filter_changed,
                }
            }
            Err(message) => ListOutcome::Failed(message),
        }
    }

    fn request_filter(&mut self, filter: ReviewFilter) -> Vec<AppEvent> {
        self.pending_filter = Some(filter);
        vec![AppEvent::FilterRequested(filter), self.request_list(filter)]
    }

    fn request_list(&mut self, filter: ReviewFilter) -> AppEvent {
        self.list_request = self.list_request.saturating_add(1);
        AppEvent::ListRequested {
            request_id: self.list_request,
            filter,
        }
    }

    fn open_edit(&mut self, id: InvoiceId) -> Vec<AppEvent> {
        let Some(invoice) = self.list.find(id) else {
            return vec![self.set_status(Toast::error(format!("invoice {id} not loaded")))];
        };
        self.edit = Some(EditSession {
            draft: InvoiceDraft::from_invoice(invoice),
            field_index: 0,
        });
        let mut events = vec![AppEvent::EditOpened(id)];
        events.extend(self.set_mode(AppMode::Edit));
        events
    }

    fn move_edit_field(&mut self, delta: isize) -> Vec<AppEvent> {
        let Some(edit) = self.edit.as_mut() else {
            return Vec::new();
        };
        let len = DraftField::ALL.len() as isize;
        let next = (edit.field_index as isize + delta).rem_euclid(len) as usize;
        edit.field_index = next;
        vec![AppEvent::EditFieldChanged(DraftField::ALL[next])]
    }

    fn edit_text(
        &mut self,
        apply: impl FnOnce(&mut InvoiceDraft, DraftField) -> anyhow::Result<()>,
    ) -> Vec<AppEvent> {
        let Some(edit) = self.edit.as_mut() else {
            return Vec::new();
        };
        let field = edit.field();
        match apply(&mut edit.draft, field) {
            Ok(()) => vec![AppEvent::EditFieldChanged(field)],
            Err(error) => vec![self.set_status(Toast::info(error.to_string()))],
        }
    }

    fn open_preview(&mut self, id: InvoiceId) -> Vec<AppEvent> {
        let Some(invoice) = self.list.find(id) else {
            return vec![self.set_status(Toast::error(format!("invoice {id} not loaded")))];
        };
        self.preview = Some(PreviewState {
            invoice_id: id,
            title: invoice.display_title(),
            source_file: invoice.source_file.clone(),
            tab: PreviewTab::Document,
            items: None,
        });
        let mut events = vec![AppEvent::PreviewOpened(id)];
        events.extend(self.set_mode(AppMode::Preview));
        events
    }

    fn select_preview_tab(&mut self, tab: PreviewTab) -> Vec<AppEvent> {
        let request_id = self.next_items_request.saturating_add(1);
        let Some(preview) = self.preview.as_mut() else {
            return Vec::new();
        };
        if preview.tab == tab && (tab == PreviewTab::Document || preview.items.is_some()) {
            return Vec::new();
        }
        preview.tab = tab;
        match tab {
            PreviewTab::Document => {
                preview.items = None;
                vec![AppEvent::PreviewTabChanged(tab)]
            }
            PreviewTab::Items => {
                self.next_items_request = request_id;
                let invoice_id = preview.invoice_id;
                preview.items = Some(ItemsPanel::mount(invoice_id, request_id));
                vec![
                    AppEvent::PreviewTabChanged(tab),
                    AppEvent::ItemsRequested {
                        request_id,
                        invoice_id,
                    },
                ]
            }
        }
    }

    fn set_mode(&mut self, mode: AppMode) -> Vec<AppEvent> {
        self.mode = mode;
        vec![AppEvent::ModeChanged(mode)]
    }

    fn set_status(&mut self, toast: Toast) -> AppEvent {
        self.toast = Some(toast.clone());
        AppEvent::StatusUpdated(toast)
    }
}
