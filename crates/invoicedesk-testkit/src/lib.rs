// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use invoicedesk_app::{Invoice, InvoiceId, InvoiceItem, InvoiceItemId};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::TempDir;
use tiny_http::{Header, Request, Response, Server};

/// Minimal bytes that pass for a PDF on the wire.
pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\ntrailer\n<<>>\n%%EOF\n";

const SUPPLIERS: [&str; 6] = [
    "Acme GmbH",
    "Bürobedarf Nord",
    "Cloudhost AG",
    "Druckerei Weiss",
    "Elektro Kraft",
    "Fahrrad Lange",
];

pub fn sample_invoice(id: i64, supplier: Option<&str>, total: Option<f64>) -> Invoice {
    Invoice {
        id: InvoiceId::new(id),
        supplier_name: supplier.map(str::to_owned),
        invoice_number: Some(format!("RE-{id:04}")),
        invoice_date: Some(format!("2024-03-{:02}", (id % 28) + 1)),
        total_amount: total,
        currency: Some("EUR".to_owned()),
        extraction_confidence: Some(50.0 + (id % 5) as f64 * 10.0),
        needs_review: Some(1),
        source_file: Some(format!("{id:04}-scan.pdf")),
    }
}

pub fn sample_item(id: i64, invoice_id: i64, line_total: Option<f64>) -> InvoiceItem {
    InvoiceItem {
        id: InvoiceItemId::new(id),
        invoice_id: InvoiceId::new(invoice_id),
        line_index: Some(id),
        description: Some(format!("position {id}")),
        quantity: Some(1.0),
        unit: Some("pcs".to_owned()),
        unit_price: line_total,
        vat_rate: Some(19.0),
        vat_amount: None,
        line_total,
    }
}

/// A small mixed set: alternating review flags, one invoice without a
/// supplier or total, ids handed out in server (insertion) order.
pub fn demo_invoices() -> Vec<Invoice> {
    let mut invoices: Vec<Invoice> = SUPPLIERS
        .iter()
        .enumerate()
        .map(|(index, supplier)| {
            let id = index as i64 + 1;
            let mut invoice = sample_invoice(id, Some(supplier), Some(25.0 * id as f64 + 0.5));
            invoice.needs_review = Some(if id % 2 == 0 { 0 } else { 1 });
            invoice
        })
        .collect();
    invoices.push(sample_invoice(SUPPLIERS.len() as i64 + 1, None, None));
    invoices
}

/// Writes a tiny PDF into a fresh temp dir. Keep the `TempDir` alive for as
/// long as the path is used.
pub fn temp_pdf(name: &str) -> Result<(TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let path = write_pdf(dir.path(), name)?;
    Ok((dir, path))
}

pub fn write_pdf(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, PDF_BYTES).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }

    pub fn query(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, query)| query)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json(&self) -> Result<Value> {
        serde_json::from_slice(&self.body).context("decode recorded request body")
    }
}

#[derive(Debug, Default)]
struct MockState {
    invoices: Vec<Invoice>,
    items: HashMap<i64, Value>,
    files: HashMap<String, Vec<u8>>,
    failures: HashMap<String, (u16, String)>,
    stalls: HashMap<String, Duration>,
    requests: Vec<RecordedRequest>,
    next_id: i64,
}

/// In-memory stand-in for the invoice service, served over real HTTP under
/// the `/api` prefix. Dropping it stops the server thread.
pub struct MockApi {
    origin: String,
    server: Arc<Server>,
    state: Arc<Mutex<MockState>>,
    handle: Option<JoinHandle<()>>,
}

impl MockApi {
    pub fn start(invoices: Vec<Invoice>) -> Result<Self> {
        let server = Server::http("127.0.0.1:0")
            .map_err(|error| anyhow!("start mock server: {error}"))?;
        let origin = format!("http://{}", server.server_addr());
        let server = Arc::new(server);

        let next_id = invoices.iter().map(|invoice| invoice.id.get()).max().unwrap_or(0) + 1;
        let state = Arc::new(Mutex::new(MockState {
            invoices,
            next_id,
            ..MockState::default()
        }));

        let handle = {
            let server = Arc::clone(&server);
            let state = Arc::clone(&state);
            thread::spawn(move || {
                while let Ok(request) = server.recv() {
                    serve(&state, request);
                }
            })
        };

        Ok(Self {
            origin,
            server,
            state,
            handle: Some(handle),
        })
    }

    /// `http://127.0.0.1:<port>`, the address a dev proxy would sit on.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn base_url(&self) -> String {
        format!("{}/api", self.origin)
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.lock().invoices.clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method && request.path() == path)
            .collect()
    }

    /// Items payload for one invoice, sent verbatim (use `Value::Null` to
    /// mimic a server answering `null`).
    pub fn set_items(&self, invoice_id: i64, items: Value) {
        self.lock().items.insert(invoice_id, items);
    }

    pub fn add_file(&self, reference: &str, bytes: &[u8]) {
        self.lock().files.insert(reference.to_owned(), bytes.to_vec());
    }

    /// Makes every `method path` request answer with `status` and a
    /// `{"detail": ...}` body until cleared.
    pub fn fail(&self, method: &str, path: &str, status: u16, detail: &str) {
        self.lock()
            .failures
            .insert(route_key(method, path), (status, detail.to_owned()));
    }

    /// Holds every `method path` request for `delay` before answering, to
    /// stand in for a slow server.
    pub fn stall(&self, method: &str, path: &str, delay: Duration) {
        self.lock().stalls.insert(route_key(method, path), delay);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn route_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), path)
}

struct Reply {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Reply {
    fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    fn detail(status: u16, detail: &str) -> Self {
        Self::json(status, &json!({ "detail": detail }))
    }
}

fn serve(state: &Mutex<MockState>, mut request: Request) {
    let mut body = Vec::new();
    let _ = request.as_reader().read_to_end(&mut body);
    let recorded = RecordedRequest {
        method: request.method().as_str().to_ascii_uppercase(),
        url: request.url().to_owned(),
        content_type: request
            .headers()
            .iter()
            .find(|header| header.field.equiv("Content-Type"))
            .map(|header| header.value.as_str().to_owned()),
        body,
    };

    let stall = {
        let state = state.lock().unwrap_or_else(PoisonError::into_inner);
        let path = recorded.path();
        let path = path.strip_prefix("/api").unwrap_or(path);
        state.stalls.get(&route_key(&recorded.method, path)).copied()
    };
    if let Some(delay) = stall {
        thread::sleep(delay);
    }

    let reply = {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.requests.push(recorded.clone());
        route(&mut state, &recorded)
    };

    let mut response = Response::from_data(reply.body).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes("Content-Type", reply.content_type) {
        response = response.with_header(header);
    }
    let _ = request.respond(response);
}

fn route(state: &mut MockState, request: &RecordedRequest) -> Reply {
    let Some(path) = request.path().strip_prefix("/api") else {
        return Reply::detail(404, "Not Found");
    };
    if let Some((status, detail)) = state.failures.get(&route_key(&request.method, path)) {
        return Reply::detail(*status, detail);
    }

    let segments: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
    match (request.method.as_str(), segments.as_slice()) {
        ("GET", []) => Reply::json(200, &json!({ "status": "ok", "app": "invoice-extractor" })),
        ("GET", ["invoices"]) => {
            let flag = request.query().and_then(|query| {
                query
                    .split('&')
                    .find_map(|pair| pair.strip_prefix("needs_review="))
                    .and_then(|value| value.parse::<i64>().ok())
            });
            let listed: Vec<&Invoice> = state
                .invoices
                .iter()
                .filter(|invoice| flag.is_none() || invoice.needs_review == flag)
                .collect();
            Reply::json(200, &json!(listed))
        }
        ("GET", ["invoices", id]) => match find_invoice(state, id) {
            Some(index) => Reply::json(200, &json!(state.invoices[index])),
            None => Reply::detail(404, "Invoice not found"),
        },
        ("PATCH", ["invoices", id]) => patch_invoice(state, id, &request.body),
        ("DELETE", ["invoices", id]) => match find_invoice(state, id) {
            Some(index) => {
                let removed = state.invoices.remove(index);
                state.items.remove(&removed.id.get());
                Reply::json(200, &json!({ "ok": true }))
            }
            None => Reply::detail(404, "Invoice not found"),
        },
        ("GET", ["invoices", id, "items"]) => match find_invoice(state, id) {
            Some(index) => {
                let id = state.invoices[index].id.get();
                let items = state.items.get(&id).cloned().unwrap_or_else(|| json!([]));
                Reply::json(200, &items)
            }
            None => Reply::detail(404, "Invoice not found"),
        },
        ("POST", ["upload"]) => upload(state, request),
        ("GET", ["files", reference]) => {
            let reference = decode_segment(reference);
            match state.files.get(&reference) {
                Some(bytes) => Reply {
                    status: 200,
                    content_type: "application/pdf",
                    body: bytes.clone(),
                },
                None => Reply::detail(404, "File not found"),
            }
        }
        _ => Reply::detail(404, "Not Found"),
    }
}

fn find_invoice(state: &MockState, id: &str) -> Option<usize> {
    let id = id.parse::<i64>().ok()?;
    state
        .invoices
        .iter()
        .position(|invoice| invoice.id.get() == id)
}

fn patch_invoice(state: &mut MockState, id: &str, body: &[u8]) -> Reply {
    let Some(index) = find_invoice(state, id) else {
        return Reply::detail(404, "Invoice not found");
    };
    let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) else {
        return Reply::detail(422, "body must be a JSON object");
    };

    let mut current = json!(state.invoices[index]);
    if let Value::Object(target) = &mut current {
        for (key, value) in fields {
            if key != "id" {
                target.insert(key, value);
            }
        }
    }
    match serde_json::from_value::<Invoice>(current) {
        Ok(updated) => {
            state.invoices[index] = updated.clone();
            Reply::json(200, &json!(updated))
        }
        Err(error) => Reply::detail(422, &error.to_string()),
    }
}

fn upload(state: &mut MockState, request: &RecordedRequest) -> Reply {
    let Some(boundary) = request
        .content_type
        .as_deref()
        .filter(|value| value.starts_with("multipart/form-data"))
        .and_then(|value| value.split_once("boundary="))
        .map(|(_, boundary)| boundary.trim_matches('"').to_owned())
    else {
        return Reply::detail(400, "expected multipart/form-data");
    };
    let Some((file_name, bytes)) = multipart_file(&request.body, &boundary) else {
        return Reply::detail(422, "missing file field");
    };

    let id = state.next_id;
    state.next_id += 1;
    let reference = format!("{id:04}-{file_name}");
    state.files.insert(reference.clone(), bytes);

    let mut invoice = sample_invoice(id, None, None);
    invoice.invoice_number = None;
    invoice.extraction_confidence = Some(0.0);
    invoice.source_file = Some(reference);
    state.invoices.push(invoice.clone());
    Reply::json(200, &json!(invoice))
}

/// Pulls the `file` part out of a multipart body.
fn multipart_file(body: &[u8], boundary: &str) -> Option<(String, Vec<u8>)> {
    let delimiter = format!("--{boundary}");
    let text = String::from_utf8_lossy(body);
    let start = text.find(&delimiter)?;
    for part in text[start..].split(delimiter.as_str()) {
        let Some((head, _)) = part.split_once("\r\n\r\n") else {
            continue;
        };
        if !head.contains("name=\"file\"") {
            continue;
        }
        let file_name = head
            .split("filename=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap_or("upload.pdf")
            .to_owned();

        // Offsets into the raw body so binary content survives.
        let head_marker = format!("{head}\r\n\r\n");
        let offset = find_bytes(body, head_marker.as_bytes())? + head_marker.len();
        let end_marker = format!("\r\n{delimiter}");
        let length = find_bytes(&body[offset..], end_marker.as_bytes())?;
        return Some((file_name, body[offset..offset + length].to_vec()));
    }
    None
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn decode_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%'
            && index + 2 < bytes.len()
            && let Some(value) = std::str::from_utf8(&bytes[index + 1..index + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        {
            decoded.push(value);
            index += 3;
            continue;
        }
        decoded.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
