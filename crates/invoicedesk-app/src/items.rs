// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{InvoiceId, InvoiceItem};

#[derive(Debug, Clone, PartialEq)]
pub enum ItemsState {
    Loading,
    Failed(String),
    Loaded(Vec<InvoiceItem>),
}

/// Line-item panel for one invoice. A panel exists only while the items tab
/// of the preview drawer is showing; dropping it is the unmount.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemsPanel {
    invoice_id: InvoiceId,
    request_id: u64,
    state: ItemsState,
}

impl ItemsPanel {
    pub fn mount(invoice_id: InvoiceId, request_id: u64) -> Self {
        Self {
            invoice_id,
            request_id,
            state: ItemsState::Loading,
        }
    }

    pub fn state(&self) -> &ItemsState {
        &self.state
    }

    /// Applies a fetch result if it belongs to the current request and
    /// invoice. Returns false when the response is stale and was dropped.
    pub fn accept(
        &mut self,
        request_id: u64,
        invoice_id: InvoiceId,
        result: Result<Vec<InvoiceItem>, String>,
    ) -> bool {
        if request_id != self.request_id || invoice_id != self.invoice_id {
            return false;
        }
        self.state = match result {
            Ok(items) => ItemsState::Loaded(items),
            Err(message) => ItemsState::Failed(message),
        };
        true
    }

    pub fn total(&self) -> Option<f64> {
        match &self.state {
            ItemsState::Loaded(items) => Some(items_total(items)),
            ItemsState::Loading | ItemsState::Failed(_) => None,
        }
    }
}

/// Sum of the loaded line totals, rounded to cents. Items without a line
/// total count as zero.
pub fn items_total(items: &[InvoiceItem]) -> f64 {
    let sum = items
        .iter()
        .map(|item| item.line_total.unwrap_or(0.0))
        .sum::<f64>();
    round_cents(sum)
}

/// Rounds the exact binary value to two decimals. Scaling by 100 first
/// would round 15.00499.. (the f64 sum of 10.005 and 5.0) up to 15.01.
pub fn round_cents(value: f64) -> f64 {
    format!("{value:.2}").parse::<f64>().unwrap_or(value)
}
