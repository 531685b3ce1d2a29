// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CURRENCY, Invoice, InvoiceId, ReviewStatus};

/// Partial update body for `PATCH /invoices/{id}`.
///
/// Outer `None` leaves the field out of the request; `Some(None)` on the
/// amount sends an explicit JSON `null` to clear it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InvoicePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_review: Option<i64>,
}

impl InvoicePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.supplier_name.is_some() {
            names.push("supplier_name");
        }
        if self.invoice_number.is_some() {
            names.push("invoice_number");
        }
        if self.invoice_date.is_some() {
            names.push("invoice_date");
        }
        if self.total_amount.is_some() {
            names.push("total_amount");
        }
        if self.currency.is_some() {
            names.push("currency");
        }
        if self.needs_review.is_some() {
            names.push("needs_review");
        }
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftField {
    SupplierName,
    InvoiceNumber,
    InvoiceDate,
    TotalAmount,
    Currency,
    MarkReviewed,
}

impl DraftField {
    pub const ALL: [Self; 6] = [
        Self::SupplierName,
        Self::InvoiceNumber,
        Self::InvoiceDate,
        Self::TotalAmount,
        Self::Currency,
        Self::MarkReviewed,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::SupplierName => "supplier",
            Self::InvoiceNumber => "invoice number",
            Self::InvoiceDate => "date (YYYY-MM-DD)",
            Self::TotalAmount => "amount",
            Self::Currency => "currency",
            Self::MarkReviewed => "mark reviewed",
        }
    }

    pub const fn is_toggle(self) -> bool {
        matches!(self, Self::MarkReviewed)
    }
}

/// In-memory copy of one invoice's editable fields while the edit modal is
/// open. Nothing here touches the canonical list until the patch is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceDraft {
    pub invoice_id: InvoiceId,
    pub supplier_name: String,
    pub invoice_number: String,
    pub invoice_date: String,
    pub total_amount: Option<f64>,
    pub currency: String,
    pub needs_review: i64,
    amount_text: String,
}

impl InvoiceDraft {
    pub fn from_invoice(invoice: &Invoice) -> Self {
        let total_amount = invoice.total_amount;
        Self {
            invoice_id: invoice.id,
            supplier_name: invoice.supplier_name.clone().unwrap_or_default(),
            invoice_number: invoice.invoice_number.clone().unwrap_or_default(),
            invoice_date: invoice.invoice_date.clone().unwrap_or_default(),
            total_amount,
            currency: invoice
                .currency
                .clone()
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_owned()),
            needs_review: invoice
                .needs_review
                .unwrap_or(ReviewStatus::NeedsReview.flag()),
            amount_text: total_amount.map(format_amount_input).unwrap_or_default(),
        }
    }

    pub fn is_marked_reviewed(&self) -> bool {
        self.needs_review == ReviewStatus::Reviewed.flag()
    }

    pub fn mark_reviewed(&mut self, reviewed: bool) {
        let status = if reviewed {
            ReviewStatus::Reviewed
        } else {
            ReviewStatus::NeedsReview
        };
        self.needs_review = status.flag();
    }

    pub fn toggle_reviewed(&mut self) {
        self.mark_reviewed(!self.is_marked_reviewed());
    }

    pub fn field_text(&self, field: DraftField) -> String {
        match field {
            DraftField::SupplierName => self.supplier_name.clone(),
            DraftField::InvoiceNumber => self.invoice_number.clone(),
            DraftField::InvoiceDate => self.invoice_date.clone(),
            DraftField::TotalAmount => self.amount_text.clone(),
            DraftField::Currency => self.currency.clone(),
            DraftField::MarkReviewed => {
                if self.is_marked_reviewed() {
                    "[x]".to_owned()
                } else {
                    "[ ]".to_owned()
                }
            }
        }
    }

    /// Replaces one field from its text form. The amount only accepts text
    /// that parses as a number (or is empty, which clears it); rejected
    /// input leaves the draft unchanged.
    pub fn set_field_text(&mut self, field: DraftField, value: &str) -> Result<()> {
        match field {
            DraftField::SupplierName => self.supplier_name = value.to_owned(),
            DraftField::InvoiceNumber => self.invoice_number = value.to_owned(),
            DraftField::InvoiceDate => self.invoice_date = value.to_owned(),
            DraftField::Currency => self.currency = value.to_owned(),
            DraftField::TotalAmount => {
                self.total_amount = parse_amount_input(value)?;
                self.amount_text = value.to_owned();
            }
            DraftField::MarkReviewed => {
                self.mark_reviewed(matches!(
                    value.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "x" | "[x]"
                ));
            }
        }
        Ok(())
    }

    pub fn push_char(&mut self, field: DraftField, value: char) -> Result<()> {
        if field.is_toggle() {
            if value == ' ' {
                self.toggle_reviewed();
            }
            return Ok(());
        }
        let mut text = self.field_text(field);
        text.push(value);
        self.set_field_text(field, &text)
    }

    pub fn pop_char(&mut self, field: DraftField) -> Result<()> {
        if field.is_toggle() {
            return Ok(());
        }
        let mut text = self.field_text(field);
        text.pop();
        self.set_field_text(field, &text)
    }

    pub fn to_patch(&self) -> InvoicePatch {
        InvoicePatch {
            supplier_name: Some(self.supplier_name.clone()),
            invoice_number: Some(self.invoice_number.clone()),
            invoice_date: Some(self.invoice_date.clone()),
            total_amount: Some(self.total_amount),
            currency: Some(self.currency.clone()),
            needs_review: Some(self.needs_review),
        }
    }
}

/// Mirrors a numeric input: empty means "no value", anything else has to
/// parse. A trailing separator while typing (`12.`) is accepted.
pub fn parse_amount_input(value: &str) -> Result<Option<f64>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed == "-" || trimmed == "." || trimmed == "-." {
        return Ok(None);
    }
    let amount = trimmed
        .parse::<f64>()
        .with_context(|| format!("amount {trimmed:?} is not a number"))?;
    if !amount.is_finite() {
        anyhow::bail!("amount {trimmed:?} is not a finite number");
    }
    Ok(Some(amount))
}

fn format_amount_input(value: f64) -> String {
    value.to_string()
}
