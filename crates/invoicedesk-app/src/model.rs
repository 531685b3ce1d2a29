// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};

use crate::ids::*;

pub const DEFAULT_CURRENCY: &str = "EUR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    #[serde(default)]
    pub supplier_name: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub invoice_date: Option<String>,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub extraction_confidence: Option<f64>,
    #[serde(default)]
    pub needs_review: Option<i64>,
    #[serde(default)]
    pub source_file: Option<String>,
}

impl Invoice {
    /// A missing flag counts as needs-review; the server inserts 1 by default.
    pub fn review_status(&self) -> ReviewStatus {
        match self.needs_review {
            Some(flag) => ReviewStatus::from_flag(flag),
            None => ReviewStatus::NeedsReview,
        }
    }

    pub fn display_title(&self) -> String {
        match (&self.supplier_name, &self.invoice_number) {
            (Some(supplier), Some(number)) => format!("{supplier} / {number}"),
            (Some(supplier), None) => supplier.clone(),
            (None, Some(number)) => number.clone(),
            (None, None) => format!("invoice #{}", self.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: InvoiceItemId,
    pub invoice_id: InvoiceId,
    #[serde(default)]
    pub line_index: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub vat_rate: Option<f64>,
    #[serde(default)]
    pub vat_amount: Option<f64>,
    #[serde(default)]
    pub line_total: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    Reviewed,
    NeedsReview,
}

impl ReviewStatus {
    pub const fn flag(self) -> i64 {
        match self {
            Self::Reviewed => 0,
            Self::NeedsReview => 1,
        }
    }

    /// Any non-zero flag means the extraction still needs a human pass.
    pub const fn from_flag(flag: i64) -> Self {
        if flag == 0 {
            Self::Reviewed
        } else {
            Self::NeedsReview
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Reviewed => "ok",
            Self::NeedsReview => "review",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReviewFilter {
    #[default]
    All,
    Reviewed,
    NeedsReview,
}

impl ReviewFilter {
    pub const ALL: [Self; 3] = [Self::All, Self::NeedsReview, Self::Reviewed];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Reviewed => "reviewed",
            Self::NeedsReview => "needs_review",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" | "" => Some(Self::All),
            "reviewed" | "0" => Some(Self::Reviewed),
            "needs_review" | "1" => Some(Self::NeedsReview),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Reviewed => "reviewed only",
            Self::NeedsReview => "needs review only",
        }
    }

    /// Value of the `needs_review` query parameter, if the filter sends one.
    pub const fn query_value(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Reviewed => Some("0"),
            Self::NeedsReview => Some("1"),
        }
    }

    pub fn next(self) -> Self {
        let index = Self::ALL
            .iter()
            .position(|filter| *filter == self)
            .unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn admits(self, invoice: &Invoice) -> bool {
        match self {
            Self::All => true,
            Self::Reviewed => invoice.needs_review == Some(0),
            Self::NeedsReview => invoice.needs_review == Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    Id,
    SupplierName,
    InvoiceDate,
    TotalAmount,
    ExtractionConfidence,
}

impl SortKey {
    pub const ALL: [Self; 5] = [
        Self::Id,
        Self::SupplierName,
        Self::InvoiceDate,
        Self::TotalAmount,
        Self::ExtractionConfidence,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::SupplierName => "supplier",
            Self::InvoiceDate => "date",
            Self::TotalAmount => "amount",
            Self::ExtractionConfidence => "confidence",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub const fn toggled(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub app: String,
}

/// What the server said after accepting an upload. The reference server
/// answers with the freshly extracted invoice, but the shape is not part of
/// the contract, so the raw body is kept as well.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub invoice: Option<Invoice>,
    pub raw: serde_json::Value,
}

impl UploadReceipt {
    pub fn from_json(raw: serde_json::Value) -> Self {
        let invoice = serde_json::from_value::<Invoice>(raw.clone()).ok();
        Self { invoice, raw }
    }
}
