// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::cmp::Ordering;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::{Invoice, InvoiceId, ReviewFilter, SortDirection, SortKey, SortSpec};

/// The fetched invoice page plus the client-side view settings applied to it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvoiceList {
    pub invoices: Vec<Invoice>,
    pub filter: ReviewFilter,
    pub search: String,
    pub sort: Option<SortSpec>,
    pub last_loaded_at: Option<OffsetDateTime>,
}

impl InvoiceList {
    pub fn replace(&mut self, invoices: Vec<Invoice>, loaded_at: OffsetDateTime) {
        self.invoices = invoices;
        self.last_loaded_at = Some(loaded_at);
    }

    /// Same key flips the direction, a new key starts ascending.
    pub fn toggle_sort(&mut self, key: SortKey) -> SortSpec {
        let next = match self.sort {
            Some(current) if current.key == key => SortSpec {
                key,
                direction: current.direction.toggled(),
            },
            _ => SortSpec {
                key,
                direction: SortDirection::Asc,
            },
        };
        self.sort = Some(next);
        next
    }

    pub fn clear_sort(&mut self) {
        self.sort = None;
    }

    pub fn visible(&self) -> Vec<&Invoice> {
        derive_view(&self.invoices, &self.search, self.sort)
    }

    pub fn find(&self, id: InvoiceId) -> Option<&Invoice> {
        self.invoices.iter().find(|invoice| invoice.id == id)
    }

    pub fn last_loaded_label(&self) -> Option<String> {
        self.last_loaded_at.map(format_clock)
    }
}

pub fn derive_view<'a>(
    invoices: &'a [Invoice],
    search: &str,
    sort: Option<SortSpec>,
) -> Vec<&'a Invoice> {
    let mut rows = invoices
        .iter()
        .filter(|invoice| matches_search(invoice, search))
        .collect::<Vec<_>>();
    if let Some(spec) = sort {
        // slice::sort_by is stable, so ties keep server order.
        rows.sort_by(|left, right| compare_invoices(left, right, spec));
    }
    rows
}

/// Only the empty term matches everything; whitespace is part of the term.
pub fn matches_search(invoice: &Invoice, term: &str) -> bool {
    if term.is_empty() {
        return true;
    }
    let needle = term.to_lowercase();

    let contains = |value: &Option<String>| {
        value
            .as_deref()
            .is_some_and(|value| value.to_lowercase().contains(&needle))
    };

    contains(&invoice.supplier_name)
        || contains(&invoice.invoice_number)
        || invoice.id.to_string().contains(&needle)
}

/// Missing values go last in both directions; only present/present
/// comparisons are reversed for descending order.
pub fn compare_invoices(left: &Invoice, right: &Invoice, spec: SortSpec) -> Ordering {
    match spec.key {
        SortKey::Id => nulls_last(
            Some(left.id.get()),
            Some(right.id.get()),
            spec.direction,
            |a, b| a.cmp(b),
        ),
        SortKey::TotalAmount => nulls_last(
            left.total_amount,
            right.total_amount,
            spec.direction,
            |a, b| a.total_cmp(b),
        ),
        SortKey::ExtractionConfidence => nulls_last(
            left.extraction_confidence,
            right.extraction_confidence,
            spec.direction,
            |a, b| a.total_cmp(b),
        ),
        SortKey::SupplierName => nulls_last(
            lowered(&left.supplier_name),
            lowered(&right.supplier_name),
            spec.direction,
            |a, b| a.cmp(b),
        ),
        SortKey::InvoiceDate => nulls_last(
            lowered(&left.invoice_date),
            lowered(&right.invoice_date),
            spec.direction,
            |a, b| a.cmp(b),
        ),
    }
}

fn lowered(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::to_lowercase)
}

fn nulls_last<T>(
    left: Option<T>,
    right: Option<T>,
    direction: SortDirection,
    compare: impl FnOnce(&T, &T) -> Ordering,
) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => {
            let ordering = compare(&left, &right);
            match direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn format_clock(at: OffsetDateTime) -> String {
    at.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "--:--:--".to_owned())
}
