// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filter compiler - turns a declarative [`Filter`] into search clauses
//!
//! Every present field contributes exactly one [`Clause`], always in the same
//! order, so identical filters compile to identical clause lists.
//!
//! # Example
//!
//! ```rust
//! use error_insights::search::{Clause, EventField, Filter, FilterCompiler};
//!
//! let filter = Filter::new()
//!     .with_user_id("u1")
//!     .with_date_start("2025-07-15T10:10:00Z");
//!
//! let clauses = FilterCompiler::compile(&filter);
//! assert_eq!(clauses.len(), 2);
//! assert_eq!(
//!     clauses[0],
//!     Clause::Exact { field: EventField::UserId, value: "u1".into() }
//! );
//! ```

use serde::{Deserialize, Serialize};

/// Fields of an indexed error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventField {
    Timestamp,
    UserId,
    Browser,
    Url,
    ErrorMessage,
    StackTrace,
}

impl EventField {
    /// Field name as stored in the search index
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventField::Timestamp => "timestamp",
            EventField::UserId => "userId",
            EventField::Browser => "browser",
            EventField::Url => "url",
            EventField::ErrorMessage => "errorMessage",
            EventField::StackTrace => "stackTrace",
        }
    }
}

impl std::fmt::Display for EventField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields searched by the free-text `query` filter, in match order.
pub const FREE_TEXT_FIELDS: [EventField; 3] =
    [EventField::ErrorMessage, EventField::StackTrace, EventField::Url];

/// One search-engine query clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Clause {
    /// Exact match of a keyword field
    Exact { field: EventField, value: String },
    /// Full-text match across several fields
    MultiMatch { query: String, fields: Vec<EventField> },
    /// Inclusive range; at least one bound is always present
    Range {
        field: EventField,
        gte: Option<String>,
        lte: Option<String>,
    },
}

/// Optional-field predicate set for search and stats requests.
///
/// `None` and the empty string both mean "no constraint on this field".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub date_start: Option<String>,
    #[serde(default)]
    pub date_end: Option<String>,
}

impl Filter {
    /// Create an empty filter (matches everything)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user_id(mut self, value: impl Into<String>) -> Self {
        self.user_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_url(mut self, value: impl Into<String>) -> Self {
        self.url = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_browser(mut self, value: impl Into<String>) -> Self {
        self.browser = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_query(mut self, value: impl Into<String>) -> Self {
        self.query = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_date_start(mut self, value: impl Into<String>) -> Self {
        self.date_start = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_date_end(mut self, value: impl Into<String>) -> Self {
        self.date_end = Some(value.into());
        self
    }

    /// True when no field constrains the result set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        FilterCompiler::compile(self).is_empty()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Filter to clause compiler
pub struct FilterCompiler;

impl FilterCompiler {
    /// Compile a filter into clauses: `userId`, `url`, `browser`, free-text,
    /// then a single date range.
    #[must_use]
    pub fn compile(filter: &Filter) -> Vec<Clause> {
        let mut clauses = Vec::new();

        let exact = [
            (EventField::UserId, &filter.user_id),
            (EventField::Url, &filter.url),
            (EventField::Browser, &filter.browser),
        ];
        for (field, value) in exact {
            if let Some(value) = present(value) {
                clauses.push(Clause::Exact {
                    field,
                    value: value.to_string(),
                });
            }
        }

        if let Some(query) = present(&filter.query) {
            clauses.push(Clause::MultiMatch {
                query: query.to_string(),
                fields: FREE_TEXT_FIELDS.to_vec(),
            });
        }

        let gte = present(&filter.date_start).map(str::to_string);
        let lte = present(&filter.date_end).map(str::to_string);
        if gte.is_some() || lte.is_some() {
            clauses.push(Clause::Range {
                field: EventField::Timestamp,
                gte,
                lte,
            });
        }

        clauses
    }
}
