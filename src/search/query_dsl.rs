// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Elasticsearch query DSL translator
//!
//! Renders compiled [`Clause`]s and a [`SearchBody`] into the JSON body of a
//! `_search` request.
//!
//! ```text
//! []                     -> {"match_all": {}}
//! [c1, c2, ...]          -> {"bool": {"must": [c1, c2, ...]}}
//! Exact(field, v)        -> {"match": {field: v}}
//! MultiMatch(q, fields)  -> {"multi_match": {"query": q, "fields": [...]}}
//! Range(field, gte, lte) -> {"range": {field: {"gte": .., "lte": ..}}}
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::aggregation::AggregationPlan;
use super::filter::Clause;
use super::response::SORT_FIELD;

/// Timestamp sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order '{}' (expected asc or desc)", other)),
        }
    }
}

/// Backend-neutral search request: compiled clauses plus paging, sort and facets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchBody {
    pub clauses: Vec<Clause>,
    pub from: u64,
    pub size: u64,
    pub sort: Option<SortOrder>,
    pub aggregations: Option<AggregationPlan>,
}

impl SearchBody {
    /// A page of hits sorted by timestamp
    #[must_use]
    pub fn page(clauses: Vec<Clause>, from: u64, size: u64, sort: SortOrder) -> Self {
        Self {
            clauses,
            from,
            size,
            sort: Some(sort),
            aggregations: None,
        }
    }

    /// Aggregations only, no hits
    #[must_use]
    pub fn stats(clauses: Vec<Clause>, plan: AggregationPlan) -> Self {
        Self {
            clauses,
            from: 0,
            size: 0,
            sort: None,
            aggregations: Some(plan),
        }
    }
}

/// Clause/body to Elasticsearch JSON translator
pub struct QueryDslTranslator;

impl QueryDslTranslator {
    /// Translate a full search body
    #[must_use]
    pub fn translate(body: &SearchBody) -> Value {
        let mut out = Map::new();
        if body.size > 0 {
            out.insert("from".into(), json!(body.from));
        }
        out.insert("size".into(), json!(body.size));
        out.insert("query".into(), Self::translate_query(&body.clauses));
        if let Some(order) = body.sort {
            out.insert(
                "sort".into(),
                json!([{ SORT_FIELD: { "order": order.as_str() } }]),
            );
        }
        if let Some(plan) = &body.aggregations {
            out.insert("aggs".into(), plan.to_dsl());
        }
        Value::Object(out)
    }

    /// Empty clause list matches everything
    #[must_use]
    pub fn translate_query(clauses: &[Clause]) -> Value {
        if clauses.is_empty() {
            return json!({ "match_all": {} });
        }
        let must: Vec<Value> = clauses.iter().map(Self::translate_clause).collect();
        json!({ "bool": { "must": must } })
    }

    #[must_use]
    pub fn translate_clause(clause: &Clause) -> Value {
        match clause {
            Clause::Exact { field, value } => json!({ "match": { field.as_str(): value } }),
            Clause::MultiMatch { query, fields } => {
                let fields: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
                json!({ "multi_match": { "query": query, "fields": fields } })
            }
            Clause::Range { field, gte, lte } => {
                let mut bounds = Map::new();
                if let Some(gte) = gte {
                    bounds.insert("gte".into(), json!(gte));
                }
                if let Some(lte) = lte {
                    bounds.insert("lte".into(), json!(lte));
                }
                json!({ "range": { field.as_str(): bounds } })
            }
        }
    }
}
