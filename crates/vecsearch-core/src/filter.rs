use serde::{Deserialize, Serialize};

/// Predicate over document attributes, evaluated by the attribute index into
/// the set of nodes a filtered search may return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterExpr {
    /// Exact string match on one attribute.
    Match { key: String, value: String },
    /// Inclusive integer range on an attribute whose value parses as `i64`.
    Range {
        key: String,
        gte: Option<i64>,
        lte: Option<i64>,
    },
    /// Document id membership, e.g. `id:(0 1 2 3 4)`.
    IdIn { ids: Vec<String> },
    And { all: Vec<FilterExpr> },
    Or { any: Vec<FilterExpr> },
    Not { expr: Box<FilterExpr> },
}

impl FilterExpr {
    pub fn matches(key: impl Into<String>, value: impl Into<String>) -> Self {
        FilterExpr::Match {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterExpr::IdIn {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(key: impl Into<String>, gte: Option<i64>, lte: Option<i64>) -> Self {
        FilterExpr::Range {
            key: key.into(),
            gte,
            lte,
        }
    }

    #[must_use]
    pub fn and(self, other: FilterExpr) -> Self {
        match self {
            FilterExpr::And { mut all } => {
                all.push(other);
                FilterExpr::And { all }
            }
            first => FilterExpr::And {
                all: vec![first, other],
            },
        }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        FilterExpr::Not {
            expr: Box::new(self),
        }
    }
}
