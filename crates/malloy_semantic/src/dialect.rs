use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Hooks the expression evaluator consults when a fragment's rendering
/// varies per dialect. The SQL writer owns everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub name: &'static str,
    /// Function used for regular-expression matching.
    pub regexp_match_fn: &'static str,
    /// Function used for guarded division.
    pub div_fn: &'static str,
    pub supports_safe_cast: bool,
    pub supports_sampling: bool,
}

static DIALECTS: Lazy<HashMap<&'static str, Dialect>> = Lazy::new(|| {
    [
        Dialect {
            name: "standardsql",
            regexp_match_fn: "REGEXP_CONTAINS",
            div_fn: "IEEE_DIVIDE",
            supports_safe_cast: true,
            supports_sampling: true,
        },
        Dialect {
            name: "postgres",
            regexp_match_fn: "REGEXP_LIKE",
            div_fn: "DIV",
            supports_safe_cast: false,
            supports_sampling: false,
        },
        Dialect {
            name: "duckdb",
            regexp_match_fn: "REGEXP_MATCHES",
            div_fn: "DIVIDE",
            supports_safe_cast: true,
            supports_sampling: true,
        },
    ]
    .into_iter()
    .map(|d| (d.name, d))
    .collect()
});

pub fn get_dialect(name: &str) -> Option<&'static Dialect> {
    DIALECTS.get(name)
}
