//! List query language for collection endpoints.
//!
//! Supports the query-string grammar clients use against list endpoints:
//!
//! - `field=value` equality (repeated keys on whitelisted fields mean "any of")
//! - `field[gte]=v`, `field[gt]=v`, `field[lte]=v`, `field[lt]=v`
//! - `sort=price,-ratingsAverage`
//! - `fields=name,price` projection (or `fields=-summary` exclusion)
//! - `page` / `limit` pagination
//!
//! Fields are resolved against a static [`FieldSpec`] catalog so only known
//! columns ever reach SQL.

mod builder;

pub use builder::ListQueryBuilder;

use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

/// Default page size.
pub const DEFAULT_LIMIT: u64 = 100;

/// Largest page a client may request.
pub const MAX_LIMIT: u64 = 100;

/// Keys that are never treated as filters.
const RESERVED_KEYS: &[&str] = &["page", "sort", "limit", "fields"];

static OPERATOR_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?P<field>[A-Za-z]+)\[(?P<op>gte|gt|lte|lt)\]$").ok());

/// Value type of a column, used to parse filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Number,
    Text,
    Other,
}

/// A field exposed by a list endpoint.
#[derive(Debug)]
pub struct FieldSpec {
    /// Name in JSON and in the query string.
    pub name: &'static str,
    /// Backing SQL column.
    pub column: &'static str,
    pub kind: FieldKind,
    pub filterable: bool,
    pub sortable: bool,
    /// Serialized by default; hidden fields can never be projected.
    pub default_visible: bool,
    /// Repeated query keys combine into an IN filter instead of the last one winning.
    pub multi_value: bool,
}

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }
}

/// A typed filter value.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Number(f64),
    Text(String),
}

/// A single `WHERE` condition.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: &'static FieldSpec,
    pub op: FilterOp,
    /// More than one value only for `Eq` on multi-value fields.
    pub values: Vec<FilterValue>,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Parsed list request.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    pub sort: Vec<(&'static FieldSpec, Direction)>,
    pub fields: Vec<&'static FieldSpec>,
    pub page: u64,
    pub limit: u64,
}

impl ListQuery {
    /// Parse raw query-string pairs against a field catalog.
    ///
    /// `default_sort` applies when the client sends no `sort`.
    pub fn parse(
        pairs: &[(String, String)],
        catalog: &'static [FieldSpec],
        default_sort: &str,
    ) -> Result<Self, AppError> {
        let grouped = group_pairs(pairs, catalog);

        let mut filters = Vec::new();
        let mut sort_param = None;
        let mut fields_param = None;
        let mut page = 1;
        let mut limit = DEFAULT_LIMIT;

        for (key, values) in &grouped {
            let Some(last) = values.last() else {
                continue;
            };
            match key.as_str() {
                "sort" => sort_param = Some(last.clone()),
                "fields" => fields_param = Some(last.clone()),
                "page" => page = parse_positive(key, last)?,
                "limit" => limit = parse_positive(key, last)?.min(MAX_LIMIT),
                _ => filters.push(parse_filter(key, values, catalog)?),
            }
        }

        // The offset must fit a Postgres BIGINT.
        if (page - 1)
            .checked_mul(limit)
            .is_none_or(|offset| offset > i64::MAX as u64)
        {
            return Err(AppError::bad_request(
                "Invalid value for 'page': page is out of range!",
            ));
        }

        let sort = parse_sort(sort_param.as_deref().unwrap_or(default_sort), catalog)?;
        let fields = parse_fields(fields_param.as_deref(), catalog)?;

        Ok(Self {
            filters,
            sort,
            fields,
            page,
            limit,
        })
    }

    /// True if the projection includes the named field.
    pub fn selects(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Rows to skip for the requested page. `parse` keeps this within
    /// `i64::MAX`.
    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.limit
    }
}

/// Group repeated keys, preserving first-seen order.
///
/// Parameter-pollution guard: a repeated key keeps only its last value
/// unless it names a multi-value field.
fn group_pairs(
    pairs: &[(String, String)],
    catalog: &'static [FieldSpec],
) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();

    for (key, value) in pairs {
        let multi = find_field(catalog, key).is_some_and(|f| f.multi_value);
        match grouped.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) if multi => values.push(value.clone()),
            Some((_, values)) => *values = vec![value.clone()],
            None => grouped.push((key.clone(), vec![value.clone()])),
        }
    }

    grouped
}

fn find_field(catalog: &'static [FieldSpec], name: &str) -> Option<&'static FieldSpec> {
    catalog.iter().find(|f| f.name == name)
}

fn parse_positive(key: &str, value: &str) -> Result<u64, AppError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(AppError::bad_request(format!(
            "Invalid value for '{key}': must be a positive integer!"
        ))),
    }
}

fn parse_filter(
    key: &str,
    values: &[String],
    catalog: &'static [FieldSpec],
) -> Result<Filter, AppError> {
    debug_assert!(!RESERVED_KEYS.contains(&key));

    let (name, op) = match OPERATOR_KEY.as_ref().and_then(|re| re.captures(key)) {
        Some(caps) => {
            let field = caps.name("field").map(|m| m.as_str()).unwrap_or_default();
            let op = caps
                .name("op")
                .and_then(|m| FilterOp::parse(m.as_str()))
                .unwrap_or(FilterOp::Eq);
            (field, op)
        }
        None => (key, FilterOp::Eq),
    };

    let field = find_field(catalog, name)
        .filter(|f| f.filterable)
        .ok_or_else(|| AppError::bad_request(format!("Invalid filter field: {name}")))?;

    if op != FilterOp::Eq && field.kind != FieldKind::Number {
        return Err(AppError::bad_request(format!(
            "Range filters are only supported on numeric fields, not '{name}'!"
        )));
    }

    let values = values
        .iter()
        .map(|raw| parse_value(field, raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Filter { field, op, values })
}

fn parse_value(field: &FieldSpec, raw: &str) -> Result<FilterValue, AppError> {
    match field.kind {
        FieldKind::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(FilterValue::Number)
            .ok_or_else(|| {
                AppError::bad_request(format!("Invalid {}: {raw}", field.name))
            }),
        FieldKind::Text | FieldKind::Other => Ok(FilterValue::Text(raw.to_string())),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_sort(
    raw: &str,
    catalog: &'static [FieldSpec],
) -> Result<Vec<(&'static FieldSpec, Direction)>, AppError> {
    split_list(raw)
        .map(|part| {
            let (name, direction) = match part.strip_prefix('-') {
                Some(name) => (name, Direction::Desc),
                None => (part, Direction::Asc),
            };
            find_field(catalog, name)
                .filter(|f| f.sortable)
                .map(|f| (f, direction))
                .ok_or_else(|| AppError::bad_request(format!("Invalid sort field: {name}")))
        })
        .collect()
}

fn parse_fields(
    raw: Option<&str>,
    catalog: &'static [FieldSpec],
) -> Result<Vec<&'static FieldSpec>, AppError> {
    let defaults = || -> Vec<&'static FieldSpec> {
        catalog.iter().filter(|f| f.default_visible).collect()
    };

    let Some(raw) = raw else {
        return Ok(defaults());
    };

    let parts: Vec<&str> = split_list(raw).collect();
    if parts.is_empty() {
        return Ok(defaults());
    }

    let lookup = |name: &str| {
        find_field(catalog, name)
            .filter(|f| f.default_visible)
            .ok_or_else(|| AppError::bad_request(format!("Invalid field: {name}")))
    };

    if parts.iter().all(|p| p.starts_with('-')) {
        let excluded = parts
            .iter()
            .map(|p| lookup(&p[1..]))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(defaults()
            .into_iter()
            .filter(|f| f.name == "id" || !excluded.iter().any(|e| e.name == f.name))
            .collect());
    }

    let mut selected: Vec<&'static FieldSpec> = Vec::new();
    if let Some(id) = find_field(catalog, "id") {
        selected.push(id);
    }
    for part in parts {
        let field = lookup(part.trim_start_matches('-'))?;
        if !selected.iter().any(|f| f.name == field.name) {
            selected.push(field);
        }
    }
    Ok(selected)
}
