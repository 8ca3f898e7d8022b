pub mod attendance;
pub mod audit;
pub mod customer;
pub mod dashboard;
pub mod delivery;
pub mod employee;
pub mod notification;
pub mod pay_period;
pub mod payroll;
pub mod payslip;
pub mod product;
pub mod report;
pub mod sale;
pub mod user;

use serde::{Deserialize, Serialize};
use utoipa::IntoParams;
use validator::Validate;

use crate::error::AppError;

/// Deepest page a list endpoint will serve.
const MAX_PAGE: u32 = 1_000_000;

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
        let per_page = per_page.unwrap_or(20).clamp(1, 100);
        Self {
            page,
            per_page,
            offset: (page - 1).saturating_mul(per_page),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 1-based page number
    pub page: Option<u32>,
    /// Items per page (max 100)
    pub per_page: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T: Serialize> {
    pub data: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

impl<T: Serialize> Paginated<T> {
    pub fn new(data: Vec<T>, page: Page, total: i64) -> Self {
        Self {
            data,
            page: page.page,
            per_page: page.per_page,
            total,
        }
    }
}

pub fn validate<T: Validate>(payload: &T) -> Result<(), AppError> {
    payload.validate().map_err(AppError::from)
}

/// Filter value for dynamically assembled WHERE clauses.
#[derive(Debug, Clone)]
pub enum FilterValue {
    U64(u64),
    Str(String),
    Bool(bool),
}

/// Collects `AND`-joined conditions and their bindings.
#[derive(Debug, Default)]
pub struct Filters {
    conditions: Vec<&'static str>,
    args: Vec<FilterValue>,
}

impl Filters {
    pub fn push(&mut self, condition: &'static str, value: FilterValue) {
        self.conditions.push(condition);
        self.args.push(value);
    }

    /// `(a LIKE ? OR b LIKE ?)` style search across several columns.
    pub fn push_search(&mut self, condition: &'static str, columns: usize, term: &str) {
        let like = format!("%{}%", term.trim());
        self.conditions.push(condition);
        for _ in 0..columns {
            self.args.push(FilterValue::Str(like.clone()));
        }
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn args(&self) -> &[FilterValue] {
        &self.args
    }
}

/// Binds filter values in order onto any sqlx query builder.
macro_rules! bind_filters {
    ($query:expr, $filters:expr) => {{
        let mut q = $query;
        for arg in $filters.args() {
            q = match arg {
                $crate::api::FilterValue::U64(v) => q.bind(*v),
                $crate::api::FilterValue::Str(s) => q.bind(s.clone()),
                $crate::api::FilterValue::Bool(b) => q.bind(*b),
            };
        }
        q
    }};
}
pub(crate) use bind_filters;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_and_clamps() {
        let p = Page::new(None, None);
        assert_eq!((p.page, p.per_page, p.offset), (1, 20, 0));

        let p = Page::new(Some(0), Some(1000));
        assert_eq!((p.page, p.per_page, p.offset), (1, 100, 0));

        let p = Page::new(Some(3), Some(10));
        assert_eq!(p.offset, 20);

        let p = Page::new(Some(u32::MAX), Some(100));
        assert_eq!(p.page, MAX_PAGE);
        assert_eq!(p.offset, (MAX_PAGE - 1) * 100);
    }

    #[test]
    fn filters_build_where_clause() {
        let mut f = Filters::default();
        assert_eq!(f.where_clause(), "");

        f.push("status = ?", FilterValue::Str("draft".into()));
        f.push_search("(name LIKE ? OR sku LIKE ?)", 2, " cement ");
        assert_eq!(
            f.where_clause(),
            " WHERE status = ? AND (name LIKE ? OR sku LIKE ?)"
        );
        assert_eq!(f.args().len(), 3);
        assert!(matches!(&f.args()[1], FilterValue::Str(s) if s == "%cement%"));
    }
}
