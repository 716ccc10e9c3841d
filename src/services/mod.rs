use sea_orm::{ConnectionTrait, DbBackend, EntityTrait, QuerySelect, Select};
use serde::Serialize;
use validator::ValidationError;

pub mod approvals;
pub mod audit;
pub mod branches;
pub mod fifo;
pub mod products;
pub mod stock;
pub mod tenancy;
pub mod transfers;

/// Page selection after clamping. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    /// Builds a request from raw query values. Missing or zero values fall
    /// back to the defaults and the limit is capped at `max_limit`.
    pub fn clamped(page: Option<u64>, limit: Option<u64>, default_limit: u64, max_limit: u64) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(default_limit)
            .min(max_limit.max(1));
        Self { page, limit }
    }

    /// Zero-based page index for sea-orm paginators.
    pub fn index(&self) -> u64 {
        self.page.saturating_sub(1)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

/// One page of a list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            total.div_ceil(request.limit)
        };
        Self {
            items,
            total,
            page: request.page,
            limit: request.limit,
            total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
        }
    }
}

/// Slugs are 1-63 chars of lowercase ASCII letters, digits and inner
/// hyphens.
pub(crate) fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    let valid = !slug.is_empty()
        && slug.len() <= 63
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_slug"))
    }
}

/// Adds `FOR UPDATE` on Postgres. SQLite serializes writers already and has
/// no row locks.
pub(crate) fn for_update<C, E>(conn: &C, select: Select<E>) -> Select<E>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    if conn.get_database_backend() == DbBackend::Postgres {
        select.lock_exclusive()
    } else {
        select
    }
}
