use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::qa::Window;

#[derive(Debug, Deserialize, Default)]
pub struct PageQuery {
    pub page: Option<usize>,
}

/// One page of an already-ordered list.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: usize,
    pub num_pages: usize,
}

/// Where page `number` (1-based) falls in a listing of `total` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpan {
    pub number: usize,
    pub num_pages: usize,
    pub window: Window,
}

impl PageSpan {
    /// An empty list still has one empty page; anything outside
    /// `1..=num_pages` is `NotFound`.
    pub fn locate(total: usize, per_page: usize, number: usize) -> AppResult<Self> {
        let per_page = per_page.max(1);
        let num_pages = total.div_ceil(per_page).max(1);
        if number == 0 || number > num_pages {
            return Err(AppError::NotFound);
        }

        Ok(Self {
            number,
            num_pages,
            window: Window {
                offset: (number - 1) * per_page,
                limit: per_page,
            },
        })
    }
}

impl<T> Page<T> {
    /// Wrap items that were already fetched for `span`.
    pub fn from_span(items: Vec<T>, span: PageSpan) -> Self {
        Self {
            items,
            number: span.number,
            num_pages: span.num_pages,
        }
    }

    /// Cut page `number` out of an in-memory list.
    pub fn paginate(items: Vec<T>, per_page: usize, number: usize) -> AppResult<Self> {
        let span = PageSpan::locate(items.len(), per_page, number)?;
        let items = items
            .into_iter()
            .skip(span.window.offset)
            .take(span.window.limit)
            .collect();
        Ok(Self::from_span(items, span))
    }

    pub fn map<U>(self, f: impl FnMut(T) -> AppResult<U>) -> AppResult<Page<U>> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<AppResult<Vec<_>>>()?,
            number: self.number,
            num_pages: self.num_pages,
        })
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn previous_number(&self) -> usize {
        self.number.saturating_sub(1).max(1)
    }

    pub fn next_number(&self) -> usize {
        (self.number + 1).min(self.num_pages)
    }
}
