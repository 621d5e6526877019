//! Resumable enumeration over the appliance's page-based listings.
//!
//! The appliance serves numbered pages whose contents may shift between
//! requests. [`list`] stitches pages into a caller-sized window and hands
//! back a [`ListingToken`] that remembers the page, the cache-busting
//! disambiguator and the last item returned, so a later call can skip
//! anything the caller has already seen.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::appliance::ResourceError;

/// Errors raised while parsing a listing token.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TokenError {
    /// Raised when the token does not have the `page_dc[_id]` shape.
    #[error("malformed listing token '{token}': {reason}")]
    Malformed {
        /// Token as supplied by the caller.
        token: String,
        /// Which part failed to parse.
        reason: &'static str,
    },
}

/// Cursor threaded through successive page fetches.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListingToken {
    page: i64,
    disambiguator: i64,
    last_seen_id: String,
}

impl ListingToken {
    /// Starts a listing at page zero with a random positive disambiguator.
    #[must_use]
    pub fn fresh() -> Self {
        let (high, _) = Uuid::new_v4().as_u64_pair();
        let disambiguator = i64::try_from(high >> 1).unwrap_or(i64::MAX).max(1);
        Self::new(0, disambiguator, "")
    }

    /// Builds a token from its parts.
    #[must_use]
    pub fn new(page: i64, disambiguator: i64, last_seen_id: impl Into<String>) -> Self {
        Self {
            page,
            disambiguator,
            last_seen_id: last_seen_id.into(),
        }
    }

    /// Parses a caller-supplied token; an empty string starts afresh.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Malformed`] when the token cannot be parsed.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        if raw.is_empty() {
            return Ok(Self::fresh());
        }
        raw.parse()
    }

    /// Backend page the next fetch targets.
    #[must_use]
    pub const fn page(&self) -> i64 {
        self.page
    }

    /// Value echoed to the appliance to pin a consistent page sequence.
    #[must_use]
    pub const fn disambiguator(&self) -> i64 {
        self.disambiguator
    }

    /// Identifier of the last item handed to the caller.
    #[must_use]
    pub fn last_seen_id(&self) -> &str {
        &self.last_seen_id
    }
}

impl fmt::Display for ListingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.last_seen_id.is_empty() {
            write!(f, "{}_{}", self.page, self.disambiguator)
        } else {
            write!(f, "{}_{}_{}", self.page, self.disambiguator, self.last_seen_id)
        }
    }
}

impl FromStr for ListingToken {
    type Err = TokenError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = |reason| TokenError::Malformed {
            token: raw.to_owned(),
            reason,
        };
        let mut parts = raw.splitn(3, '_');
        let page = parts
            .next()
            .and_then(|part| part.parse::<i64>().ok())
            .filter(|page| *page >= 0)
            .ok_or_else(|| malformed("page is not a non-negative integer"))?;
        let disambiguator = parts
            .next()
            .and_then(|part| part.parse::<i64>().ok())
            .ok_or_else(|| malformed("disambiguator is not an integer"))?;
        let last_seen_id = parts.next().unwrap_or_default();
        Ok(Self::new(page, disambiguator, last_seen_id))
    }
}

/// Window of items returned by one [`list`] call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Listing<T> {
    /// Items in backend order.
    pub items: Vec<T>,
    /// Cursor for the next call; `None` once the backend is exhausted.
    pub next: Option<ListingToken>,
}

/// Collects up to `max_return` items starting at `token`.
///
/// `fetch_page` returns the backend page named by the token, or an empty
/// page once the listing is exhausted. `id_of` identifies items so that a
/// resumed listing can skip what it already returned. A `max_return` of
/// zero collects everything and never yields a next token.
///
/// # Errors
///
/// Propagates the first [`ResourceError`] returned by `fetch_page`.
pub async fn list<T, F, Fut, I>(
    max_return: usize,
    mut token: ListingToken,
    mut fetch_page: F,
    id_of: I,
) -> Result<Listing<T>, ResourceError>
where
    F: FnMut(ListingToken) -> Fut,
    Fut: Future<Output = Result<Vec<T>, ResourceError>>,
    I: Fn(&T) -> String,
{
    let mut items = Vec::new();
    loop {
        let page = fetch_page(token.clone()).await?;
        if page.is_empty() {
            debug!(page = token.page, collected = items.len(), "listing exhausted");
            return Ok(Listing { items, next: None });
        }

        if token.last_seen_id.is_empty() {
            items.extend(page);
        } else {
            let marker = page.iter().position(|item| id_of(item) == token.last_seen_id);
            match marker {
                Some(position) => items.extend(page.into_iter().skip(position.saturating_add(1))),
                None => {
                    debug!(page = token.page, marker = %token.last_seen_id, "resume marker moved off page");
                    items.extend(page);
                }
            }
            token.last_seen_id.clear();
        }

        if max_return > 0 && items.len() >= max_return {
            items.truncate(max_return);
            let next = items
                .last()
                .map(|item| ListingToken::new(token.page, token.disambiguator, id_of(item)));
            return Ok(Listing { items, next });
        }

        token.page = token.page.saturating_add(1);
    }
}
