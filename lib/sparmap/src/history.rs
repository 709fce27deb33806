//! Paged read models over the commit history of a store.
//!
//! The data comes from a [`StoreHistory`] implementation. The functions of this module only
//! normalize the request, fetch one more element than requested to know if there is a next
//! page and build the response models.

use std::collections::BTreeMap;
use std::error::Error;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

/// Page size used when a request does not set one.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// A point in the history of a store.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CommitPoint {
    pub id: u64,
    pub store_name: String,
    pub commit_time: OffsetDateTime,
    pub job_id: String,
}

/// Triple counts of a store at a given commit.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct StoreStatistics {
    pub commit_id: u64,
    pub commit_timestamp: Option<OffsetDateTime>,
    pub predicate_triple_counts: Option<BTreeMap<String, u64>>,
    pub total_triple_count: u64,
}

/// Access to the history of the stores.
///
/// Time ranges are given latest bound first. Listing methods return the commits in
/// reverse chronological order.
pub trait StoreHistory {
    fn commit_points(
        &self,
        store_name: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<CommitPoint>, HistoryError>;

    fn commit_points_between(
        &self,
        store_name: &str,
        latest: OffsetDateTime,
        earliest: OffsetDateTime,
        skip: usize,
        take: usize,
    ) -> Result<Vec<CommitPoint>, HistoryError>;

    /// The commit point that was current at the given time.
    fn commit_point_at(
        &self,
        store_name: &str,
        timestamp: OffsetDateTime,
    ) -> Result<Option<CommitPoint>, HistoryError>;

    fn commit_point(&self, store_name: &str, id: u64) -> Result<Option<CommitPoint>, HistoryError>;

    fn statistics(
        &self,
        store_name: &str,
        latest: OffsetDateTime,
        earliest: OffsetDateTime,
        skip: usize,
        take: usize,
    ) -> Result<Vec<StoreStatistics>, HistoryError>;

    fn revert_to_commit_point(
        &self,
        store_name: &str,
        commit_point: &CommitPoint,
    ) -> Result<(), HistoryError>;
}

/// An error raised while reading or reverting the history of a store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HistoryError {
    #[error("The earliest bound {earliest} is after the latest bound {latest}")]
    InvalidTimeRange {
        earliest: OffsetDateTime,
        latest: OffsetDateTime,
    },
    #[error("The page starting at {skip} with {take} elements is out of range")]
    InvalidPage { skip: usize, take: usize },
    #[error("No commit point found in store {store_name} at {timestamp}")]
    CommitPointNotFound {
        store_name: String,
        timestamp: OffsetDateTime,
    },
    #[error("The commit point {id} does not exist in store {store_name}")]
    UnknownCommitPoint { store_name: String, id: u64 },
    #[error("The commit point belongs to store {actual} and not to store {expected}")]
    StoreNameMismatch { expected: String, actual: String },
    #[error(transparent)]
    TimeFormat(#[from] time::error::Format),
    /// The history backend failed.
    #[error(transparent)]
    Backend(Box<dyn Error + Send + Sync>),
}

#[derive(Eq, PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommitPointResponse {
    pub id: u64,
    pub store_name: String,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub commit_time: OffsetDateTime,
    pub job_id: String,
}

impl From<CommitPoint> for CommitPointResponse {
    fn from(commit_point: CommitPoint) -> Self {
        Self {
            id: commit_point.id,
            store_name: commit_point.store_name,
            commit_time: commit_point.commit_time,
            job_id: commit_point.job_id,
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatisticsResponse {
    pub commit_id: u64,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub commit_timestamp: Option<OffsetDateTime>,
    pub predicate_triple_counts: BTreeMap<String, u64>,
    pub total_triple_count: u64,
}

impl From<StoreStatistics> for StatisticsResponse {
    fn from(statistics: StoreStatistics) -> Self {
        Self {
            commit_id: statistics.commit_id,
            commit_timestamp: statistics.commit_timestamp,
            predicate_triple_counts: statistics.predicate_triple_counts.unwrap_or_default(),
            total_triple_count: statistics.total_triple_count,
        }
    }
}

/// Request for the commit history of a store.
///
/// If `timestamp` is set, only the commit point current at that time is returned.
/// The `latest` and `earliest` bounds are only used if both are set.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct CommitPointsRequest {
    pub store_name: String,
    pub skip: usize,
    pub take: Option<usize>,
    pub timestamp: Option<OffsetDateTime>,
    pub latest: Option<OffsetDateTime>,
    pub earliest: Option<OffsetDateTime>,
}

impl CommitPointsRequest {
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_page(mut self, skip: usize, take: usize) -> Self {
        self.skip = skip;
        self.take = Some(take);
        self
    }

    #[must_use]
    pub fn at(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn between(mut self, latest: OffsetDateTime, earliest: OffsetDateTime) -> Self {
        self.latest = Some(latest);
        self.earliest = Some(earliest);
        self
    }
}

/// Request for the statistics history of a store, open-ended by default.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct StatisticsRequest {
    pub store_name: String,
    pub skip: usize,
    /// `0` means [`DEFAULT_PAGE_SIZE`].
    pub take: usize,
    pub latest: Option<OffsetDateTime>,
    pub earliest: Option<OffsetDateTime>,
}

impl StatisticsRequest {
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_page(mut self, skip: usize, take: usize) -> Self {
        self.skip = skip;
        self.take = take;
        self
    }

    #[must_use]
    pub fn with_latest(mut self, latest: OffsetDateTime) -> Self {
        self.latest = Some(latest);
        self
    }

    #[must_use]
    pub fn with_earliest(mut self, earliest: OffsetDateTime) -> Self {
        self.earliest = Some(earliest);
        self
    }
}

/// One page of a listing.
#[derive(Eq, PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PagedList<T> {
    pub items: Vec<T>,
    pub skip: usize,
    pub take: usize,
    pub has_more: bool,
    pub resource_uri: String,
    pub previous_link: Option<String>,
    pub next_link: Option<String>,
}

impl<T> PagedList<T> {
    /// Builds a page from the result of a fetch of `take + 1` elements starting at `skip`.
    ///
    /// ```
    /// use sparmap::history::PagedList;
    ///
    /// let page = PagedList::from_fetch(vec![1, 2, 3], 4, 2, 10, "commits");
    /// assert_eq!(page.items, [1, 2]);
    /// assert!(page.has_more);
    /// assert_eq!(page.previous_link.as_deref(), Some("commits?skip=2&take=2"));
    /// assert_eq!(page.next_link.as_deref(), Some("commits?skip=6&take=2"));
    /// ```
    pub fn from_fetch(
        mut fetched: Vec<T>,
        skip: usize,
        take: usize,
        default_page_size: usize,
        resource_uri: impl Into<String>,
    ) -> Self {
        let resource_uri = resource_uri.into();
        let has_more = fetched.len() > take;
        fetched.truncate(take);
        let previous_link = (skip > 0).then(|| {
            page_link(
                &resource_uri,
                skip.saturating_sub(take),
                take,
                default_page_size,
            )
        });
        let next_link = has_more
            .then(|| page_link(&resource_uri, skip + take, take, default_page_size));
        Self {
            items: fetched,
            skip,
            take,
            has_more,
            resource_uri,
            previous_link,
            next_link,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedList<U> {
        PagedList {
            items: self.items.into_iter().map(f).collect(),
            skip: self.skip,
            take: self.take,
            has_more: self.has_more,
            resource_uri: self.resource_uri,
            previous_link: self.previous_link,
            next_link: self.next_link,
        }
    }
}

fn page_link(resource_uri: &str, skip: usize, take: usize, default_page_size: usize) -> String {
    let separator = if resource_uri.contains('?') { '&' } else { '?' };
    if take == default_page_size {
        format!("{resource_uri}{separator}skip={skip}")
    } else {
        format!("{resource_uri}{separator}skip={skip}&take={take}")
    }
}

/// Either a single commit point or a page of them, depending on the request.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum CommitPointsResponse {
    Single(CommitPointResponse),
    Page(PagedList<CommitPointResponse>),
}

/// Lists the commit points of a store.
pub fn list_commit_points(
    history: &impl StoreHistory,
    request: &CommitPointsRequest,
) -> Result<CommitPointsResponse, HistoryError> {
    if let Some(timestamp) = request.timestamp {
        return history
            .commit_point_at(&request.store_name, timestamp)?
            .map(|commit_point| CommitPointsResponse::Single(commit_point.into()))
            .ok_or_else(|| HistoryError::CommitPointNotFound {
                store_name: request.store_name.clone(),
                timestamp,
            });
    }
    let take = request.take.unwrap_or(DEFAULT_PAGE_SIZE);
    let fetch = fetch_size(request.skip, take)?;
    let (fetched, resource_uri) = if let (Some(latest), Some(earliest)) =
        (request.latest, request.earliest)
    {
        check_range(latest, earliest)?;
        let resource_uri = format!(
            "commits?latest={}&earliest={}",
            format_timestamp(latest)?,
            format_timestamp(earliest)?
        );
        let fetched = history.commit_points_between(
            &request.store_name,
            latest,
            earliest,
            request.skip,
            fetch,
        )?;
        (fetched, resource_uri)
    } else {
        let fetched = history.commit_points(&request.store_name, request.skip, fetch)?;
        (fetched, "commits".to_owned())
    };
    debug!(store = %request.store_name, count = fetched.len(), "fetched commit points");
    Ok(CommitPointsResponse::Page(
        PagedList::from_fetch(fetched, request.skip, take, DEFAULT_PAGE_SIZE, resource_uri)
            .map(CommitPointResponse::from),
    ))
}

/// Reverts a store to one of its commit points.
///
/// The commit point is looked up by id in the store named by the request path.
pub fn revert_to_commit_point(
    history: &impl StoreHistory,
    store_name: &str,
    commit_point: &CommitPointResponse,
) -> Result<(), HistoryError> {
    if commit_point.store_name != store_name {
        return Err(HistoryError::StoreNameMismatch {
            expected: store_name.to_owned(),
            actual: commit_point.store_name.clone(),
        });
    }
    let target = history
        .commit_point(store_name, commit_point.id)?
        .ok_or_else(|| HistoryError::UnknownCommitPoint {
            store_name: store_name.to_owned(),
            id: commit_point.id,
        })?;
    debug!(store = store_name, id = target.id, "reverting to commit point");
    history.revert_to_commit_point(store_name, &target)
}

/// Lists the statistics of a store.
pub fn list_statistics(
    history: &impl StoreHistory,
    request: &StatisticsRequest,
) -> Result<PagedList<StatisticsResponse>, HistoryError> {
    let resource_uri = format!("statistics{}", statistics_query_string(request)?);
    let latest = request.latest.unwrap_or(PrimitiveDateTime::MAX.assume_utc());
    let earliest = request.earliest.unwrap_or(PrimitiveDateTime::MIN.assume_utc());
    check_range(latest, earliest)?;
    let take = if request.take == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        request.take
    };
    let fetched = history.statistics(
        &request.store_name,
        latest,
        earliest,
        request.skip,
        fetch_size(request.skip, take)?,
    )?;
    Ok(
        PagedList::from_fetch(fetched, request.skip, take, DEFAULT_PAGE_SIZE, resource_uri)
            .map(StatisticsResponse::from),
    )
}

fn statistics_query_string(request: &StatisticsRequest) -> Result<String, HistoryError> {
    Ok(match (request.latest, request.earliest) {
        (Some(latest), Some(earliest)) => format!(
            "?latest={}&earliest={}",
            format_timestamp(latest)?,
            format_timestamp(earliest)?
        ),
        (Some(latest), None) => format!("?latest={}", format_timestamp(latest)?),
        (None, Some(earliest)) => format!("?earliest={}", format_timestamp(earliest)?),
        (None, None) => String::new(),
    })
}

fn fetch_size(skip: usize, take: usize) -> Result<usize, HistoryError> {
    take.checked_add(1)
        .filter(|_| skip.checked_add(take).is_some())
        .ok_or(HistoryError::InvalidPage { skip, take })
}

fn check_range(latest: OffsetDateTime, earliest: OffsetDateTime) -> Result<(), HistoryError> {
    if earliest > latest {
        return Err(HistoryError::InvalidTimeRange { earliest, latest });
    }
    Ok(())
}

/// Sortable date time, without offset nor fractional seconds.
fn format_timestamp(timestamp: OffsetDateTime) -> Result<String, HistoryError> {
    Ok(timestamp.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second]"
    ))?)
}
