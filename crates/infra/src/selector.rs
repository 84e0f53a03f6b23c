//! Candidate selection.
//!
//! A counting pass fixes the candidate total; a second, lazy pass walks the
//! store page by page (keyset-paginated on student id) and yields candidates.
//! The second pass stops once `total` candidates have been yielded, so rows
//! inserted mid-run cannot push `attempted` past the published total.

use std::collections::VecDeque;

use coursetasks_core::StudentId;
use coursetasks_tasks::{ContentFilter, FilterError};

use crate::modules::{ModuleStateQuery, ModuleStateRecord, ModuleStateStore, ModuleStoreError};

/// A record admitted into a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Eligible(ModuleStateRecord),
    /// The filter could not evaluate the record's state; counted as skipped.
    Unreadable {
        record: ModuleStateRecord,
        reason: FilterError,
    },
}

impl Candidate {
    pub fn record(&self) -> &ModuleStateRecord {
        match self {
            Candidate::Eligible(record) | Candidate::Unreadable { record, .. } => record,
        }
    }

    pub fn student(&self) -> &StudentId {
        &self.record().student
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SelectionError {
    #[error("failed to read candidates: {0}")]
    Store(#[from] ModuleStoreError),
}

/// Sized candidate set for one run.
pub struct Selection<'a, S: ?Sized> {
    pub total: u64,
    pub candidates: CandidatePages<'a, S>,
}

/// Select the candidates `query` and `filter` admit.
pub fn select<'a, S>(
    store: &'a S,
    query: ModuleStateQuery,
    filter: Option<ContentFilter>,
    page_size: usize,
) -> Result<Selection<'a, S>, SelectionError>
where
    S: ModuleStateStore + ?Sized,
{
    let page_size = page_size.max(1);
    let total = match filter {
        None => store.count(&query)?,
        Some(_) => {
            let mut admitted = 0u64;
            let mut scan = CandidatePages::new(store, query.clone(), filter, page_size, u64::MAX);
            for candidate in &mut scan {
                candidate?;
                admitted += 1;
            }
            admitted
        }
    };

    Ok(Selection {
        total,
        candidates: CandidatePages::new(store, query, filter, page_size, total),
    })
}

/// Classify one record; `None` means the filter excluded it.
pub fn classify(filter: Option<ContentFilter>, record: ModuleStateRecord) -> Option<Candidate> {
    let Some(filter) = filter else {
        return Some(Candidate::Eligible(record));
    };
    match filter.evaluate(record.state.as_deref()) {
        Ok(true) => Some(Candidate::Eligible(record)),
        Ok(false) => None,
        Err(reason) => Some(Candidate::Unreadable { record, reason }),
    }
}

/// Lazy, page-at-a-time candidate iterator.
pub struct CandidatePages<'a, S: ?Sized> {
    store: &'a S,
    query: ModuleStateQuery,
    filter: Option<ContentFilter>,
    page_size: usize,
    remaining: u64,
    buffer: VecDeque<ModuleStateRecord>,
    cursor: Option<StudentId>,
    exhausted: bool,
}

impl<'a, S> CandidatePages<'a, S>
where
    S: ModuleStateStore + ?Sized,
{
    fn new(
        store: &'a S,
        query: ModuleStateQuery,
        filter: Option<ContentFilter>,
        page_size: usize,
        limit: u64,
    ) -> Self {
        Self {
            store,
            query,
            filter,
            page_size,
            remaining: limit,
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    fn fetch_page(&mut self) -> Result<(), ModuleStoreError> {
        let page = self
            .store
            .page(&self.query, self.cursor.as_ref(), self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(last.student.clone());
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<S> Iterator for CandidatePages<'_, S>
where
    S: ModuleStateStore + ?Sized,
{
    type Item = Result<Candidate, SelectionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == 0 {
                return None;
            }
            if let Some(record) = self.buffer.pop_front() {
                if let Some(candidate) = classify(self.filter, record) {
                    self.remaining -= 1;
                    return Some(Ok(candidate));
                }
                continue;
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e.into()));
            }
        }
    }
}
