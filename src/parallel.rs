//! Chunk jobs over a query, sequential or on the rayon pool
//!
//! A job hands each chunk of a query to the same closure. Chunks cover
//! disjoint row ranges, so in parallel mode every worker gets exclusive
//! access to its rows. The store stays mutably borrowed for the whole run;
//! structural changes have to go through a `CommandBuffer` and be played
//! back afterwards.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "parallel")]
use rayon::ThreadPool;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::chunk::{QueryChunk, QueryComponents};
use crate::error::Result;
use crate::query::ArchetypeQuery;
use crate::store::EntityStore;

/// Closure bound to a query, created by [`ArchetypeQuery::for_each`]
pub struct QueryJob<'q, Q, F>
where
    Q: QueryComponents,
{
    query: &'q mut ArchetypeQuery<Q>,
    f: F,
    #[cfg(feature = "parallel")]
    pool: Option<&'q ThreadPool>,
}

impl<'q, Q, F> QueryJob<'q, Q, F>
where
    Q: QueryComponents,
    F: for<'c> Fn(QueryChunk<'c, Q>) + Send + Sync,
{
    pub(crate) fn new(query: &'q mut ArchetypeQuery<Q>, f: F) -> Self {
        Self {
            query,
            f,
            #[cfg(feature = "parallel")]
            pool: None,
        }
    }

    /// Run on `pool` instead of the global rayon pool
    #[cfg(feature = "parallel")]
    pub fn with_pool(mut self, pool: &'q ThreadPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Run every chunk on the calling thread
    pub fn run(self, store: &mut EntityStore) -> Result<()> {
        let descs = self.query.chunk_descs(store)?;
        let indices = self.query.indices();
        let read_only = *self.query.read_only_types();
        for desc in &descs {
            // SAFETY: each descriptor is used once and the store is exclusively
            // borrowed until the loop ends
            (self.f)(unsafe { desc.query_chunk::<Q>(indices, &read_only) });
        }
        Ok(())
    }

    /// Distribute chunks over the thread pool.
    ///
    /// Falls back to [`run`](Self::run) when the query covers fewer rows than
    /// `StoreConfig::min_parallel_chunk_length` or yields a single chunk.
    #[cfg(feature = "parallel")]
    pub fn run_parallel(self, store: &mut EntityStore) -> Result<()> {
        #[cfg(feature = "profiling")]
        let span = info_span!("query.run_parallel");
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let min_rows = store.config().min_parallel_chunk_length;
        let descs = self.query.chunk_descs(store)?;
        let rows: usize = descs.iter().map(|desc| desc.range.len()).sum();
        if descs.len() < 2 || rows < min_rows {
            tracing::trace!(chunks = descs.len(), rows, "parallel job below threshold");
            let indices = self.query.indices();
            let read_only = *self.query.read_only_types();
            for desc in &descs {
                // SAFETY: as in `run`
                (self.f)(unsafe { desc.query_chunk::<Q>(indices, &read_only) });
            }
            return Ok(());
        }

        let indices = self.query.indices();
        let read_only = *self.query.read_only_types();
        let f = &self.f;
        let work = || {
            descs.par_iter().for_each(|desc| {
                // SAFETY: descriptors cover disjoint row ranges and each one is
                // handed to exactly one worker
                f(unsafe { desc.query_chunk::<Q>(indices, &read_only) });
            });
        };
        match self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
        Ok(())
    }

    #[cfg(not(feature = "parallel"))]
    pub fn run_parallel(self, store: &mut EntityStore) -> Result<()> {
        self.run(store)
    }
}
