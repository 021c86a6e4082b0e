//! Object-safe view of an `ExecutionRepository`.
//!
//! `ExecutionRepository` uses `impl Future` returns and so cannot be a trait
//! object. The replay context only needs to load and store its own row, so
//! it goes through this boxed-future bridge instead of becoming generic.
//! It can read its row but only ever write the progress columns.

use chrono::{DateTime, Utc};
use duraflow_types::error::RepositoryError;
use duraflow_types::execution::Execution;
use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::repository::ExecutionRepository;

pub trait ExecutionStore: Send + Sync {
    fn load<'a>(
        &'a self,
        id: &'a Uuid,
    ) -> BoxFuture<'a, Result<Option<Execution>, RepositoryError>>;

    fn store_progress<'a>(
        &'a self,
        id: &'a Uuid,
        state: &'a str,
        wake_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<bool, RepositoryError>>;
}

impl<R: ExecutionRepository> ExecutionStore for R {
    fn load<'a>(
        &'a self,
        id: &'a Uuid,
    ) -> BoxFuture<'a, Result<Option<Execution>, RepositoryError>> {
        Box::pin(self.find_by_id(id))
    }

    fn store_progress<'a>(
        &'a self,
        id: &'a Uuid,
        state: &'a str,
        wake_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<bool, RepositoryError>> {
        Box::pin(self.save_progress(id, state, wake_at))
    }
}
