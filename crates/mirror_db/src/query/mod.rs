//! Read path: filtered, sorted, paged queries over the replica.
//!
//! A request is an [`EntityQuery`]. It is validated and compiled into a single
//! statement that joins the base table with the requesting user's overlay rows;
//! a second statement with the same predicates yields the total count.
//!
//! ```rust,ignore
//! use mirror_db::query::{CatalogReader, Criterion, EntityQuery, Modifier};
//!
//! let query = EntityQuery::new(EntityKind::Scene)
//!     .text("beach")
//!     .filter(Criterion::related("performers", Modifier::Includes, ["42:A"]));
//! let page = reader.find::<SceneAttrs>(&user, &query).await?;
//! ```

mod builder;
mod filter;
mod plan;
mod reader;

pub use filter::{
    Criterion, EntityQuery, FindFilter, Modifier, SortDirection, DEFAULT_PER_PAGE, MAX_PER_PAGE,
    RELEVANCE_SORT,
};
pub use reader::{CatalogReader, EntityRow, QueryPage};

use crate::error::DbError;
use mirror_ids::RefError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    /// The request itself is wrong. Nothing was executed.
    #[error("Invalid query: {0}")]
    Validation(String),

    #[error("Identity error: {0}")]
    Identity(#[from] RefError),

    /// The initial full sync has not completed yet.
    #[error("Replica is not ready: initial sync still running")]
    NotReady,

    #[error(transparent)]
    Database(#[from] DbError),
}

impl QueryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(DbError::Sqlx(err))
    }
}
