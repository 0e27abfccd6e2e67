//! Assembles the page and count statements from a [`QueryPlan`].

use super::plan::QueryPlan;
use crate::overlay::{overlay_select, stats_table};
use mirror_ids::UserId;
use sqlx::{QueryBuilder, Sqlite};

/// `FROM ... WHERE ...` shared by the page and the count statement, so both
/// see identical predicates.
fn push_from_where(qb: &mut QueryBuilder<'_, Sqlite>, plan: &QueryPlan, user: &UserId) {
    let layout = plan.layout;
    qb.push(format!(" FROM {} base", layout.table));

    if let Some(expr) = &plan.fts_match {
        qb.push(format!(
            " JOIN (SELECT rowid AS fts_rowid, bm25({fts}) AS score FROM {fts} WHERE {fts} MATCH ",
            fts = layout.fts_table
        ));
        qb.push_bind(expr.clone());
        qb.push(") fts ON fts.fts_rowid = base.row_id");
    }

    // LEFT joins: a missing overlay row never drops the base row.
    qb.push(format!(" LEFT JOIN {} ur ON ur.user_id = ", layout.rating_table));
    qb.push_bind(user.as_str().to_string());
    qb.push(" AND ur.source_id = base.source_id AND ur.entity_id = base.id");
    if let Some(stats) = stats_table(layout) {
        qb.push(format!(" LEFT JOIN {stats} us ON us.user_id = "));
        qb.push_bind(user.as_str().to_string());
        qb.push(" AND us.source_id = base.source_id AND us.entity_id = base.id");
    }

    qb.push(" WHERE 1 = 1");
    if !plan.include_deleted {
        qb.push(" AND base.deleted_at IS NULL");
    }
    if !plan.sources.is_empty() {
        qb.push(" AND base.source_id IN (");
        let mut sources = qb.separated(", ");
        for source in &plan.sources {
            sources.push_bind(source.clone());
        }
        sources.push_unseparated(")");
    }
    for filter in &plan.filters {
        qb.push(" AND (");
        filter.push_to(qb);
        qb.push(")");
    }
}

pub(crate) fn select_page(plan: &QueryPlan, user: &UserId) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(format!("SELECT base.*, {}", overlay_select(plan.layout)));
    push_from_where(&mut qb, plan, user);
    qb.push(" ORDER BY ");
    qb.push(&plan.order_by);
    qb.push(" LIMIT ");
    qb.push_bind(plan.limit());
    qb.push(" OFFSET ");
    qb.push_bind(plan.offset());
    qb
}

pub(crate) fn select_count(plan: &QueryPlan, user: &UserId) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*)");
    push_from_where(&mut qb, plan, user);
    qb
}
