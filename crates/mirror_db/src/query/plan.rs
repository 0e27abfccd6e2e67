//! Validation and compilation of an [`EntityQuery`] into SQL fragments.
//!
//! Everything a caller can get wrong is rejected here, before any SQL runs.

use super::filter::{Criterion, EntityQuery, Modifier, SortDirection, MAX_PER_PAGE, RELEVANCE_SORT};
use super::QueryError;
use crate::layout::{layout, ColumnType, KindLayout, RelationDef, RelationVia};
use crate::overlay::{overlay_expr, overlay_field_type};
use crate::search::fts_match_expr;
use mirror_ids::{parse_ref, RefError};
use serde_json::Value as Json;
use sqlx::{QueryBuilder, Sqlite};

/// A bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Param {
    Text(String),
    Int(i64),
    Real(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Sql(String),
    Param(Param),
}

/// SQL text interleaved with parameters, pushed into a builder as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Fragment {
    pieces: Vec<Piece>,
}

impl Fragment {
    pub(crate) fn sql(mut self, sql: impl Into<String>) -> Self {
        self.pieces.push(Piece::Sql(sql.into()));
        self
    }

    pub(crate) fn param(mut self, param: Param) -> Self {
        self.pieces.push(Piece::Param(param));
        self
    }

    /// `?, ?, ?` for every param.
    fn params(mut self, params: Vec<Param>) -> Self {
        for (i, param) in params.into_iter().enumerate() {
            if i > 0 {
                self = self.sql(", ");
            }
            self = self.param(param);
        }
        self
    }

    fn append(mut self, other: Fragment) -> Self {
        self.pieces.extend(other.pieces);
        self
    }

    pub(crate) fn push_to(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        for piece in &self.pieces {
            match piece {
                Piece::Sql(sql) => {
                    qb.push(sql);
                }
                Piece::Param(Param::Text(v)) => {
                    qb.push_bind(v.clone());
                }
                Piece::Param(Param::Int(v)) => {
                    qb.push_bind(*v);
                }
                Piece::Param(Param::Real(v)) => {
                    qb.push_bind(*v);
                }
                Piece::Param(Param::Bool(v)) => {
                    qb.push_bind(*v);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn sql_text(&self) -> String {
        self.pieces
            .iter()
            .map(|piece| match piece {
                Piece::Sql(sql) => sql.as_str(),
                Piece::Param(_) => "?",
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn param_values(&self) -> Vec<Param> {
        self.pieces
            .iter()
            .filter_map(|piece| match piece {
                Piece::Param(param) => Some(param.clone()),
                Piece::Sql(_) => None,
            })
            .collect()
    }
}

/// A validated query, ready to assemble.
#[derive(Debug, Clone)]
pub(crate) struct QueryPlan {
    pub layout: &'static KindLayout,
    /// FTS5 match expression when a free-text query is present.
    pub fts_match: Option<String>,
    pub filters: Vec<Fragment>,
    pub sources: Vec<String>,
    pub include_deleted: bool,
    pub order_by: String,
    pub page: u32,
    pub per_page: u32,
}

impl QueryPlan {
    pub(crate) fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub(crate) fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }
}

/// Validate `query` and compile its criteria.
///
/// `default_source` is the replica's only source, if it has exactly one; keys
/// without a source segment fall back to it and are rejected otherwise.
pub(crate) fn plan(query: &EntityQuery, default_source: Option<&str>) -> Result<QueryPlan, QueryError> {
    let layout = layout(query.kind);
    let find = &query.find;

    if find.page == 0 {
        return Err(QueryError::validation("page must be at least 1"));
    }
    if find.per_page == 0 || find.per_page > MAX_PER_PAGE {
        return Err(QueryError::validation(format!(
            "per_page must be between 1 and {MAX_PER_PAGE}"
        )));
    }

    let fts_match = match find.q.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => Some(fts_match_expr(q).ok_or_else(|| {
            QueryError::validation(format!("search text '{q}' has no searchable terms"))
        })?),
        _ => None,
    };

    let filters = query
        .criteria
        .iter()
        .map(|criterion| compile_criterion(layout, criterion, default_source, query.include_deleted))
        .collect::<Result<Vec<_>, _>>()?;

    let order_by = order_by(layout, find.sort.as_deref(), find.direction, fts_match.is_some())?;

    Ok(QueryPlan {
        layout,
        fts_match,
        filters,
        sources: query.sources.clone(),
        include_deleted: query.include_deleted,
        order_by,
        page: find.page,
        per_page: find.per_page,
    })
}

/// Resolve a field name to its SQL expression and type.
fn resolve_field(layout: &KindLayout, field: &str) -> Option<(String, ColumnType)> {
    if let Some(ty) = overlay_field_type(field) {
        return overlay_expr(layout, field).map(|expr| (expr.to_string(), ty));
    }
    layout
        .column(field)
        .filter(|col| col.name != "deleted_at" && col.name != "synced_at")
        .map(|col| (format!("base.{}", col.name), col.ty))
}

fn order_by(
    layout: &KindLayout,
    sort: Option<&str>,
    direction: SortDirection,
    has_text: bool,
) -> Result<String, QueryError> {
    let dir = direction.sql();
    let tiebreak = "base.id ASC, base.source_id ASC";

    let sort = match sort {
        Some(sort) => sort,
        None if has_text => RELEVANCE_SORT,
        None => layout.label_column,
    };

    if sort == RELEVANCE_SORT {
        if !has_text {
            return Err(QueryError::validation("relevance sort requires a search text"));
        }
        // bm25 scores lower for better matches; best first whatever the direction.
        return Ok(format!("fts.score ASC, {tiebreak}"));
    }

    let expr = if overlay_field_type(sort).is_some() {
        overlay_expr(layout, sort).map(str::to_string)
    } else {
        layout
            .column(sort)
            .filter(|col| col.sortable)
            .map(|col| format!("base.{}", col.name))
    };
    let expr = expr.ok_or_else(|| {
        QueryError::validation(format!("cannot sort {} by '{sort}'", layout.kind))
    })?;

    // NULLs last in both directions.
    Ok(format!("({expr}) IS NULL, {expr} {dir}, {tiebreak}"))
}

fn compile_criterion(
    layout: &KindLayout,
    criterion: &Criterion,
    default_source: Option<&str>,
    include_deleted: bool,
) -> Result<Fragment, QueryError> {
    match criterion {
        Criterion::Column {
            field,
            modifier,
            value,
            value2,
        } => {
            let (expr, ty) = resolve_field(layout, field).ok_or_else(|| {
                QueryError::validation(format!("unknown field '{field}' for {}", layout.kind))
            })?;
            compile_column(field, &expr, ty, *modifier, value, value2)
        }
        Criterion::Related {
            relation,
            modifier,
            keys,
        } => {
            let rel = layout.relation(relation).ok_or_else(|| {
                QueryError::validation(format!("unknown relation '{relation}' for {}", layout.kind))
            })?;
            compile_related(rel, *modifier, keys, default_source, include_deleted)
        }
        Criterion::Favorite { favorite } => Ok(Fragment::default()
            .sql("COALESCE(ur.favorite, 0) = ")
            .param(Param::Bool(*favorite))),
    }
}

fn compile_column(
    field: &str,
    expr: &str,
    ty: ColumnType,
    modifier: Modifier,
    value: &Json,
    value2: &Json,
) -> Result<Fragment, QueryError> {
    let ordered = ty.is_numeric() || ty == ColumnType::Date;
    let unsupported = || {
        QueryError::validation(format!("modifier {modifier:?} is not valid for field '{field}'"))
    };
    let f = Fragment::default();

    let fragment = match modifier {
        Modifier::IsNull => f.sql(format!("{expr} IS NULL")),
        Modifier::NotNull => f.sql(format!("{expr} IS NOT NULL")),
        Modifier::Equals => f
            .sql(format!("{expr} = "))
            .param(to_param(field, ty, value)?),
        Modifier::NotEquals => f
            .sql(format!("({expr} IS NULL OR {expr} <> "))
            .param(to_param(field, ty, value)?)
            .sql(")"),
        Modifier::GreaterThan | Modifier::LessThan if ordered => {
            let op = if modifier == Modifier::GreaterThan { ">" } else { "<" };
            f.sql(format!("{expr} {op} ")).param(to_param(field, ty, value)?)
        }
        Modifier::Between if ordered => f
            .sql(format!("{expr} BETWEEN "))
            .param(to_param(field, ty, value)?)
            .sql(" AND ")
            .param(to_param(field, ty, value2)?),
        Modifier::NotBetween if ordered => f
            .sql(format!("({expr} < "))
            .param(to_param(field, ty, value)?)
            .sql(format!(" OR {expr} > "))
            .param(to_param(field, ty, value2)?)
            .sql(")"),
        Modifier::Contains if matches!(ty, ColumnType::Text | ColumnType::Date) => {
            let needle = value
                .as_str()
                .ok_or_else(|| QueryError::validation(format!("'{field}' expects a string")))?;
            f.sql(format!("{expr} LIKE "))
                .param(Param::Text(format!("%{}%", escape_like(needle))))
                .sql(" ESCAPE '\\'")
        }
        Modifier::Includes | Modifier::Excludes if ty != ColumnType::Bool => {
            let items = value.as_array().filter(|items| !items.is_empty()).ok_or_else(|| {
                QueryError::validation(format!("'{field}' expects a non-empty list of values"))
            })?;
            let params = items
                .iter()
                .map(|item| to_param(field, ty, item))
                .collect::<Result<Vec<_>, _>>()?;
            if modifier == Modifier::Includes {
                f.sql(format!("{expr} IN (")).params(params).sql(")")
            } else {
                f.sql(format!("({expr} IS NULL OR {expr} NOT IN ("))
                    .params(params)
                    .sql("))")
            }
        }
        _ => return Err(unsupported()),
    };
    Ok(fragment)
}

fn to_param(field: &str, ty: ColumnType, value: &Json) -> Result<Param, QueryError> {
    let param = match ty {
        ColumnType::Text | ColumnType::Date => value.as_str().map(|s| Param::Text(s.to_string())),
        ColumnType::Integer | ColumnType::Timestamp => value.as_i64().map(Param::Int),
        ColumnType::Real => value.as_f64().map(Param::Real),
        ColumnType::Bool => value.as_bool().map(Param::Bool),
    };
    param.ok_or_else(|| {
        let expected = match ty {
            ColumnType::Text | ColumnType::Date => "a string",
            ColumnType::Integer | ColumnType::Timestamp => "an integer",
            ColumnType::Real => "a number",
            ColumnType::Bool => "a boolean",
        };
        QueryError::validation(format!("'{field}' expects {expected}, got {value}"))
    })
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// `SELECT 1 ...` linking the base row to live related rows aliased `t`.
fn link_subquery(rel: &RelationDef, include_deleted: bool) -> String {
    let target = layout(rel.target).table;
    let live = if include_deleted {
        ""
    } else {
        " AND t.deleted_at IS NULL"
    };
    match rel.via {
        RelationVia::Junction { junction, reverse } => {
            let (_, owner_col, _, target_col) = junction.ends();
            let (self_col, other_col) = if reverse {
                (target_col, owner_col)
            } else {
                (owner_col, target_col)
            };
            format!(
                "SELECT 1 FROM {table} j JOIN {target} t ON t.source_id = j.source_id AND t.id = j.{other_col}{live} \
                 WHERE j.source_id = base.source_id AND j.{self_col} = base.id",
                table = junction.table()
            )
        }
        RelationVia::Column(col) => format!(
            "SELECT 1 FROM {target} t WHERE t.source_id = base.source_id AND t.id = base.{col}{live}"
        ),
    }
}

fn compile_related(
    rel: &RelationDef,
    modifier: Modifier,
    keys: &[String],
    default_source: Option<&str>,
    include_deleted: bool,
) -> Result<Fragment, QueryError> {
    let link = link_subquery(rel, include_deleted);

    match modifier {
        Modifier::IsNull => return Ok(Fragment::default().sql(format!("NOT EXISTS ({link})"))),
        Modifier::NotNull => return Ok(Fragment::default().sql(format!("EXISTS ({link})"))),
        Modifier::Includes | Modifier::Excludes | Modifier::IncludesAll => {}
        other => {
            return Err(QueryError::validation(format!(
                "modifier {other:?} is not valid for relation '{}'",
                rel.name
            )))
        }
    }

    if keys.is_empty() {
        return Err(QueryError::validation(format!(
            "relation '{}' filter needs at least one key",
            rel.name
        )));
    }

    let mut resolved: Vec<(String, String)> = Vec::with_capacity(keys.len());
    for key in keys {
        let parts = parse_ref(key);
        let source = match parts.source_id {
            Some(source) => source,
            None => default_source
                .map(str::to_string)
                .ok_or_else(|| RefError::MissingSource(key.clone()))?,
        };
        let pair = (parts.id, source);
        if !resolved.contains(&pair) {
            resolved.push(pair);
        }
    }

    let key_match = |(id, source): &(String, String)| {
        Fragment::default()
            .sql("(t.source_id = ")
            .param(Param::Text(source.clone()))
            .sql(" AND t.id = ")
            .param(Param::Text(id.clone()))
            .sql(")")
    };

    let fragment = if modifier == Modifier::IncludesAll {
        let mut f = Fragment::default().sql("(");
        for (i, pair) in resolved.iter().enumerate() {
            if i > 0 {
                f = f.sql(" AND ");
            }
            f = f
                .sql(format!("EXISTS ({link} AND "))
                .append(key_match(pair))
                .sql(")");
        }
        f.sql(")")
    } else {
        let prefix = if modifier == Modifier::Includes {
            "EXISTS"
        } else {
            "NOT EXISTS"
        };
        let mut f = Fragment::default().sql(format!("{prefix} ({link} AND ("));
        for (i, pair) in resolved.iter().enumerate() {
            if i > 0 {
                f = f.sql(" OR ");
            }
            f = f.append(key_match(pair));
        }
        f.sql("))")
    };
    Ok(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::Criterion;
    use mirror_ids::EntityKind;
    use serde_json::json;

    fn scene_query() -> EntityQuery {
        EntityQuery::new(EntityKind::Scene)
    }

    fn validation_message(result: Result<QueryPlan, QueryError>) -> String {
        match result {
            Err(QueryError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_field_and_sort() {
        let query = scene_query().filter(Criterion::column("bogus", Modifier::Equals, 1));
        assert!(validation_message(plan(&query, None)).contains("bogus"));

        let query = scene_query().sort("bogus", SortDirection::Asc);
        assert!(validation_message(plan(&query, None)).contains("bogus"));

        // Non-sortable column.
        let query = scene_query().sort("details", SortDirection::Asc);
        assert!(plan(&query, None).is_err());

        // Bookkeeping columns are not filterable.
        let query = scene_query().filter(Criterion::is_null("deleted_at"));
        assert!(plan(&query, None).is_err());
    }

    #[test]
    fn test_rejects_wrong_value_types_and_modifiers() {
        let query = scene_query().filter(Criterion::column("rating100", Modifier::Equals, "high"));
        assert!(validation_message(plan(&query, None)).contains("integer"));

        let query = scene_query().filter(Criterion::column("title", Modifier::GreaterThan, "a"));
        assert!(plan(&query, None).is_err());

        let query = scene_query().filter(Criterion::column("organized", Modifier::Contains, "x"));
        assert!(plan(&query, None).is_err());

        let query = scene_query().filter(Criterion::column("title", Modifier::Includes, json!([])));
        assert!(plan(&query, None).is_err());
    }

    #[test]
    fn test_rejects_bad_pagination_and_relevance_without_text() {
        assert!(plan(&scene_query().page(0, 10), None).is_err());
        assert!(plan(&scene_query().page(1, 0), None).is_err());
        assert!(plan(&scene_query().page(1, MAX_PER_PAGE + 1), None).is_err());
        assert!(plan(&scene_query().sort(RELEVANCE_SORT, SortDirection::Asc), None).is_err());
        assert!(plan(&scene_query().text("!!!"), None).is_err());
    }

    #[test]
    fn test_related_requires_keys_and_valid_modifier() {
        let query = scene_query().filter(Criterion::related("performers", Modifier::Includes, Vec::<String>::new()));
        assert!(plan(&query, None).is_err());

        let query = scene_query().filter(Criterion::related("performers", Modifier::GreaterThan, ["1:A"]));
        assert!(plan(&query, None).is_err());

        let query = scene_query().filter(Criterion::related("nope", Modifier::Includes, ["1:A"]));
        assert!(plan(&query, None).is_err());

        let query = scene_query().filter(Criterion::related("tags", Modifier::NotNull, Vec::<String>::new()));
        assert!(plan(&query, None).is_ok());
    }

    #[test]
    fn test_unscoped_key_needs_single_source() {
        let query = scene_query().filter(Criterion::related("tags", Modifier::Includes, ["7"]));
        assert!(matches!(plan(&query, None), Err(QueryError::Identity(_))));

        let planned = plan(&query, Some("only")).unwrap();
        assert_eq!(
            planned.filters[0].param_values(),
            vec![Param::Text("only".to_string()), Param::Text("7".to_string())]
        );
    }

    #[test]
    fn test_column_fragments() {
        let query = scene_query()
            .filter(Criterion::between("rating100", 40, 80))
            .filter(Criterion::column("title", Modifier::Contains, "50%_off"))
            .filter(Criterion::column("user_play_count", Modifier::GreaterThan, 0))
            .filter(Criterion::favorite(true));
        let planned = plan(&query, None).unwrap();

        assert_eq!(planned.filters[0].sql_text(), "base.rating100 BETWEEN ? AND ?");
        assert_eq!(planned.filters[1].sql_text(), "base.title LIKE ? ESCAPE '\\'");
        assert_eq!(
            planned.filters[1].param_values(),
            vec![Param::Text("%50\\%\\_off%".to_string())]
        );
        assert_eq!(planned.filters[2].sql_text(), "COALESCE(us.play_count, 0) > ?");
        assert_eq!(planned.filters[3].sql_text(), "COALESCE(ur.favorite, 0) = ?");
    }

    #[test]
    fn test_related_fragments() {
        let query = scene_query()
            .filter(Criterion::related("performers", Modifier::IncludesAll, ["1:A", "2:A", "1:A"]))
            .filter(Criterion::related("studio", Modifier::Excludes, ["9:B"]));
        let planned = plan(&query, None).unwrap();

        let all = planned.filters[0].sql_text();
        assert_eq!(all.matches("EXISTS (").count(), 2);
        assert!(all.contains("JOIN performers t"));
        assert!(all.contains("j.scene_id = base.id"));

        let excl = planned.filters[1].sql_text();
        assert!(excl.starts_with("NOT EXISTS (SELECT 1 FROM studios t"));
        assert!(excl.contains("t.id = base.studio_id AND t.deleted_at IS NULL"));
    }

    #[test]
    fn test_order_by_defaults_and_nulls_last() {
        let planned = plan(&scene_query(), None).unwrap();
        assert_eq!(
            planned.order_by,
            "(base.title) IS NULL, base.title ASC, base.id ASC, base.source_id ASC"
        );

        let planned = plan(&scene_query().text("beach"), None).unwrap();
        assert!(planned.order_by.starts_with("fts.score ASC"));

        let planned = plan(
            &scene_query().text("beach").sort(RELEVANCE_SORT, SortDirection::Desc),
            None,
        )
        .unwrap();
        assert!(planned.order_by.starts_with("fts.score ASC"));

        let planned = plan(&scene_query().sort("user_rating", SortDirection::Desc), None).unwrap();
        assert!(planned.order_by.starts_with("(ur.rating) IS NULL, ur.rating DESC"));
    }

    #[test]
    fn test_offset() {
        let planned = plan(&scene_query().page(3, 20), None).unwrap();
        assert_eq!(planned.limit(), 20);
        assert_eq!(planned.offset(), 40);
    }
}
