//! Find command - filtered, sorted, paged reads from the replica

use crate::cli::error::HelpfulError;
use crate::cli::output::{format_absolute, print_table, truncate};
use crate::cli::CliContext;
use anyhow::Context;
use clap::Args;
use mirror_db::query::{CatalogReader, Criterion, EntityQuery, QueryError, SortDirection};
use mirror_db::{layout, ReadinessGate};
use mirror_ids::{EntityKind, UserId};
use serde::Deserialize;
use serde_json::Value;

#[derive(Args, Debug, Clone)]
pub struct FindArgs {
    /// Entity kind (scene, performer, studio, tag, group, gallery, image)
    pub kind: String,

    /// Whose ratings, favorites and play counts to merge in
    #[arg(long, env = "MIRROR_USER", default_value = "default")]
    pub user: String,

    /// Free-text query over the kind's searchable fields
    #[arg(long)]
    pub q: Option<String>,

    /// Sort field; a column, a user_* overlay field or "relevance"
    #[arg(long)]
    pub sort: Option<String>,

    #[arg(long)]
    pub desc: bool,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long, default_value_t = mirror_db::query::DEFAULT_PER_PAGE)]
    pub per_page: u32,

    /// Criteria as JSON: one object or an array, e.g.
    /// '{"type":"column","field":"rating100","modifier":"GREATER_THAN","value":60}'
    #[arg(long)]
    pub filter: Option<String>,

    /// Restrict to these sources (repeatable)
    #[arg(long = "source")]
    pub sources: Vec<String>,

    #[arg(long)]
    pub include_deleted: bool,

    /// Read even if the initial full sync has not completed
    #[arg(long)]
    pub partial: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CriteriaArg {
    Many(Vec<Criterion>),
    One(Criterion),
}

pub fn run(ctx: &CliContext, args: FindArgs) -> anyhow::Result<()> {
    let rt = crate::cli::runtime()?;
    rt.block_on(run_async(ctx, args))
}

async fn run_async(ctx: &CliContext, args: FindArgs) -> anyhow::Result<()> {
    let query = build_query(&args)?;
    let user = UserId::parse(&args.user)?;

    let db = ctx.open_existing_db().await?;
    let gate = if args.partial {
        ReadinessGate::opened()
    } else {
        let gate = ReadinessGate::new();
        gate.evaluate(&db, &ctx.config.sync.required_kinds).await?;
        gate
    };
    let reader = CatalogReader::new(db, gate);

    let page = match reader.find_values(&user, &query).await {
        Ok(page) => page,
        Err(QueryError::NotReady) => {
            return Err(HelpfulError::new("Replica is not ready")
                .with_context("The initial full sync has not completed for every enabled source")
                .with_suggestion("TRY: mirror sync --full")
                .with_suggestion("TRY: mirror find --partial ...   # Read what is cached so far")
                .into())
        }
        Err(err) => return Err(err.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    let label = layout(query.kind).label_column;
    let rows = page
        .items
        .iter()
        .map(|item| {
            vec![
                text(item, "key"),
                truncate(&text(item, label), 60),
                item.get("source_updated_at")
                    .and_then(Value::as_i64)
                    .map(format_absolute)
                    .unwrap_or_default(),
                text(item, "user_rating"),
                if item.get("user_favorite").and_then(Value::as_bool) == Some(true) {
                    "★".to_string()
                } else {
                    String::new()
                },
                text(item, "user_play_count"),
            ]
        })
        .collect();
    print_table(&["KEY", "LABEL", "UPDATED", "RATING", "FAV", "PLAYS"], rows);

    let pages = (page.total as u64).div_ceil(u64::from(page.per_page.max(1)));
    println!(
        "Page {} of {} ({} {}s)",
        page.page,
        pages.max(1),
        page.total,
        query.kind
    );
    Ok(())
}

fn build_query(args: &FindArgs) -> anyhow::Result<EntityQuery> {
    let kind = EntityKind::parse(&args.kind).map_err(|_| HelpfulError::invalid_kind(&args.kind))?;
    let direction = if args.desc {
        SortDirection::Desc
    } else {
        SortDirection::Asc
    };

    let mut query = EntityQuery::new(kind).page(args.page, args.per_page);
    if let Some(q) = &args.q {
        query = query.text(q.clone());
    }
    if let Some(sort) = &args.sort {
        query = query.sort(sort.clone(), direction);
    } else {
        query.find.direction = direction;
    }
    if let Some(filter) = &args.filter {
        let criteria: CriteriaArg =
            serde_json::from_str(filter).context("Invalid --filter JSON")?;
        query.criteria = match criteria {
            CriteriaArg::Many(criteria) => criteria,
            CriteriaArg::One(criterion) => vec![criterion],
        };
    }
    query.sources = args.sources.clone();
    query.include_deleted = args.include_deleted;
    Ok(query)
}

fn text(item: &Value, field: &str) -> String {
    match item.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_db::query::Modifier;

    fn args(kind: &str) -> FindArgs {
        FindArgs {
            kind: kind.to_string(),
            user: "default".to_string(),
            q: None,
            sort: None,
            desc: false,
            page: 1,
            per_page: 25,
            filter: None,
            sources: Vec::new(),
            include_deleted: false,
            partial: false,
            json: false,
        }
    }

    #[test]
    fn test_build_query_single_filter_object() {
        let mut find = args("scenes");
        find.sort = Some("user_rating".to_string());
        find.desc = true;
        find.filter = Some(
            r#"{"type":"column","field":"rating100","modifier":"GREATER_THAN","value":60}"#
                .to_string(),
        );

        let query = build_query(&find).unwrap();
        assert_eq!(query.kind, EntityKind::Scene);
        assert_eq!(query.find.sort.as_deref(), Some("user_rating"));
        assert_eq!(query.find.direction, SortDirection::Desc);
        assert_eq!(
            query.criteria,
            vec![Criterion::column("rating100", Modifier::GreaterThan, 60)]
        );
    }

    #[test]
    fn test_build_query_filter_array() {
        let mut find = args("tag");
        find.filter = Some(
            r#"[{"type":"favorite","favorite":true},{"type":"related","relation":"parents","modifier":"INCLUDES","keys":["1:A"]}]"#
                .to_string(),
        );
        let query = build_query(&find).unwrap();
        assert_eq!(query.criteria.len(), 2);
        assert_eq!(query.criteria[0], Criterion::favorite(true));
    }

    #[test]
    fn test_build_query_rejects_bad_input() {
        assert!(build_query(&args("widget")).is_err());

        let mut find = args("scene");
        find.filter = Some("{not json".to_string());
        assert!(build_query(&find).is_err());
    }

    #[test]
    fn test_text_renders_scalars() {
        let item = serde_json::json!({ "key": "1:A", "user_rating": 80, "title": null });
        assert_eq!(text(&item, "key"), "1:A");
        assert_eq!(text(&item, "user_rating"), "80");
        assert_eq!(text(&item, "title"), "");
        assert_eq!(text(&item, "missing"), "");
    }
}
