//! Typed mirrored attributes, cached rows and incoming sync records.

use crate::layout::{ColumnDef, ColumnType, Junction};
use mirror_ids::{make_ref, CompositeKey, EntityKind};
use serde::{Deserialize, Serialize};
use sqlx::query_builder::Separated;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, Sqlite};

/// Attribute set of one entity kind, stored as flattened typed columns.
pub trait EntityAttrs:
    for<'r> FromRow<'r, SqliteRow> + Serialize + Clone + Send + Sync + Unpin + 'static
{
    const KIND: EntityKind;
    /// Columns in declaration order; [`EntityAttrs::push_values`] binds in the same order.
    const COLUMNS: &'static [ColumnDef];

    fn push_values<'qb, 'args>(&self, values: &mut Separated<'qb, 'args, Sqlite, &'static str>);
}

macro_rules! entity_attrs {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:ident) {
            $( $field:ident : $ty:ty => $col:ident $(| $flag:ident)* ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
        pub struct $name {
            $( pub $field: $ty, )*
        }

        impl EntityAttrs for $name {
            const KIND: EntityKind = EntityKind::$kind;
            const COLUMNS: &'static [ColumnDef] = &[
                $( ColumnDef::new(stringify!($field), ColumnType::$col) $(.$flag())* ),*
            ];

            fn push_values<'qb, 'args>(&self, values: &mut Separated<'qb, 'args, Sqlite, &'static str>) {
                $( values.push_bind(self.$field.clone()); )*
            }
        }
    };
}

entity_attrs! {
    SceneAttrs (Scene) {
        title: Option<String> => Text | index,
        code: Option<String> => Text | sort,
        details: Option<String> => Text,
        director: Option<String> => Text | sort,
        url: Option<String> => Text,
        date: Option<String> => Date | index,
        rating100: Option<i64> => Integer | index,
        organized: bool => Bool,
        o_counter: i64 => Integer | sort,
        studio_id: Option<String> => Text | index,
        file_path: Option<String> => Text | sort,
        file_size: Option<i64> => Integer | sort,
        duration: Option<f64> => Real | sort,
        width: Option<i64> => Integer | sort,
        height: Option<i64> => Integer | sort,
        video_codec: Option<String> => Text,
        audio_codec: Option<String> => Text,
        frame_rate: Option<f64> => Real | sort,
        bit_rate: Option<i64> => Integer | sort,
        screenshot_path: Option<String> => Text,
        stream_path: Option<String> => Text,
    }
}

entity_attrs! {
    PerformerAttrs (Performer) {
        name: Option<String> => Text | index,
        disambiguation: Option<String> => Text,
        aliases: Option<String> => Text,
        gender: Option<String> => Text | sort,
        birthdate: Option<String> => Date | sort,
        death_date: Option<String> => Date | sort,
        country: Option<String> => Text | sort,
        ethnicity: Option<String> => Text,
        hair_color: Option<String> => Text,
        eye_color: Option<String> => Text,
        height_cm: Option<i64> => Integer | sort,
        weight: Option<i64> => Integer | sort,
        measurements: Option<String> => Text,
        career_length: Option<String> => Text | sort,
        tattoos: Option<String> => Text,
        piercings: Option<String> => Text,
        details: Option<String> => Text,
        url: Option<String> => Text,
        image_path: Option<String> => Text,
        rating100: Option<i64> => Integer | index,
        favorite: bool => Bool,
        o_counter: i64 => Integer | sort,
        scene_count: i64 => Integer | sort,
        image_count: i64 => Integer | sort,
        gallery_count: i64 => Integer | sort,
        group_count: i64 => Integer | sort,
    }
}

entity_attrs! {
    StudioAttrs (Studio) {
        name: Option<String> => Text | index,
        url: Option<String> => Text,
        parent_id: Option<String> => Text | index,
        aliases: Option<String> => Text,
        details: Option<String> => Text,
        image_path: Option<String> => Text,
        rating100: Option<i64> => Integer | index,
        favorite: bool => Bool,
        ignore_auto_tag: bool => Bool,
        scene_count: i64 => Integer | sort,
        image_count: i64 => Integer | sort,
        gallery_count: i64 => Integer | sort,
        performer_count: i64 => Integer | sort,
        group_count: i64 => Integer | sort,
    }
}

entity_attrs! {
    TagAttrs (Tag) {
        name: Option<String> => Text | index,
        description: Option<String> => Text,
        aliases: Option<String> => Text,
        image_path: Option<String> => Text,
        favorite: bool => Bool,
        ignore_auto_tag: bool => Bool,
        scene_count: i64 => Integer | sort,
        scene_marker_count: i64 => Integer | sort,
        image_count: i64 => Integer | sort,
        gallery_count: i64 => Integer | sort,
        performer_count: i64 => Integer | sort,
        studio_count: i64 => Integer | sort,
        group_count: i64 => Integer | sort,
    }
}

entity_attrs! {
    GroupAttrs (Group) {
        name: Option<String> => Text | index,
        aliases: Option<String> => Text,
        duration: Option<f64> => Real | sort,
        date: Option<String> => Date | index,
        rating100: Option<i64> => Integer | index,
        studio_id: Option<String> => Text | index,
        director: Option<String> => Text | sort,
        synopsis: Option<String> => Text,
        url: Option<String> => Text,
        front_image_path: Option<String> => Text,
        back_image_path: Option<String> => Text,
        scene_count: i64 => Integer | sort,
    }
}

entity_attrs! {
    GalleryAttrs (Gallery) {
        title: Option<String> => Text | index,
        code: Option<String> => Text | sort,
        date: Option<String> => Date | index,
        details: Option<String> => Text,
        photographer: Option<String> => Text | sort,
        url: Option<String> => Text,
        rating100: Option<i64> => Integer | index,
        organized: bool => Bool,
        studio_id: Option<String> => Text | index,
        folder_path: Option<String> => Text | sort,
        cover_path: Option<String> => Text,
        image_count: i64 => Integer | sort,
    }
}

entity_attrs! {
    ImageAttrs (Image) {
        title: Option<String> => Text | index,
        code: Option<String> => Text | sort,
        date: Option<String> => Date | index,
        details: Option<String> => Text,
        photographer: Option<String> => Text | sort,
        url: Option<String> => Text,
        rating100: Option<i64> => Integer | index,
        organized: bool => Bool,
        o_counter: i64 => Integer | sort,
        studio_id: Option<String> => Text | index,
        file_path: Option<String> => Text | sort,
        file_size: Option<i64> => Integer | sort,
        width: Option<i64> => Integer | sort,
        height: Option<i64> => Integer | sort,
        thumbnail_path: Option<String> => Text,
    }
}

/// A cached row: identity, mirrored attributes and sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedEntity<A> {
    pub id: String,
    pub source_id: String,
    #[serde(flatten)]
    pub attrs: A,
    pub source_created_at: Option<i64>,
    pub source_updated_at: Option<i64>,
    pub synced_at: i64,
    pub deleted_at: Option<i64>,
}

impl<A> CachedEntity<A> {
    pub fn key(&self) -> CompositeKey {
        make_ref(&self.id, &self.source_id)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl<'r, A> FromRow<'r, SqliteRow> for CachedEntity<A>
where
    A: FromRow<'r, SqliteRow>,
{
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            source_id: row.try_get("source_id")?,
            attrs: A::from_row(row)?,
            source_created_at: row.try_get("source_created_at")?,
            source_updated_at: row.try_get("source_updated_at")?,
            synced_at: row.try_get("synced_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

/// One related id inside an edge set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeTarget {
    pub id: String,
    pub position: Option<i64>,
}

/// The complete set of edges an entity owns in one junction table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSet {
    pub junction: Junction,
    pub targets: Vec<EdgeTarget>,
}

impl EdgeSet {
    pub fn new(junction: Junction, ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            junction,
            targets: ids
                .into_iter()
                .map(|id| EdgeTarget { id, position: None })
                .collect(),
        }
    }

    pub fn ordered(junction: Junction, targets: impl IntoIterator<Item = (String, Option<i64>)>) -> Self {
        Self {
            junction,
            targets: targets
                .into_iter()
                .map(|(id, position)| EdgeTarget { id, position })
                .collect(),
        }
    }
}

/// An entity as observed upstream, ready to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord<A> {
    pub id: String,
    pub created_at: Option<i64>,
    /// Upstream modification stamp (ms). Drives the sync cursor.
    pub updated_at: Option<i64>,
    pub attrs: A,
    /// Junctions missing here are cleared on upsert.
    pub edges: Vec<EdgeSet>,
}

impl<A> EntityRecord<A> {
    pub fn new(id: impl Into<String>, attrs: A) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            updated_at: None,
            attrs,
            edges: Vec::new(),
        }
    }

    pub fn updated_at(mut self, updated_at: i64) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn with_edges(mut self, edges: EdgeSet) -> Self {
        self.edges.push(edges);
        self
    }
}

/// Kind-erased record as delivered by a catalog client.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogRecord {
    Scene(EntityRecord<SceneAttrs>),
    Performer(EntityRecord<PerformerAttrs>),
    Studio(EntityRecord<StudioAttrs>),
    Tag(EntityRecord<TagAttrs>),
    Group(EntityRecord<GroupAttrs>),
    Gallery(EntityRecord<GalleryAttrs>),
    Image(EntityRecord<ImageAttrs>),
}

macro_rules! with_record {
    ($record:expr, $inner:ident => $body:expr) => {
        match $record {
            CatalogRecord::Scene($inner) => $body,
            CatalogRecord::Performer($inner) => $body,
            CatalogRecord::Studio($inner) => $body,
            CatalogRecord::Tag($inner) => $body,
            CatalogRecord::Group($inner) => $body,
            CatalogRecord::Gallery($inner) => $body,
            CatalogRecord::Image($inner) => $body,
        }
    };
}
pub(crate) use with_record;

impl CatalogRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Scene(_) => EntityKind::Scene,
            Self::Performer(_) => EntityKind::Performer,
            Self::Studio(_) => EntityKind::Studio,
            Self::Tag(_) => EntityKind::Tag,
            Self::Group(_) => EntityKind::Group,
            Self::Gallery(_) => EntityKind::Gallery,
            Self::Image(_) => EntityKind::Image,
        }
    }

    pub fn id(&self) -> &str {
        with_record!(self, record => record.id.as_str())
    }

    pub fn updated_at(&self) -> Option<i64> {
        with_record!(self, record => record.updated_at)
    }
}

macro_rules! record_from {
    ($($variant:ident => $attrs:ty),* $(,)?) => {
        $(
            impl From<EntityRecord<$attrs>> for CatalogRecord {
                fn from(record: EntityRecord<$attrs>) -> Self {
                    CatalogRecord::$variant(record)
                }
            }
        )*
    };
}

record_from! {
    Scene => SceneAttrs,
    Performer => PerformerAttrs,
    Studio => StudioAttrs,
    Tag => TagAttrs,
    Group => GroupAttrs,
    Gallery => GalleryAttrs,
    Image => ImageAttrs,
}
