//! Static table layout for every entity kind.
//!
//! Schema creation, upserts, FTS triggers and query validation all read the
//! same descriptors, so a column exists in one place only.

use crate::model::{
    EntityAttrs, GalleryAttrs, GroupAttrs, ImageAttrs, PerformerAttrs, SceneAttrs, StudioAttrs,
    TagAttrs,
};
use mirror_ids::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    /// ISO-8601 `YYYY-MM-DD` text. Compares lexicographically.
    Date,
    Integer,
    Real,
    Bool,
    /// Milliseconds since the Unix epoch.
    Timestamp,
}

impl ColumnType {
    pub(crate) fn sql_type(self) -> &'static str {
        match self {
            Self::Text | Self::Date => "TEXT",
            Self::Integer | Self::Bool | Self::Timestamp => "INTEGER",
            Self::Real => "REAL",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real | Self::Timestamp)
    }
}

/// One mirrored attribute column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub sortable: bool,
    pub indexed: bool,
}

impl ColumnDef {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            sortable: false,
            indexed: false,
        }
    }

    pub const fn sort(mut self) -> Self {
        self.sortable = true;
        self
    }

    /// Sortable and backed by an index.
    pub const fn index(mut self) -> Self {
        self.sortable = true;
        self.indexed = true;
        self
    }
}

/// Bookkeeping columns every entity table carries besides its attributes.
pub(crate) const META_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("source_created_at", ColumnType::Timestamp).sort(),
    ColumnDef::new("source_updated_at", ColumnType::Timestamp).index(),
    ColumnDef::new("synced_at", ColumnType::Timestamp),
    ColumnDef::new("deleted_at", ColumnType::Timestamp),
];

/// Many-to-many junction tables. Each row is `(source_id, owner, target)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Junction {
    ScenePerformers,
    SceneTags,
    SceneGroups,
    SceneGalleries,
    PerformerTags,
    StudioTags,
    TagParents,
    GroupTags,
    GalleryPerformers,
    GalleryTags,
    ImagePerformers,
    ImageTags,
    ImageGalleries,
}

impl Junction {
    pub const ALL: [Junction; 13] = [
        Junction::ScenePerformers,
        Junction::SceneTags,
        Junction::SceneGroups,
        Junction::SceneGalleries,
        Junction::PerformerTags,
        Junction::StudioTags,
        Junction::TagParents,
        Junction::GroupTags,
        Junction::GalleryPerformers,
        Junction::GalleryTags,
        Junction::ImagePerformers,
        Junction::ImageTags,
        Junction::ImageGalleries,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Self::ScenePerformers => "scene_performers",
            Self::SceneTags => "scene_tags",
            Self::SceneGroups => "scene_groups",
            Self::SceneGalleries => "scene_galleries",
            Self::PerformerTags => "performer_tags",
            Self::StudioTags => "studio_tags",
            Self::TagParents => "tag_parents",
            Self::GroupTags => "group_tags",
            Self::GalleryPerformers => "gallery_performers",
            Self::GalleryTags => "gallery_tags",
            Self::ImagePerformers => "image_performers",
            Self::ImageTags => "image_tags",
            Self::ImageGalleries => "image_galleries",
        }
    }

    /// `(owner kind, owner column, target kind, target column)`.
    pub fn ends(self) -> (EntityKind, &'static str, EntityKind, &'static str) {
        use EntityKind::*;
        match self {
            Self::ScenePerformers => (Scene, "scene_id", Performer, "performer_id"),
            Self::SceneTags => (Scene, "scene_id", Tag, "tag_id"),
            Self::SceneGroups => (Scene, "scene_id", Group, "group_id"),
            Self::SceneGalleries => (Scene, "scene_id", Gallery, "gallery_id"),
            Self::PerformerTags => (Performer, "performer_id", Tag, "tag_id"),
            Self::StudioTags => (Studio, "studio_id", Tag, "tag_id"),
            Self::TagParents => (Tag, "tag_id", Tag, "parent_id"),
            Self::GroupTags => (Group, "group_id", Tag, "tag_id"),
            Self::GalleryPerformers => (Gallery, "gallery_id", Performer, "performer_id"),
            Self::GalleryTags => (Gallery, "gallery_id", Tag, "tag_id"),
            Self::ImagePerformers => (Image, "image_id", Performer, "performer_id"),
            Self::ImageTags => (Image, "image_id", Tag, "tag_id"),
            Self::ImageGalleries => (Image, "image_id", Gallery, "gallery_id"),
        }
    }

    pub fn owner(self) -> EntityKind {
        self.ends().0
    }

    /// Junctions that carry an ordering column.
    pub fn position_column(self) -> Option<&'static str> {
        match self {
            Self::SceneGroups => Some("scene_index"),
            _ => None,
        }
    }
}

/// How a named relation is stored.
#[derive(Debug, Clone, Copy)]
pub enum RelationVia {
    /// Junction traversed owner → target, or target → owner when `reverse`.
    Junction { junction: Junction, reverse: bool },
    /// Single-valued reference column on the base table.
    Column(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct RelationDef {
    pub name: &'static str,
    pub target: EntityKind,
    pub via: RelationVia,
}

const fn junction(name: &'static str, target: EntityKind, junction: Junction) -> RelationDef {
    RelationDef {
        name,
        target,
        via: RelationVia::Junction {
            junction,
            reverse: false,
        },
    }
}

const fn reverse(name: &'static str, target: EntityKind, junction: Junction) -> RelationDef {
    RelationDef {
        name,
        target,
        via: RelationVia::Junction {
            junction,
            reverse: true,
        },
    }
}

const fn column(name: &'static str, target: EntityKind, column: &'static str) -> RelationDef {
    RelationDef {
        name,
        target,
        via: RelationVia::Column(column),
    }
}

/// Shape of the per-user stats table joined for a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsLayout {
    /// `user_scene_stats`: plays, duration, resume point, o-count.
    Scene,
    /// `user_image_stats`: views and o-count.
    Image,
    /// Aggregate `play_count` / `o_count` table.
    Aggregate(&'static str),
    None,
}

/// Everything the store knows about one kind's tables.
#[derive(Debug)]
pub struct KindLayout {
    pub kind: EntityKind,
    pub table: &'static str,
    pub fts_table: &'static str,
    /// Display column, also the default sort.
    pub label_column: &'static str,
    pub columns: &'static [ColumnDef],
    pub fts_columns: &'static [&'static str],
    pub relations: &'static [RelationDef],
    pub rating_table: &'static str,
    pub stats: StatsLayout,
}

impl KindLayout {
    pub fn column(&self, name: &str) -> Option<&'static ColumnDef> {
        self.columns
            .iter()
            .chain(META_COLUMNS.iter())
            .find(|col| col.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&'static RelationDef> {
        self.relations.iter().find(|rel| rel.name == name)
    }

    /// Junctions whose edge set is owned (and rewritten) by this kind.
    pub fn owned_junctions(&self) -> impl Iterator<Item = Junction> + '_ {
        Junction::ALL
            .into_iter()
            .filter(move |junction| junction.owner() == self.kind)
    }
}

static SCENE: KindLayout = KindLayout {
    kind: EntityKind::Scene,
    table: "scenes",
    fts_table: "scenes_fts",
    label_column: "title",
    columns: SceneAttrs::COLUMNS,
    fts_columns: &["title", "code", "details", "director"],
    relations: &[
        junction("performers", EntityKind::Performer, Junction::ScenePerformers),
        junction("tags", EntityKind::Tag, Junction::SceneTags),
        junction("groups", EntityKind::Group, Junction::SceneGroups),
        junction("galleries", EntityKind::Gallery, Junction::SceneGalleries),
        column("studio", EntityKind::Studio, "studio_id"),
    ],
    rating_table: "user_scene_ratings",
    stats: StatsLayout::Scene,
};

static PERFORMER: KindLayout = KindLayout {
    kind: EntityKind::Performer,
    table: "performers",
    fts_table: "performers_fts",
    label_column: "name",
    columns: PerformerAttrs::COLUMNS,
    fts_columns: &["name", "disambiguation", "aliases"],
    relations: &[
        junction("tags", EntityKind::Tag, Junction::PerformerTags),
        reverse("scenes", EntityKind::Scene, Junction::ScenePerformers),
        reverse("galleries", EntityKind::Gallery, Junction::GalleryPerformers),
        reverse("images", EntityKind::Image, Junction::ImagePerformers),
    ],
    rating_table: "user_performer_ratings",
    stats: StatsLayout::Aggregate("user_performer_stats"),
};

static STUDIO: KindLayout = KindLayout {
    kind: EntityKind::Studio,
    table: "studios",
    fts_table: "studios_fts",
    label_column: "name",
    columns: StudioAttrs::COLUMNS,
    fts_columns: &["name", "aliases", "details"],
    relations: &[
        junction("tags", EntityKind::Tag, Junction::StudioTags),
        column("parent", EntityKind::Studio, "parent_id"),
    ],
    rating_table: "user_studio_ratings",
    stats: StatsLayout::Aggregate("user_studio_stats"),
};

static TAG: KindLayout = KindLayout {
    kind: EntityKind::Tag,
    table: "tags",
    fts_table: "tags_fts",
    label_column: "name",
    columns: TagAttrs::COLUMNS,
    fts_columns: &["name", "aliases", "description"],
    relations: &[
        junction("parents", EntityKind::Tag, Junction::TagParents),
        reverse("children", EntityKind::Tag, Junction::TagParents),
    ],
    rating_table: "user_tag_ratings",
    stats: StatsLayout::Aggregate("user_tag_stats"),
};

static GROUP: KindLayout = KindLayout {
    kind: EntityKind::Group,
    table: "groups",
    fts_table: "groups_fts",
    label_column: "name",
    columns: GroupAttrs::COLUMNS,
    fts_columns: &["name", "aliases", "synopsis", "director"],
    relations: &[
        junction("tags", EntityKind::Tag, Junction::GroupTags),
        reverse("scenes", EntityKind::Scene, Junction::SceneGroups),
        column("studio", EntityKind::Studio, "studio_id"),
    ],
    rating_table: "user_group_ratings",
    stats: StatsLayout::None,
};

static GALLERY: KindLayout = KindLayout {
    kind: EntityKind::Gallery,
    table: "galleries",
    fts_table: "galleries_fts",
    label_column: "title",
    columns: GalleryAttrs::COLUMNS,
    fts_columns: &["title", "code", "details", "photographer"],
    relations: &[
        junction("performers", EntityKind::Performer, Junction::GalleryPerformers),
        junction("tags", EntityKind::Tag, Junction::GalleryTags),
        reverse("scenes", EntityKind::Scene, Junction::SceneGalleries),
        reverse("images", EntityKind::Image, Junction::ImageGalleries),
        column("studio", EntityKind::Studio, "studio_id"),
    ],
    rating_table: "user_gallery_ratings",
    stats: StatsLayout::None,
};

static IMAGE: KindLayout = KindLayout {
    kind: EntityKind::Image,
    table: "images",
    fts_table: "images_fts",
    label_column: "title",
    columns: ImageAttrs::COLUMNS,
    fts_columns: &["title", "code", "details", "photographer"],
    relations: &[
        junction("performers", EntityKind::Performer, Junction::ImagePerformers),
        junction("tags", EntityKind::Tag, Junction::ImageTags),
        junction("galleries", EntityKind::Gallery, Junction::ImageGalleries),
        column("studio", EntityKind::Studio, "studio_id"),
    ],
    rating_table: "user_image_ratings",
    stats: StatsLayout::Image,
};

pub fn layout(kind: EntityKind) -> &'static KindLayout {
    match kind {
        EntityKind::Scene => &SCENE,
        EntityKind::Performer => &PERFORMER,
        EntityKind::Studio => &STUDIO,
        EntityKind::Tag => &TAG,
        EntityKind::Group => &GROUP,
        EntityKind::Gallery => &GALLERY,
        EntityKind::Image => &IMAGE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_label_and_fts_columns() {
        for kind in EntityKind::ALL {
            let layout = layout(kind);
            assert_eq!(layout.kind, kind);
            assert!(layout.column(layout.label_column).is_some(), "{kind}");
            for col in layout.fts_columns {
                assert!(layout.column(col).is_some(), "{kind}.{col}");
            }
        }
    }

    #[test]
    fn test_relation_targets_and_columns_exist() {
        for kind in EntityKind::ALL {
            let layout = layout(kind);
            for rel in layout.relations {
                match rel.via {
                    RelationVia::Column(col) => assert!(layout.column(col).is_some()),
                    RelationVia::Junction { junction, reverse } => {
                        let (owner, _, target, _) = junction.ends();
                        let expected_self = if reverse { target } else { owner };
                        let expected_other = if reverse { owner } else { target };
                        assert_eq!(expected_self, kind);
                        assert_eq!(expected_other, rel.target);
                    }
                }
            }
        }
    }

    #[test]
    fn test_owned_junctions() {
        let owned: Vec<_> = layout(EntityKind::Scene).owned_junctions().collect();
        assert_eq!(owned.len(), 4);
        assert!(owned.contains(&Junction::SceneGroups));
        assert_eq!(layout(EntityKind::Tag).owned_junctions().count(), 1);
        assert_eq!(layout(EntityKind::Performer).owned_junctions().count(), 1);
    }

    #[test]
    fn test_meta_columns_resolve() {
        let scene = layout(EntityKind::Scene);
        assert!(scene.column("source_updated_at").unwrap().sortable);
        assert!(scene.column("nope").is_none());
    }
}
