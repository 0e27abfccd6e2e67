//! Upstream GraphQL payloads and their mapping into replica records.
//!
//! Each kind has a selection set, a filter argument and a serde type for one
//! listed entity. Timestamps arrive as RFC 3339 strings and are stored as ms.

use crate::client::CatalogPage;
use crate::error::SourceError;
use mirror_db::{
    CatalogRecord, EdgeSet, EntityRecord, GalleryAttrs, GroupAttrs, ImageAttrs, Junction,
    PerformerAttrs, SceneAttrs, StudioAttrs, TagAttrs,
};
use mirror_ids::EntityKind;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Query naming for one kind.
pub(crate) struct KindQuery {
    pub operation: &'static str,
    pub list_field: &'static str,
    pub filter_arg: &'static str,
    pub filter_type: &'static str,
    pub selection: &'static str,
}

const SCENE_QUERY: KindQuery = KindQuery {
    operation: "findScenes",
    list_field: "scenes",
    filter_arg: "scene_filter",
    filter_type: "SceneFilterType",
    selection: "id title code details director urls date rating100 organized o_counter \
        created_at updated_at studio { id } \
        files { path size duration width height video_codec audio_codec frame_rate bit_rate } \
        paths { screenshot stream } performers { id } tags { id } \
        groups { group { id } scene_index } galleries { id }",
};

const PERFORMER_QUERY: KindQuery = KindQuery {
    operation: "findPerformers",
    list_field: "performers",
    filter_arg: "performer_filter",
    filter_type: "PerformerFilterType",
    selection: "id name disambiguation alias_list gender birthdate death_date country \
        ethnicity hair_color eye_color height_cm weight measurements career_length tattoos \
        piercings details urls image_path rating100 favorite o_counter scene_count \
        image_count gallery_count group_count created_at updated_at tags { id }",
};

const STUDIO_QUERY: KindQuery = KindQuery {
    operation: "findStudios",
    list_field: "studios",
    filter_arg: "studio_filter",
    filter_type: "StudioFilterType",
    selection: "id name url parent_studio { id } aliases details image_path rating100 \
        favorite ignore_auto_tag scene_count image_count gallery_count performer_count \
        group_count created_at updated_at tags { id }",
};

const TAG_QUERY: KindQuery = KindQuery {
    operation: "findTags",
    list_field: "tags",
    filter_arg: "tag_filter",
    filter_type: "TagFilterType",
    selection: "id name description aliases image_path favorite ignore_auto_tag \
        scene_count scene_marker_count image_count gallery_count performer_count \
        studio_count group_count created_at updated_at parents { id }",
};

const GROUP_QUERY: KindQuery = KindQuery {
    operation: "findGroups",
    list_field: "groups",
    filter_arg: "group_filter",
    filter_type: "GroupFilterType",
    selection: "id name aliases duration date rating100 studio { id } director synopsis \
        urls front_image_path back_image_path scene_count created_at updated_at tags { id }",
};

const GALLERY_QUERY: KindQuery = KindQuery {
    operation: "findGalleries",
    list_field: "galleries",
    filter_arg: "gallery_filter",
    filter_type: "GalleryFilterType",
    selection: "id title code date details photographer urls rating100 organized \
        studio { id } folder { path } paths { cover } image_count created_at updated_at \
        performers { id } tags { id }",
};

const IMAGE_QUERY: KindQuery = KindQuery {
    operation: "findImages",
    list_field: "images",
    filter_arg: "image_filter",
    filter_type: "ImageFilterType",
    selection: "id title code date details photographer urls rating100 organized o_counter \
        studio { id } files { path size width height } paths { thumbnail } \
        created_at updated_at performers { id } tags { id } galleries { id }",
};

pub(crate) fn kind_query(kind: EntityKind) -> &'static KindQuery {
    match kind {
        EntityKind::Scene => &SCENE_QUERY,
        EntityKind::Performer => &PERFORMER_QUERY,
        EntityKind::Studio => &STUDIO_QUERY,
        EntityKind::Tag => &TAG_QUERY,
        EntityKind::Group => &GROUP_QUERY,
        EntityKind::Gallery => &GALLERY_QUERY,
        EntityKind::Image => &IMAGE_QUERY,
    }
}

/// GraphQL document listing one kind with a find filter and a kind filter.
pub(crate) fn query_document(kind: EntityKind) -> String {
    let q = kind_query(kind);
    format!(
        "query List($filter: FindFilterType, ${arg}: {ty}) {{ {op}(filter: $filter, {arg}: ${arg}) {{ count {list} {{ {sel} }} }} }}",
        arg = q.filter_arg,
        ty = q.filter_type,
        op = q.operation,
        list = q.list_field,
        sel = q.selection,
    )
}

/// Decode the `data` object of a listing response.
pub(crate) fn decode_page(kind: EntityKind, data: &Value) -> Result<CatalogPage, SourceError> {
    let q = kind_query(kind);
    let listing = data
        .get(q.operation)
        .ok_or_else(|| SourceError::malformed(format!("response has no '{}'", q.operation)))?;
    let total = listing
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| SourceError::malformed(format!("'{}' has no count", q.operation)))?;
    let items = listing
        .get(q.list_field)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SourceError::malformed(format!("'{}' has no '{}' list", q.operation, q.list_field))
        })?;

    let records = match kind {
        EntityKind::Scene => decode_items::<WireScene>(items)?,
        EntityKind::Performer => decode_items::<WirePerformer>(items)?,
        EntityKind::Studio => decode_items::<WireStudio>(items)?,
        EntityKind::Tag => decode_items::<WireTag>(items)?,
        EntityKind::Group => decode_items::<WireGroup>(items)?,
        EntityKind::Gallery => decode_items::<WireGallery>(items)?,
        EntityKind::Image => decode_items::<WireImage>(items)?,
    };
    Ok(CatalogPage { total, records })
}

trait WireEntity: DeserializeOwned {
    fn into_record(self) -> Result<CatalogRecord, SourceError>;
}

fn decode_items<W: WireEntity>(items: &[Value]) -> Result<Vec<CatalogRecord>, SourceError> {
    items
        .iter()
        .map(|item| {
            let wire = W::deserialize(item)
                .map_err(|e| SourceError::malformed(format!("undecodable entity: {e}")))?;
            wire.into_record()
        })
        .collect()
}

/// RFC 3339 to ms since epoch.
pub(crate) fn parse_timestamp(value: Option<&str>) -> Result<Option<i64>, SourceError> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            chrono::DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| SourceError::malformed(format!("bad timestamp '{v}': {e}")))
        })
        .transpose()
}

fn first_url(urls: Option<Vec<String>>) -> Option<String> {
    urls.and_then(|urls| urls.into_iter().find(|url| !url.is_empty()))
}

fn joined(values: Option<Vec<String>>) -> Option<String> {
    values
        .filter(|values| !values.is_empty())
        .map(|values| values.join(", "))
}

fn ids(refs: Vec<IdRef>) -> impl Iterator<Item = String> {
    refs.into_iter().map(|r| r.id)
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Stamps {
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl Stamps {
    fn apply<A>(self, mut record: EntityRecord<A>) -> Result<EntityRecord<A>, SourceError> {
        record.created_at = parse_timestamp(self.created_at.as_deref())?;
        record.updated_at = parse_timestamp(self.updated_at.as_deref())?;
        Ok(record)
    }
}

// ============================================================================
// Scenes
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireSceneFile {
    path: Option<String>,
    size: Option<i64>,
    duration: Option<f64>,
    width: Option<i64>,
    height: Option<i64>,
    video_codec: Option<String>,
    audio_codec: Option<String>,
    frame_rate: Option<f64>,
    bit_rate: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireScenePaths {
    screenshot: Option<String>,
    stream: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSceneGroup {
    group: IdRef,
    scene_index: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireScene {
    id: String,
    title: Option<String>,
    code: Option<String>,
    details: Option<String>,
    director: Option<String>,
    urls: Option<Vec<String>>,
    date: Option<String>,
    rating100: Option<i64>,
    #[serde(default)]
    organized: bool,
    #[serde(default)]
    o_counter: Option<i64>,
    studio: Option<IdRef>,
    #[serde(default)]
    files: Vec<WireSceneFile>,
    #[serde(default)]
    paths: Option<WireScenePaths>,
    #[serde(default)]
    performers: Vec<IdRef>,
    #[serde(default)]
    tags: Vec<IdRef>,
    #[serde(default)]
    groups: Vec<WireSceneGroup>,
    #[serde(default)]
    galleries: Vec<IdRef>,
    #[serde(flatten)]
    stamps: Stamps,
}

impl WireEntity for WireScene {
    fn into_record(self) -> Result<CatalogRecord, SourceError> {
        // The primary file is the first one listed.
        let file = self.files.into_iter().next();
        let paths = self.paths.unwrap_or_default();
        let attrs = SceneAttrs {
            title: blank_to_none(self.title),
            code: blank_to_none(self.code),
            details: blank_to_none(self.details),
            director: blank_to_none(self.director),
            url: first_url(self.urls),
            date: self.date,
            rating100: self.rating100,
            organized: self.organized,
            o_counter: self.o_counter.unwrap_or(0),
            studio_id: self.studio.map(|s| s.id),
            file_path: file.as_ref().and_then(|f| f.path.clone()),
            file_size: file.as_ref().and_then(|f| f.size),
            duration: file.as_ref().and_then(|f| f.duration),
            width: file.as_ref().and_then(|f| f.width),
            height: file.as_ref().and_then(|f| f.height),
            video_codec: file.as_ref().and_then(|f| f.video_codec.clone()),
            audio_codec: file.as_ref().and_then(|f| f.audio_codec.clone()),
            frame_rate: file.as_ref().and_then(|f| f.frame_rate),
            bit_rate: file.as_ref().and_then(|f| f.bit_rate),
            screenshot_path: paths.screenshot,
            stream_path: paths.stream,
        };
        let record = EntityRecord::new(self.id, attrs)
            .with_edges(EdgeSet::new(Junction::ScenePerformers, ids(self.performers)))
            .with_edges(EdgeSet::new(Junction::SceneTags, ids(self.tags)))
            .with_edges(EdgeSet::ordered(
                Junction::SceneGroups,
                self.groups.into_iter().map(|g| (g.group.id, g.scene_index)),
            ))
            .with_edges(EdgeSet::new(Junction::SceneGalleries, ids(self.galleries)));
        Ok(self.stamps.apply(record)?.into())
    }
}

// ============================================================================
// Performers, studios, tags
// ============================================================================

#[derive(Debug, Deserialize)]
struct WirePerformer {
    id: String,
    name: Option<String>,
    disambiguation: Option<String>,
    alias_list: Option<Vec<String>>,
    gender: Option<String>,
    birthdate: Option<String>,
    death_date: Option<String>,
    country: Option<String>,
    ethnicity: Option<String>,
    hair_color: Option<String>,
    eye_color: Option<String>,
    height_cm: Option<i64>,
    weight: Option<i64>,
    measurements: Option<String>,
    career_length: Option<String>,
    tattoos: Option<String>,
    piercings: Option<String>,
    details: Option<String>,
    urls: Option<Vec<String>>,
    image_path: Option<String>,
    rating100: Option<i64>,
    #[serde(default)]
    favorite: bool,
    o_counter: Option<i64>,
    #[serde(default)]
    scene_count: i64,
    #[serde(default)]
    image_count: i64,
    #[serde(default)]
    gallery_count: i64,
    #[serde(default)]
    group_count: i64,
    #[serde(default)]
    tags: Vec<IdRef>,
    #[serde(flatten)]
    stamps: Stamps,
}

impl WireEntity for WirePerformer {
    fn into_record(self) -> Result<CatalogRecord, SourceError> {
        let attrs = PerformerAttrs {
            name: blank_to_none(self.name),
            disambiguation: blank_to_none(self.disambiguation),
            aliases: joined(self.alias_list),
            gender: self.gender,
            birthdate: self.birthdate,
            death_date: self.death_date,
            country: blank_to_none(self.country),
            ethnicity: blank_to_none(self.ethnicity),
            hair_color: blank_to_none(self.hair_color),
            eye_color: blank_to_none(self.eye_color),
            height_cm: self.height_cm,
            weight: self.weight,
            measurements: blank_to_none(self.measurements),
            career_length: blank_to_none(self.career_length),
            tattoos: blank_to_none(self.tattoos),
            piercings: blank_to_none(self.piercings),
            details: blank_to_none(self.details),
            url: first_url(self.urls),
            image_path: self.image_path,
            rating100: self.rating100,
            favorite: self.favorite,
            o_counter: self.o_counter.unwrap_or(0),
            scene_count: self.scene_count,
            image_count: self.image_count,
            gallery_count: self.gallery_count,
            group_count: self.group_count,
        };
        let record = EntityRecord::new(self.id, attrs)
            .with_edges(EdgeSet::new(Junction::PerformerTags, ids(self.tags)));
        Ok(self.stamps.apply(record)?.into())
    }
}

#[derive(Debug, Deserialize)]
struct WireStudio {
    id: String,
    name: Option<String>,
    url: Option<String>,
    parent_studio: Option<IdRef>,
    aliases: Option<Vec<String>>,
    details: Option<String>,
    image_path: Option<String>,
    rating100: Option<i64>,
    #[serde(default)]
    favorite: bool,
    #[serde(default)]
    ignore_auto_tag: bool,
    #[serde(default)]
    scene_count: i64,
    #[serde(default)]
    image_count: i64,
    #[serde(default)]
    gallery_count: i64,
    #[serde(default)]
    performer_count: i64,
    #[serde(default)]
    group_count: i64,
    #[serde(default)]
    tags: Vec<IdRef>,
    #[serde(flatten)]
    stamps: Stamps,
}

impl WireEntity for WireStudio {
    fn into_record(self) -> Result<CatalogRecord, SourceError> {
        let attrs = StudioAttrs {
            name: blank_to_none(self.name),
            url: blank_to_none(self.url),
            parent_id: self.parent_studio.map(|p| p.id),
            aliases: joined(self.aliases),
            details: blank_to_none(self.details),
            image_path: self.image_path,
            rating100: self.rating100,
            favorite: self.favorite,
            ignore_auto_tag: self.ignore_auto_tag,
            scene_count: self.scene_count,
            image_count: self.image_count,
            gallery_count: self.gallery_count,
            performer_count: self.performer_count,
            group_count: self.group_count,
        };
        let record = EntityRecord::new(self.id, attrs)
            .with_edges(EdgeSet::new(Junction::StudioTags, ids(self.tags)));
        Ok(self.stamps.apply(record)?.into())
    }
}

#[derive(Debug, Deserialize)]
struct WireTag {
    id: String,
    name: Option<String>,
    description: Option<String>,
    aliases: Option<Vec<String>>,
    image_path: Option<String>,
    #[serde(default)]
    favorite: bool,
    #[serde(default)]
    ignore_auto_tag: bool,
    #[serde(default)]
    scene_count: i64,
    #[serde(default)]
    scene_marker_count: i64,
    #[serde(default)]
    image_count: i64,
    #[serde(default)]
    gallery_count: i64,
    #[serde(default)]
    performer_count: i64,
    #[serde(default)]
    studio_count: i64,
    #[serde(default)]
    group_count: i64,
    #[serde(default)]
    parents: Vec<IdRef>,
    #[serde(flatten)]
    stamps: Stamps,
}

impl WireEntity for WireTag {
    fn into_record(self) -> Result<CatalogRecord, SourceError> {
        let attrs = TagAttrs {
            name: blank_to_none(self.name),
            description: blank_to_none(self.description),
            aliases: joined(self.aliases),
            image_path: self.image_path,
            favorite: self.favorite,
            ignore_auto_tag: self.ignore_auto_tag,
            scene_count: self.scene_count,
            scene_marker_count: self.scene_marker_count,
            image_count: self.image_count,
            gallery_count: self.gallery_count,
            performer_count: self.performer_count,
            studio_count: self.studio_count,
            group_count: self.group_count,
        };
        let record = EntityRecord::new(self.id, attrs)
            .with_edges(EdgeSet::new(Junction::TagParents, ids(self.parents)));
        Ok(self.stamps.apply(record)?.into())
    }
}

// ============================================================================
// Groups, galleries, images
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireGroup {
    id: String,
    name: Option<String>,
    aliases: Option<String>,
    /// Seconds.
    duration: Option<f64>,
    date: Option<String>,
    rating100: Option<i64>,
    studio: Option<IdRef>,
    director: Option<String>,
    synopsis: Option<String>,
    urls: Option<Vec<String>>,
    front_image_path: Option<String>,
    back_image_path: Option<String>,
    #[serde(default)]
    scene_count: i64,
    #[serde(default)]
    tags: Vec<IdRef>,
    #[serde(flatten)]
    stamps: Stamps,
}

impl WireEntity for WireGroup {
    fn into_record(self) -> Result<CatalogRecord, SourceError> {
        let attrs = GroupAttrs {
            name: blank_to_none(self.name),
            aliases: blank_to_none(self.aliases),
            duration: self.duration,
            date: self.date,
            rating100: self.rating100,
            studio_id: self.studio.map(|s| s.id),
            director: blank_to_none(self.director),
            synopsis: blank_to_none(self.synopsis),
            url: first_url(self.urls),
            front_image_path: self.front_image_path,
            back_image_path: self.back_image_path,
            scene_count: self.scene_count,
        };
        let record = EntityRecord::new(self.id, attrs)
            .with_edges(EdgeSet::new(Junction::GroupTags, ids(self.tags)));
        Ok(self.stamps.apply(record)?.into())
    }
}

#[derive(Debug, Deserialize)]
struct WirePath {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireGalleryPaths {
    cover: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireGallery {
    id: String,
    title: Option<String>,
    code: Option<String>,
    date: Option<String>,
    details: Option<String>,
    photographer: Option<String>,
    urls: Option<Vec<String>>,
    rating100: Option<i64>,
    #[serde(default)]
    organized: bool,
    studio: Option<IdRef>,
    folder: Option<WirePath>,
    paths: Option<WireGalleryPaths>,
    #[serde(default)]
    image_count: i64,
    #[serde(default)]
    performers: Vec<IdRef>,
    #[serde(default)]
    tags: Vec<IdRef>,
    #[serde(flatten)]
    stamps: Stamps,
}

impl WireEntity for WireGallery {
    fn into_record(self) -> Result<CatalogRecord, SourceError> {
        let attrs = GalleryAttrs {
            title: blank_to_none(self.title),
            code: blank_to_none(self.code),
            date: self.date,
            details: blank_to_none(self.details),
            photographer: blank_to_none(self.photographer),
            url: first_url(self.urls),
            rating100: self.rating100,
            organized: self.organized,
            studio_id: self.studio.map(|s| s.id),
            folder_path: self.folder.and_then(|f| f.path),
            cover_path: self.paths.unwrap_or_default().cover,
            image_count: self.image_count,
        };
        let record = EntityRecord::new(self.id, attrs)
            .with_edges(EdgeSet::new(Junction::GalleryPerformers, ids(self.performers)))
            .with_edges(EdgeSet::new(Junction::GalleryTags, ids(self.tags)));
        Ok(self.stamps.apply(record)?.into())
    }
}

#[derive(Debug, Deserialize)]
struct WireImageFile {
    path: Option<String>,
    size: Option<i64>,
    width: Option<i64>,
    height: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireImagePaths {
    thumbnail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireImage {
    id: String,
    title: Option<String>,
    code: Option<String>,
    date: Option<String>,
    details: Option<String>,
    photographer: Option<String>,
    urls: Option<Vec<String>>,
    rating100: Option<i64>,
    #[serde(default)]
    organized: bool,
    o_counter: Option<i64>,
    studio: Option<IdRef>,
    #[serde(default)]
    files: Vec<WireImageFile>,
    paths: Option<WireImagePaths>,
    #[serde(default)]
    performers: Vec<IdRef>,
    #[serde(default)]
    tags: Vec<IdRef>,
    #[serde(default)]
    galleries: Vec<IdRef>,
    #[serde(flatten)]
    stamps: Stamps,
}

impl WireEntity for WireImage {
    fn into_record(self) -> Result<CatalogRecord, SourceError> {
        let file = self.files.into_iter().next();
        let attrs = ImageAttrs {
            title: blank_to_none(self.title),
            code: blank_to_none(self.code),
            date: self.date,
            details: blank_to_none(self.details),
            photographer: blank_to_none(self.photographer),
            url: first_url(self.urls),
            rating100: self.rating100,
            organized: self.organized,
            o_counter: self.o_counter.unwrap_or(0),
            studio_id: self.studio.map(|s| s.id),
            file_path: file.as_ref().and_then(|f| f.path.clone()),
            file_size: file.as_ref().and_then(|f| f.size),
            width: file.as_ref().and_then(|f| f.width),
            height: file.as_ref().and_then(|f| f.height),
            thumbnail_path: self.paths.unwrap_or_default().thumbnail,
        };
        let record = EntityRecord::new(self.id, attrs)
            .with_edges(EdgeSet::new(Junction::ImagePerformers, ids(self.performers)))
            .with_edges(EdgeSet::new(Junction::ImageTags, ids(self.tags)))
            .with_edges(EdgeSet::new(Junction::ImageGalleries, ids(self.galleries)));
        Ok(self.stamps.apply(record)?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_names_kind_filter() {
        let doc = query_document(EntityKind::Gallery);
        assert!(doc.contains("$gallery_filter: GalleryFilterType"));
        assert!(doc.contains("findGalleries(filter: $filter, gallery_filter: $gallery_filter)"));
        assert!(doc.contains("count galleries {"));
    }

    #[test]
    fn test_decode_scene_page() {
        let data = json!({
            "findScenes": {
                "count": 12,
                "scenes": [{
                    "id": "42",
                    "title": "Sunset",
                    "code": "",
                    "urls": ["", "https://example.test/42"],
                    "rating100": 80,
                    "organized": true,
                    "o_counter": 3,
                    "studio": { "id": "9" },
                    "files": [
                        { "path": "/media/a.mp4", "size": 1000, "duration": 61.5, "width": 1920, "height": 1080 },
                        { "path": "/media/b.mp4" }
                    ],
                    "paths": { "screenshot": "/shot/42", "stream": "/stream/42" },
                    "performers": [{ "id": "7" }, { "id": "8" }],
                    "tags": [],
                    "groups": [{ "group": { "id": "3" }, "scene_index": 2 }],
                    "galleries": [],
                    "created_at": "2024-01-01T00:00:00Z",
                    "updated_at": "2024-01-02T00:00:00+00:00"
                }]
            }
        });

        let page = decode_page(EntityKind::Scene, &data).unwrap();
        assert_eq!(page.total, 12);
        let CatalogRecord::Scene(scene) = &page.records[0] else {
            panic!("expected a scene");
        };
        assert_eq!(scene.id, "42");
        assert_eq!(scene.attrs.code, None);
        assert_eq!(scene.attrs.url.as_deref(), Some("https://example.test/42"));
        assert_eq!(scene.attrs.file_path.as_deref(), Some("/media/a.mp4"));
        assert_eq!(scene.attrs.duration, Some(61.5));
        assert_eq!(scene.attrs.studio_id.as_deref(), Some("9"));
        assert_eq!(scene.updated_at, Some(1_704_153_600_000));

        let groups = scene
            .edges
            .iter()
            .find(|set| set.junction == Junction::SceneGroups)
            .unwrap();
        assert_eq!(groups.targets[0].id, "3");
        assert_eq!(groups.targets[0].position, Some(2));
    }

    #[test]
    fn test_decode_tag_parents_and_aliases() {
        let data = json!({
            "findTags": {
                "count": 1,
                "tags": [{
                    "id": "5",
                    "name": "Outdoor",
                    "aliases": ["outside", "open air"],
                    "parents": [{ "id": "1" }],
                    "updated_at": null
                }]
            }
        });
        let page = decode_page(EntityKind::Tag, &data).unwrap();
        let CatalogRecord::Tag(tag) = &page.records[0] else {
            panic!("expected a tag");
        };
        assert_eq!(tag.attrs.aliases.as_deref(), Some("outside, open air"));
        assert_eq!(tag.edges[0].junction, Junction::TagParents);
        assert_eq!(tag.updated_at, None);
    }

    #[test]
    fn test_missing_listing_is_malformed() {
        let err = decode_page(EntityKind::Image, &json!({ "findScenes": {} })).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }));

        let err = decode_page(
            EntityKind::Tag,
            &json!({ "findTags": { "count": 1, "tags": [{ "name": "no id" }] } }),
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }));
    }

    #[test]
    fn test_bad_timestamp_is_malformed() {
        assert!(parse_timestamp(Some("yesterday")).is_err());
        assert_eq!(parse_timestamp(Some("")).unwrap(), None);
        assert_eq!(parse_timestamp(None).unwrap(), None);
    }
}
