//! Field-mapping inference for schema-flexible platforms.
//!
//! Collections on these platforms have user-defined fields, so the service has to decide
//! which field receives the title, slug, body and SEO metadata. Inference scores every field
//! by type and name similarity; callers can override any role before saving a connection.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use super::adapter::AdapterError;

/// One field of a remote collection schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionField {
    pub slug: String,
    pub display_name: String,
    /// Platform field type, e.g. `PlainText`, `RichText`, `Image`
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub is_required: bool,
}

/// Mapping from article roles to remote field slugs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub title: String,
    pub slug: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured_image: Option<String>,
}

/// Caller-supplied corrections applied on top of an inferred mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldMappingOverrides {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub body: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub featured_image: Option<String>,
}

impl FieldMappingOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(self, mut mapping: FieldMapping) -> FieldMapping {
        if let Some(title) = self.title {
            mapping.title = title;
        }
        if let Some(slug) = self.slug {
            mapping.slug = slug;
        }
        if let Some(body) = self.body {
            mapping.body = body;
        }
        mapping.meta_title = self.meta_title.or(mapping.meta_title);
        mapping.meta_description = self.meta_description.or(mapping.meta_description);
        mapping.featured_image = self.featured_image.or(mapping.featured_image);
        mapping
    }

    /// A complete mapping built only from overrides, when no inference is possible.
    pub fn into_mapping(self) -> Option<FieldMapping> {
        Some(FieldMapping {
            title: self.title?,
            slug: self.slug?,
            body: self.body?,
            meta_title: self.meta_title,
            meta_description: self.meta_description,
            featured_image: self.featured_image,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Title,
    Slug,
    Body,
    MetaTitle,
    MetaDescription,
    FeaturedImage,
}

impl Role {
    fn preferred_types(&self) -> &'static [&'static str] {
        match self {
            Role::Title | Role::MetaTitle | Role::MetaDescription => &["PlainText"],
            Role::Slug => &["Slug", "PlainText"],
            Role::Body => &["RichText"],
            Role::FeaturedImage => &["Image"],
        }
    }

    fn names(&self) -> &'static [&'static str] {
        match self {
            Role::Title => &["name", "title", "post title", "headline"],
            Role::Slug => &["slug", "url slug", "handle", "permalink"],
            Role::Body => &["body", "content", "post body", "article body", "rich text"],
            Role::MetaTitle => &["meta title", "seo title", "page title"],
            Role::MetaDescription => &[
                "meta description",
                "seo description",
                "summary",
                "excerpt",
                "post summary",
            ],
            Role::FeaturedImage => &["featured image", "main image", "thumbnail", "cover image"],
        }
    }

    /// Minimum score for optional roles; a bare type match is not enough.
    fn threshold(&self) -> u32 {
        match self {
            Role::Title | Role::Body | Role::Slug => 1,
            _ => 12,
        }
    }
}

fn normalize(value: &str) -> String {
    static NON_ALNUM: OnceLock<Option<Regex>> = OnceLock::new();
    let lowered = value.to_lowercase();
    match NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").ok()) {
        Some(re) => re.replace_all(&lowered, " ").trim().to_string(),
        None => lowered,
    }
}

fn name_score(field: &CollectionField, role: Role) -> u32 {
    let slug = normalize(&field.slug);
    let display = normalize(&field.display_name);
    let mut best = 0;
    for candidate in role.names() {
        let score = if slug == *candidate || display == *candidate {
            10
        } else if slug.contains(candidate) || display.contains(candidate) {
            5
        } else {
            let tokens: HashSet<&str> = display.split(' ').chain(slug.split(' ')).collect();
            candidate
                .split(' ')
                .filter(|word| word.len() > 2 && tokens.contains(word))
                .count() as u32
                * 2
        };
        best = best.max(score);
    }
    best
}

fn type_score(field: &CollectionField, role: Role) -> u32 {
    match role
        .preferred_types()
        .iter()
        .position(|t| t.eq_ignore_ascii_case(&field.field_type))
    {
        Some(0) => 10,
        Some(_) => 4,
        None => 0,
    }
}

fn pick<'a>(
    fields: &'a [CollectionField],
    role: Role,
    used: &HashSet<&'a str>,
) -> Option<&'a CollectionField> {
    fields
        .iter()
        .filter(|field| !used.contains(field.slug.as_str()))
        .filter(|field| type_score(field, role) > 0)
        .map(|field| (type_score(field, role) + name_score(field, role), field))
        .filter(|(score, _)| *score >= role.threshold())
        .max_by_key(|(score, _)| *score)
        .map(|(_, field)| field)
}

/// Best-effort mapping for a collection schema.
///
/// Fails only when no title or body candidate exists at all. A schema without a slug-typed
/// field falls back to the first plain-text field.
pub fn infer_field_mapping(fields: &[CollectionField]) -> Result<FieldMapping, AdapterError> {
    let mut used: HashSet<&str> = HashSet::new();

    let title = pick(fields, Role::Title, &used)
        .ok_or_else(|| AdapterError::configuration("collection has no plain-text title field"))?;
    used.insert(title.slug.as_str());

    let body = pick(fields, Role::Body, &used)
        .ok_or_else(|| AdapterError::configuration("collection has no rich-text body field"))?;
    used.insert(body.slug.as_str());

    let dedicated_slug = fields.iter().find(|field| {
        !used.contains(field.slug.as_str())
            && (field.field_type.eq_ignore_ascii_case("Slug") || normalize(&field.slug) == "slug")
    });
    let slug = match dedicated_slug {
        Some(field) => field,
        None => {
            let fallback = fields
                .iter()
                .find(|f| {
                    f.field_type.eq_ignore_ascii_case("PlainText")
                        && !used.contains(f.slug.as_str())
                })
                .unwrap_or(title);
            warn!(
                field = %fallback.slug,
                "No slug field in collection schema; using first plain-text field"
            );
            fallback
        }
    };
    used.insert(slug.slug.as_str());

    let mut optional = |role: Role| {
        let field = pick(fields, role, &used)?;
        used.insert(field.slug.as_str());
        Some(field.slug.clone())
    };
    let meta_title = optional(Role::MetaTitle);
    let meta_description = optional(Role::MetaDescription);
    let featured_image = optional(Role::FeaturedImage);

    Ok(FieldMapping {
        title: title.slug.clone(),
        slug: slug.slug.clone(),
        body: body.slug.clone(),
        meta_title,
        meta_description,
        featured_image,
    })
}
