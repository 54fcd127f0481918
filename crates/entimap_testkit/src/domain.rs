//! A small shop domain used by fixtures and scenario tests.
//!
//! - [`Category`] - standalone entity
//! - [`Product`] - aggregate root, belongs to a category
//! - [`ProductImage`] - member of the product aggregate
//! - [`Tag`] - ids assigned by storage, linked to products through the
//!   `product_tag` join table

use entimap_core::{
    AggregateLink, CoreError, CoreResult, DomainEvent, Entity, EntityBuilder, EntityCore,
    EntityId, EntityKind, EntityRef, EntityRefExt, EntityType, ManyToManyRelation,
};
use entimap_storage::{Row, Value, ID_COLUMN};

/// Kind of [`Category`].
pub static CATEGORY: EntityKind = EntityKind::new("Category", "category");

/// Kind of [`Product`].
pub static PRODUCT: EntityKind = EntityKind::new("Product", "product").aggregate_root();

/// Kind of [`ProductImage`].
pub static PRODUCT_IMAGE: EntityKind = EntityKind::new("ProductImage", "product_image");

/// Kind of [`Tag`].
pub static TAG: EntityKind = EntityKind::new("Tag", "tag").id_generated_by_storage();

/// Join table between products and tags.
pub const PRODUCT_TAG: &str = "product_tag";

fn row_id(row: &Row) -> Option<EntityId> {
    row.get(ID_COLUMN).and_then(Value::as_u64).map(EntityId::new)
}

fn text(row: &Row, column: &str) -> CoreResult<String> {
    row.get(column)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CoreError::invalid_argument(format!("missing text column {column}")))
}

fn reference(row: &Row, column: &str) -> Option<EntityId> {
    row.get(column).and_then(Value::as_u64).map(EntityId::new)
}

fn id_value(id: Option<EntityId>) -> Value {
    id.map_or(Value::Null, |id| Value::from(id.as_u64()))
}

/// A product category.
#[derive(Debug)]
pub struct Category {
    core: EntityCore,
    /// Display name.
    pub name: String,
}

/// Describes a new [`Category`].
#[derive(Debug, Clone, Default)]
pub struct CategoryBuilder {
    id: Option<EntityId>,
    name: String,
}

impl Category {
    /// Starts a builder.
    #[must_use]
    pub fn builder(name: &str) -> CategoryBuilder {
        CategoryBuilder {
            id: None,
            name: name.to_string(),
        }
    }
}

impl Entity for Category {
    fn kind(&self) -> &'static EntityKind {
        &CATEGORY
    }

    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn to_fields(&self) -> Row {
        Row::from([("name".to_string(), Value::from(self.name.clone()))])
    }
}

impl EntityBuilder for CategoryBuilder {
    type Entity = Category;

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn build(self) -> Category {
        Category {
            core: EntityCore::new(self.id),
            name: self.name,
        }
    }

    fn to_fields(&self) -> Row {
        Row::from([("name".to_string(), Value::from(self.name.clone()))])
    }
}

impl EntityType for Category {
    type Builder = CategoryBuilder;

    fn entity_kind() -> &'static EntityKind {
        &CATEGORY
    }

    fn builder_from_row(row: &Row) -> CoreResult<CategoryBuilder> {
        Ok(CategoryBuilder {
            id: row_id(row),
            name: text(row, "name")?,
        })
    }
}

/// A product; root of the aggregate owning its images.
#[derive(Debug)]
pub struct Product {
    core: EntityCore,
    /// Display name.
    pub name: String,
    /// Stock keeping unit, unique per product.
    pub sku: String,
    /// Price in cents.
    pub price: i64,
    /// Owning category.
    pub category_id: Option<EntityId>,
}

/// Describes a new [`Product`].
#[derive(Debug, Clone, Default)]
pub struct ProductBuilder {
    id: Option<EntityId>,
    name: String,
    sku: String,
    price: i64,
    category_id: Option<EntityId>,
}

impl ProductBuilder {
    /// Sets the id of an existing product.
    #[must_use]
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn category(mut self, id: EntityId) -> Self {
        self.category_id = Some(id);
        self
    }
}

impl Product {
    /// Starts a builder.
    #[must_use]
    pub fn builder(name: &str, sku: &str, price: i64) -> ProductBuilder {
        ProductBuilder {
            id: None,
            name: name.to_string(),
            sku: sku.to_string(),
            price,
            category_id: None,
        }
    }
}

fn product_fields(name: &str, sku: &str, price: i64, category_id: Option<EntityId>) -> Row {
    Row::from([
        ("name".to_string(), Value::from(name)),
        ("sku".to_string(), Value::from(sku)),
        ("price".to_string(), Value::from(price)),
        ("category_id".to_string(), id_value(category_id)),
    ])
}

impl Entity for Product {
    fn kind(&self) -> &'static EntityKind {
        &PRODUCT
    }

    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn to_fields(&self) -> Row {
        product_fields(&self.name, &self.sku, self.price, self.category_id)
    }
}

impl EntityBuilder for ProductBuilder {
    type Entity = Product;

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn build(self) -> Product {
        Product {
            core: EntityCore::new(self.id),
            name: self.name,
            sku: self.sku,
            price: self.price,
            category_id: self.category_id,
        }
    }

    fn to_fields(&self) -> Row {
        product_fields(&self.name, &self.sku, self.price, self.category_id)
    }
}

impl EntityType for Product {
    type Builder = ProductBuilder;

    fn entity_kind() -> &'static EntityKind {
        &PRODUCT
    }

    fn builder_from_row(row: &Row) -> CoreResult<ProductBuilder> {
        Ok(ProductBuilder {
            id: row_id(row),
            name: text(row, "name")?,
            sku: text(row, "sku")?,
            price: row.get("price").and_then(Value::as_i64).unwrap_or_default(),
            category_id: reference(row, "category_id"),
        })
    }
}

/// An image of a product.
#[derive(Debug)]
pub struct ProductImage {
    core: EntityCore,
    /// Owning product.
    pub product_id: EntityId,
    /// Image location.
    pub url: String,
}

/// Describes a new [`ProductImage`].
#[derive(Debug, Clone)]
pub struct ProductImageBuilder {
    id: Option<EntityId>,
    product_id: EntityId,
    url: String,
}

impl ProductImage {
    /// Starts a builder.
    #[must_use]
    pub fn builder(product_id: EntityId, url: &str) -> ProductImageBuilder {
        ProductImageBuilder {
            id: None,
            product_id,
            url: url.to_string(),
        }
    }
}

fn image_fields(product_id: EntityId, url: &str) -> Row {
    Row::from([
        ("product_id".to_string(), Value::from(product_id.as_u64())),
        ("url".to_string(), Value::from(url)),
    ])
}

impl Entity for ProductImage {
    fn kind(&self) -> &'static EntityKind {
        &PRODUCT_IMAGE
    }

    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn to_fields(&self) -> Row {
        image_fields(self.product_id, &self.url)
    }

    fn aggregate_link(&self) -> Option<AggregateLink> {
        Some(AggregateLink {
            root: &PRODUCT,
            root_id: self.product_id,
        })
    }
}

impl EntityBuilder for ProductImageBuilder {
    type Entity = ProductImage;

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn build(self) -> ProductImage {
        ProductImage {
            core: EntityCore::new(self.id),
            product_id: self.product_id,
            url: self.url,
        }
    }

    fn to_fields(&self) -> Row {
        image_fields(self.product_id, &self.url)
    }
}

impl EntityType for ProductImage {
    type Builder = ProductImageBuilder;

    fn entity_kind() -> &'static EntityKind {
        &PRODUCT_IMAGE
    }

    fn builder_from_row(row: &Row) -> CoreResult<ProductImageBuilder> {
        let product_id = reference(row, "product_id")
            .ok_or_else(|| CoreError::invalid_argument("image row without product"))?;
        Ok(ProductImageBuilder {
            id: row_id(row),
            product_id,
            url: text(row, "url")?,
        })
    }
}

/// A label; its id is assigned by storage on insert.
#[derive(Debug)]
pub struct Tag {
    core: EntityCore,
    /// Unique label.
    pub label: String,
}

/// Describes a new [`Tag`].
#[derive(Debug, Clone, Default)]
pub struct TagBuilder {
    id: Option<EntityId>,
    label: String,
}

impl Tag {
    /// Starts a builder.
    #[must_use]
    pub fn builder(label: &str) -> TagBuilder {
        TagBuilder {
            id: None,
            label: label.to_string(),
        }
    }
}

impl Entity for Tag {
    fn kind(&self) -> &'static EntityKind {
        &TAG
    }

    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn to_fields(&self) -> Row {
        Row::from([("label".to_string(), Value::from(self.label.clone()))])
    }
}

impl EntityBuilder for TagBuilder {
    type Entity = Tag;

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn build(self) -> Tag {
        Tag {
            core: EntityCore::new(self.id),
            label: self.label,
        }
    }

    fn to_fields(&self) -> Row {
        Row::from([("label".to_string(), Value::from(self.label.clone()))])
    }
}

impl EntityType for Tag {
    type Builder = TagBuilder;

    fn entity_kind() -> &'static EntityKind {
        &TAG
    }

    fn builder_from_row(row: &Row) -> CoreResult<TagBuilder> {
        Ok(TagBuilder {
            id: row_id(row),
            label: text(row, "label")?,
        })
    }
}

fn require_id(entity: &EntityRef) -> CoreResult<EntityId> {
    entity.entity_id().ok_or_else(|| {
        CoreError::invalid_argument(format!("{} has no id yet", entity.entity_kind()))
    })
}

/// Adds an image to a product through a domain event.
///
/// The product must have an id; the image is persisted together with it.
///
/// # Errors
///
/// Fails if the product has no id or is not initialized, and with any
/// error raised while persisting.
pub fn add_image(product: &EntityRef, url: &str) -> CoreResult<EntityRef> {
    let product_id = require_id(product)?;
    let image = ProductImage::builder(product_id, url).build();
    let image = entimap_core::entity_ref(image);
    product.publish(DomainEvent::aggregate_member_modified(
        product.clone(),
        image.clone(),
    ))?;
    Ok(image)
}

/// Removes an image from its product through a domain event.
///
/// # Errors
///
/// Fails if the product is not initialized or the manager is flushing.
pub fn remove_image(product: &EntityRef, image: &EntityRef) -> CoreResult<()> {
    product.publish(DomainEvent::aggregate_member_removed(
        product.clone(),
        image.clone(),
    ))
}

/// Links a tag to a product.
///
/// # Errors
///
/// Fails if the product is not initialized or the manager is flushing.
pub fn tag_product(product: &EntityRef, tag: &EntityRef) -> CoreResult<()> {
    let relation = ManyToManyRelation::persist(PRODUCT_TAG, product.clone(), tag.clone());
    product.publish(DomainEvent::relation_changed(product.clone(), relation))
}

/// Unlinks a tag from a product.
///
/// # Errors
///
/// Fails if the product is not initialized or the manager is flushing.
pub fn untag_product(product: &EntityRef, tag: &EntityRef) -> CoreResult<()> {
    let relation = ManyToManyRelation::remove(PRODUCT_TAG, product.clone(), tag.clone());
    product.publish(DomainEvent::relation_changed(product.clone(), relation))
}

/// Schedules a product for removal through a domain event.
///
/// # Errors
///
/// Fails if the product is not initialized or the manager is flushing.
pub fn discontinue(product: &EntityRef) -> CoreResult<()> {
    product.publish(DomainEvent::entity_removed(product.clone()))
}
