use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::errors::{FieldErrors, ServiceError};
use crate::forms::{rules, FormField};

/// Store-assigned product identifier
pub type ProductId = Uuid;

/// A catalog product as held by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Assigned by the store on creation, immutable thereafter
    pub id: ProductId,

    pub name: String,

    pub description: String,

    /// Non-negative unit price
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,

    /// Optional image location, always a well-formed URL when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    pub category: String,

    /// Set once by the store when the product is created
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Refreshed by the store on every mutation
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Draft for editing this product; the store-owned fields are dropped.
    pub fn to_form_data(&self) -> ProductFormData {
        ProductFormData {
            name: self.name.clone(),
            description: self.description.clone(),
            price: self.price,
            image_url: self.image_url.clone(),
            category: self.category.clone(),
        }
    }
}

/// Product fields a user provides; everything except the store-owned ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct ProductFormData {
    #[validate(custom = "validate_name")]
    pub name: String,

    #[validate(custom = "validate_description")]
    pub description: String,

    #[serde(with = "rust_decimal::serde::float")]
    #[validate(custom = "validate_price")]
    pub price: Decimal,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(url(message = "Please enter a valid URL"))]
    pub image_url: Option<String>,

    #[validate(length(min = 1, message = "Category is required"))]
    pub category: String,
}

fn rule_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn validate_name(value: &str) -> Result<(), ValidationError> {
    rules::not_blank(FormField::Name, value).map_err(|msg| rule_error("blank", msg))
}

fn validate_description(value: &str) -> Result<(), ValidationError> {
    rules::not_blank(FormField::Description, value).map_err(|msg| rule_error("blank", msg))
}

fn validate_price(value: &Decimal) -> Result<(), ValidationError> {
    rules::non_negative_price(*value).map_err(|msg| rule_error("negative_price", msg))
}

/// Partial update; absent fields are left untouched by the store.
///
/// `image_url` has three states: absent (keep), `null` (clear) and a value
/// (replace).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub price: Option<Decimal>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_field"
    )]
    pub image_url: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

fn present_field<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.image_url.is_none()
            && self.category.is_none()
    }

    /// Applies the same field rules as the product form to the fields present.
    pub fn validate_fields(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        if let Some(name) = &self.name {
            if let Err(msg) = rules::not_blank(FormField::Name, name) {
                errors.insert(FormField::Name, msg);
            }
        }
        if let Some(description) = &self.description {
            if let Err(msg) = rules::not_blank(FormField::Description, description) {
                errors.insert(FormField::Description, msg);
            }
        }
        if let Some(price) = self.price {
            if let Err(msg) = rules::non_negative_price(price) {
                errors.insert(FormField::Price, msg);
            }
        }
        if let Some(Some(url)) = &self.image_url {
            if let Err(msg) = rules::image_url(url) {
                errors.insert(FormField::ImageUrl, msg);
            }
        }
        if let Some(category) = &self.category {
            if let Err(msg) = rules::category(category) {
                errors.insert(FormField::Category, msg);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::ValidationError(errors))
        }
    }
}

impl From<ProductFormData> for ProductPatch {
    /// A full form submitted for an edit replaces every user field, clearing
    /// the image when the form left it blank.
    fn from(data: ProductFormData) -> Self {
        Self {
            name: Some(data.name),
            description: Some(data.description),
            price: Some(data.price),
            image_url: Some(data.image_url),
            category: Some(data.category),
        }
    }
}
