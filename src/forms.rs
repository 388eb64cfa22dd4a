//! Product form state and validation.
//!
//! A [`ProductForm`] holds the raw text a user typed. Each field starts
//! untouched; blurring a field touches it and validates it, and a submit
//! attempt touches every field at once. Errors are only visible on touched
//! fields, and a submit that fails validation never produces
//! [`ProductFormData`], so nothing reaches the store.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{FieldErrors, ServiceError};
use crate::models::product::{Product, ProductFormData};

/// Categories offered by the category picker.
pub const PRESET_CATEGORIES: [&str; 6] = ["Electronics", "Clothing", "Books", "Home", "Food", "Other"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormField {
    Name,
    Description,
    Price,
    ImageUrl,
    Category,
}

impl FormField {
    pub const ALL: [FormField; 5] = [
        FormField::Name,
        FormField::Description,
        FormField::Price,
        FormField::ImageUrl,
        FormField::Category,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FormField::Name => "name",
            FormField::Description => "description",
            FormField::Price => "price",
            FormField::ImageUrl => "image_url",
            FormField::Category => "category",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.as_str() == name)
    }

    /// Human label used in messages.
    pub fn label(self) -> &'static str {
        match self {
            FormField::Name => "Name",
            FormField::Description => "Description",
            FormField::Price => "Price",
            FormField::ImageUrl => "Image URL",
            FormField::Category => "Category",
        }
    }
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field rules shared by the form and by API payload validation.
pub mod rules {
    use super::*;

    pub fn not_blank(field: FormField, value: &str) -> Result<(), &'static str> {
        if !value.trim().is_empty() {
            return Ok(());
        }
        Err(match field {
            FormField::Name => "Name is required",
            FormField::Description => "Description is required",
            FormField::Price => "Price is required",
            FormField::ImageUrl => "Image URL is required",
            FormField::Category => "Category is required",
        })
    }

    pub fn non_negative_price(price: Decimal) -> Result<(), &'static str> {
        if price.is_sign_negative() && !price.is_zero() {
            Err("Price must be a valid number greater than or equal to 0")
        } else {
            Ok(())
        }
    }

    /// Parses raw price text; empty text, non-numbers and negatives are rejected.
    pub fn parse_price(raw: &str) -> Result<Decimal, &'static str> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("Price is required");
        }
        let price = Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map_err(|_| "Price must be a valid number greater than or equal to 0")?;
        non_negative_price(price)?;
        Ok(price)
    }

    /// Empty is valid; anything else must parse as an absolute URL.
    pub fn image_url(raw: &str) -> Result<(), &'static str> {
        if raw.is_empty() || url::Url::parse(raw).is_ok() {
            Ok(())
        } else {
            Err("Please enter a valid URL")
        }
    }

    pub fn category(value: &str) -> Result<(), &'static str> {
        if value.is_empty() {
            Err("Category is required")
        } else {
            Ok(())
        }
    }
}

/// What the category picker currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategorySelection {
    Preset(String),
    Custom,
}

#[derive(Debug, Clone, Default)]
pub struct ProductForm {
    name: String,
    description: String,
    price: String,
    image_url: String,
    category: String,
    custom_category: String,
    custom_mode: bool,
    touched: BTreeSet<FormField>,
    errors: FieldErrors,
}

impl ProductForm {
    /// Empty form for creating a product.
    pub fn new() -> Self {
        Self::default()
    }

    /// Form pre-populated from an existing product for editing.
    pub fn for_product(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price.to_string(),
            image_url: product.image_url.clone().unwrap_or_default(),
            category: product.category.clone(),
            ..Self::default()
        }
    }

    pub fn set_name(&mut self, value: impl Into<String>) {
        self.name = value.into();
    }

    pub fn set_description(&mut self, value: impl Into<String>) {
        self.description = value.into();
    }

    pub fn set_price(&mut self, value: impl Into<String>) {
        self.price = value.into();
    }

    pub fn set_image_url(&mut self, value: impl Into<String>) {
        self.image_url = value.into();
    }

    /// Picking a preset leaves custom mode and revalidates the category;
    /// picking "custom" clears the preset and waits for free text.
    pub fn select_category(&mut self, selection: CategorySelection) {
        match selection {
            CategorySelection::Preset(value) => {
                self.custom_mode = false;
                self.category = value;
                self.custom_category.clear();
                self.validate_field(FormField::Category);
            }
            CategorySelection::Custom => {
                self.custom_mode = true;
                self.category.clear();
            }
        }
    }

    pub fn set_custom_category(&mut self, value: impl Into<String>) {
        self.custom_category = value.into();
        if !self.custom_category.is_empty() {
            self.errors.remove(FormField::Category);
        }
    }

    pub fn category_selection(&self) -> Option<CategorySelection> {
        if self.custom_mode {
            Some(CategorySelection::Custom)
        } else if self.category.is_empty() {
            None
        } else {
            Some(CategorySelection::Preset(self.category.clone()))
        }
    }

    /// Category value that would be submitted.
    pub fn effective_category(&self) -> &str {
        if self.custom_mode {
            &self.custom_category
        } else {
            &self.category
        }
    }

    /// Marks the field touched and validates it.
    pub fn blur(&mut self, field: FormField) -> bool {
        self.touched.insert(field);
        self.validate_field(field)
    }

    pub fn is_touched(&self, field: FormField) -> bool {
        self.touched.contains(&field)
    }

    /// Error shown for a field; untouched fields never show one.
    pub fn visible_error(&self, field: FormField) -> Option<&str> {
        if self.is_touched(field) {
            self.errors.get(field)
        } else {
            None
        }
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    /// Re-runs one field's rule and records the outcome.
    pub fn validate_field(&mut self, field: FormField) -> bool {
        match self.check(field) {
            Ok(()) => {
                self.errors.remove(field);
                true
            }
            Err(msg) => {
                self.errors.insert(field, msg);
                false
            }
        }
    }

    fn check(&self, field: FormField) -> Result<(), &'static str> {
        match field {
            FormField::Name => rules::not_blank(field, &self.name),
            FormField::Description => rules::not_blank(field, &self.description),
            FormField::Price => rules::parse_price(&self.price).map(|_| ()),
            FormField::ImageUrl => rules::image_url(&self.image_url),
            FormField::Category => {
                if self.category.is_empty() && self.custom_category.is_empty() {
                    Err("Category is required")
                } else {
                    rules::category(self.effective_category())
                }
            }
        }
    }

    /// Touches every field and validates the whole form. On success the draft
    /// is converted into [`ProductFormData`].
    pub fn submit(&mut self) -> Result<ProductFormData, ServiceError> {
        self.touched.extend(FormField::ALL);

        let mut valid = true;
        for field in FormField::ALL {
            valid &= self.validate_field(field);
        }
        if !valid {
            tracing::debug!(errors = %self.errors, "product form submit blocked");
            return Err(ServiceError::ValidationError(self.errors.clone()));
        }

        let price = rules::parse_price(&self.price).map_err(|msg| {
            let mut errors = FieldErrors::new();
            errors.insert(FormField::Price, msg);
            ServiceError::ValidationError(errors)
        })?;

        Ok(ProductFormData {
            name: self.name.trim().to_string(),
            description: self.description.trim().to_string(),
            price,
            image_url: if self.image_url.is_empty() {
                None
            } else {
                Some(self.image_url.clone())
            },
            category: self.effective_category().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn filled() -> ProductForm {
        let mut form = ProductForm::new();
        form.set_name("Mug");
        form.set_description("Ceramic");
        form.set_price("19.99");
        form.select_category(CategorySelection::Preset("Home".into()));
        form
    }

    #[test]
    fn valid_submit_produces_numeric_price() {
        let data = filled().submit().unwrap();
        assert_eq!(data.price, dec!(19.99));
        assert_eq!(data.category, "Home");
        assert_eq!(data.image_url, None);
    }

    #[rstest]
    #[case("-5", "Price must be a valid number greater than or equal to 0")]
    #[case("", "Price is required")]
    #[case("   ", "Price is required")]
    #[case("abc", "Price must be a valid number greater than or equal to 0")]
    fn invalid_prices_block_submit(#[case] price: &str, #[case] message: &str) {
        let mut form = filled();
        form.set_price(price);
        let err = form.submit().unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(ref fields) if fields.get(FormField::Price) == Some(message));
    }

    #[rstest]
    #[case("0", dec!(0))]
    #[case(" 12.50 ", dec!(12.5))]
    #[case("1e2", dec!(100))]
    fn accepted_price_text(#[case] raw: &str, #[case] expected: rust_decimal::Decimal) {
        assert_eq!(rules::parse_price(raw), Ok(expected));
    }

    #[test]
    fn errors_hidden_until_touched() {
        let mut form = ProductForm::new();
        assert!(!form.validate_field(FormField::Name));
        assert_eq!(form.visible_error(FormField::Name), None);

        assert!(!form.blur(FormField::Name));
        assert_eq!(form.visible_error(FormField::Name), Some("Name is required"));

        form.set_name("Lamp");
        assert!(form.blur(FormField::Name));
        assert_eq!(form.visible_error(FormField::Name), None);
    }

    #[test]
    fn submit_touches_every_field() {
        let mut form = ProductForm::new();
        let err = form.submit().unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(ref fields) if fields.len() == 4);
        for field in FormField::ALL {
            assert!(form.is_touched(field));
        }
        // optional image URL stays valid when empty
        assert_eq!(form.visible_error(FormField::ImageUrl), None);
        assert_eq!(form.visible_error(FormField::Category), Some("Category is required"));
    }

    #[test]
    fn whitespace_name_is_rejected_and_text_is_trimmed_on_submit() {
        let mut form = filled();
        form.set_name("   ");
        assert!(form.submit().is_err());

        form.set_name("  Mug  ");
        assert_eq!(form.submit().unwrap().name, "Mug");
    }

    #[test]
    fn image_url_must_be_absolute() {
        let mut form = filled();
        form.set_image_url("example.com/mug.png");
        assert!(!form.blur(FormField::ImageUrl));

        form.set_image_url("https://example.com/mug.png");
        assert!(form.blur(FormField::ImageUrl));
        assert_eq!(
            form.submit().unwrap().image_url.as_deref(),
            Some("https://example.com/mug.png")
        );
    }

    #[test]
    fn custom_category_replaces_preset() {
        let mut form = filled();
        form.select_category(CategorySelection::Custom);
        assert_eq!(form.category_selection(), Some(CategorySelection::Custom));
        assert!(form.submit().is_err());

        form.set_custom_category("Garden");
        assert_eq!(form.errors().get(FormField::Category), None);
        assert_eq!(form.submit().unwrap().category, "Garden");

        form.select_category(CategorySelection::Preset("Books".into()));
        assert_eq!(form.effective_category(), "Books");
        assert_eq!(form.submit().unwrap().category, "Books");
    }

    #[test]
    fn edit_form_starts_from_product() {
        let product = Product {
            id: uuid::Uuid::new_v4(),
            name: "Mug".into(),
            description: "Ceramic".into(),
            price: dec!(9.5),
            image_url: Some("https://example.com/mug.png".into()),
            category: "Garden".into(),
            created_at: None,
            updated_at: None,
        };
        let mut form = ProductForm::for_product(&product);
        assert_eq!(
            form.category_selection(),
            Some(CategorySelection::Preset("Garden".into()))
        );
        assert_eq!(form.submit().unwrap(), product.to_form_data());
    }
}
