use tracing::{debug, warn};

use crate::errors::ServiceError;
use crate::forms::ProductForm;
use crate::models::product::{ProductId, ProductPatch};
use crate::notifications::Notifier;
use crate::services::ProductCatalog;

use super::{BusyFlag, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorMode {
    Create,
    Edit(ProductId),
}

/// Add and edit screens share one editor around a [`ProductForm`].
#[derive(Debug)]
pub struct ProductEditorView {
    catalog: ProductCatalog,
    notifier: Notifier,
    mode: EditorMode,
    form: ProductForm,
    submitting: bool,
}

impl ProductEditorView {
    pub fn create(catalog: ProductCatalog, notifier: Notifier) -> Self {
        Self {
            catalog,
            notifier,
            mode: EditorMode::Create,
            form: ProductForm::new(),
            submitting: false,
        }
    }

    /// Opens the editor on an existing product, pre-filling the form.
    pub async fn edit(
        catalog: ProductCatalog,
        notifier: Notifier,
        id: ProductId,
    ) -> Result<Self, ServiceError> {
        let product = catalog.product(id).await?;
        Ok(Self {
            form: ProductForm::for_product(&product),
            catalog,
            notifier,
            mode: EditorMode::Edit(id),
            submitting: false,
        })
    }

    pub fn mode(&self) -> EditorMode {
        self.mode
    }

    pub fn form(&self) -> &ProductForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut ProductForm {
        &mut self.form
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn submit_label(&self) -> &'static str {
        match self.mode {
            EditorMode::Create => "Add Product",
            EditorMode::Edit(_) => "Update Product",
        }
    }

    /// Validates the form and saves it. A form with errors stays on screen
    /// and nothing is sent; store failures raise an error notification and
    /// are returned as well.
    pub async fn submit(&mut self) -> Result<Route, ServiceError> {
        let data = match self.form.submit() {
            Ok(data) => data,
            Err(err) => {
                debug!("editor submit blocked by validation");
                return Err(err);
            }
        };

        let busy = BusyFlag::raise(&mut self.submitting);
        let result = match self.mode {
            EditorMode::Create => self.catalog.create(data).await.map(|_| {
                self.notifier.success_then_navigate("Product added successfully");
                Route::List
            }),
            EditorMode::Edit(id) => self
                .catalog
                .update(id, ProductPatch::from(data))
                .await
                .map(|()| {
                    self.notifier
                        .success_then_navigate("Product updated successfully");
                    Route::Detail(id)
                }),
        };
        drop(busy);

        if let Err(err) = &result {
            warn!(mode = ?self.mode, error = %err, "product save failed");
            self.notifier.failure(err);
        }
        result
    }
}
