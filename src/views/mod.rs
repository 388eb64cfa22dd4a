//! Screen state for the catalog: what each screen shows and what its
//! actions do, independent of how it is drawn.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::product::ProductId;

pub mod detail;
pub mod editor;
pub mod list;

pub use detail::{DetailStatus, ProductDetailView};
pub use editor::{EditorMode, ProductEditorView};
pub use list::{ListStatus, ProductListView};

/// Where a screen asks to go after an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    List,
    Detail(ProductId),
    AddProduct,
    EditProduct(ProductId),
    Back,
}

/// Raises a screen's busy flag for as long as it lives. The flag drops back
/// even when the action is cancelled mid-await.
pub(crate) struct BusyFlag<'a>(&'a mut bool);

impl<'a> BusyFlag<'a> {
    pub(crate) fn raise(flag: &'a mut bool) -> Self {
        *flag = true;
        Self(flag)
    }
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        *self.0 = false;
    }
}

/// Price as shown on cards and the detail screen, e.g. `$9.50`.
pub fn format_price(price: Decimal) -> String {
    format!("${:.2}", price.round_dp(2))
}

/// Date as shown on the detail screen, e.g. `Jan 05, 2024`.
pub fn format_date(date: DateTime<Utc>) -> String {
    date.format("%b %d, %Y").to_string()
}
