pub mod product;

pub use product::{Product, ProductFormData, ProductId, ProductPatch};
