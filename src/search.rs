//! Local refinement of an already-fetched listing.

use serde::{Deserialize, Serialize};

use crate::models::product::Product;

/// Keeps products whose name or description contains `query`, ignoring case.
/// An empty query keeps everything; relative order is preserved.
pub fn refine(products: &[Product], query: &str) -> Vec<Product> {
    if query.is_empty() {
        return products.to_vec();
    }
    let needle = query.to_lowercase();
    products
        .iter()
        .filter(|p| {
            p.name.to_lowercase().contains(&needle)
                || p.description.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOption {
    /// Order the store returned: newest first for plain and category
    /// listings, cheapest first for price ranges
    #[default]
    StoreOrder,
    Name,
    PriceAsc,
    PriceDesc,
    /// Most recently updated first
    Newest,
}

/// Stable in-place sort; products without an update time sort last for
/// [`SortOption::Newest`]. [`SortOption::StoreOrder`] leaves the slice as is.
pub fn sort_products(products: &mut [Product], sort: SortOption) {
    match sort {
        SortOption::StoreOrder => {}
        SortOption::Name => {
            products.sort_by_cached_key(|p| p.name.to_lowercase());
        }
        SortOption::PriceAsc => products.sort_by(|a, b| a.price.cmp(&b.price)),
        SortOption::PriceDesc => products.sort_by(|a, b| b.price.cmp(&a.price)),
        SortOption::Newest => products.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn product(name: &str, description: &str, price: i64, updated: Option<i64>) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            price: Decimal::from(price),
            image_url: None,
            category: "Home".into(),
            created_at: None,
            updated_at: updated.map(|secs| Utc.timestamp_opt(secs, 0).unwrap()),
        }
    }

    #[test]
    fn refine_is_case_insensitive() {
        let products = vec![product("Widget", "Small", 5, None)];
        assert_eq!(refine(&products, "WID"), products);
        assert!(refine(&products, "gadget").is_empty());
    }

    #[test]
    fn refine_matches_description_and_keeps_order() {
        let products = vec![
            product("Lamp", "Brass desk lamp", 30, None),
            product("Mug", "Ceramic", 9, None),
            product("Vase", "ceramic vase", 20, None),
        ];
        let names: Vec<_> = refine(&products, "Ceramic")
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["Mug", "Vase"]);
    }

    #[test]
    fn sort_options_order_products() {
        let mut products = vec![
            product("b", "", 20, Some(100)),
            product("C", "", 10, None),
            product("a", "", 30, Some(200)),
        ];

        sort_products(&mut products, SortOption::Name);
        assert_eq!(products.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), ["a", "b", "C"]);

        sort_products(&mut products, SortOption::PriceDesc);
        assert_eq!(products[0].price, Decimal::from(30));

        sort_products(&mut products, SortOption::PriceAsc);
        assert_eq!(products[0].price, Decimal::from(10));

        sort_products(&mut products, SortOption::Newest);
        assert_eq!(products.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), ["a", "b", "C"]);
    }

    #[test]
    fn default_sort_keeps_the_store_order() {
        let mut products = vec![
            product("Cheap", "", 10, Some(100)),
            product("Dear", "", 20, Some(200)),
        ];
        sort_products(&mut products, SortOption::default());
        assert_eq!(
            products.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            ["Cheap", "Dear"]
        );
        assert_eq!(
            serde_json::from_str::<SortOption>("\"store_order\"").unwrap(),
            SortOption::StoreOrder
        );
    }

    proptest! {
        #[test]
        fn empty_query_is_identity(names in proptest::collection::vec("[a-zA-Z ]{0,12}", 0..8)) {
            let products: Vec<_> = names.iter().map(|n| product(n, n, 1, None)).collect();
            prop_assert_eq!(refine(&products, ""), products);
        }

        #[test]
        fn refined_results_are_a_matching_subsequence(
            names in proptest::collection::vec("[a-zA-Z]{0,12}", 0..8),
            query in "[a-zA-Z]{1,3}",
        ) {
            let products: Vec<_> = names.iter().map(|n| product(n, "", 1, None)).collect();
            let refined = refine(&products, &query);
            let mut remaining = products.iter();
            for found in &refined {
                prop_assert!(found.name.to_lowercase().contains(&query.to_lowercase()));
                prop_assert!(remaining.any(|p| p.id == found.id));
            }
        }
    }
}
