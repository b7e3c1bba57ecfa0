//! Catalog metadata joined into recommendations at read time.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::ProductId;
use crate::domain::region::RegionScoreSet;

pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub list_price: Decimal,
    pub sale_price: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogProduct {
    pub product_id: ProductId,
    pub name: String,
    /// Lead-colour image.
    pub image_url: String,
    pub image_urls_by_color: BTreeMap<String, String>,
    pub parent_category: String,
    pub available: bool,
    pub num_of_purchases: u64,
    pub sales_by_region: RegionScoreSet,
    pub prices: BTreeMap<String, Price>,
    pub similar_item_ids: Vec<ProductId>,
}

impl CatalogProduct {
    pub fn is_on_sale(&self, currency: &str) -> bool {
        self.prices
            .get(&currency.to_ascii_uppercase())
            .map(|price| price.sale_price < price.list_price)
            .unwrap_or(false)
    }

    /// Image for the first preferred colour this product carries, else the lead colour.
    pub fn preferred_image<'a>(&'a self, colors: &[String]) -> &'a str {
        colors
            .iter()
            .find_map(|color| self.image_urls_by_color.get(color))
            .map(String::as_str)
            .unwrap_or(&self.image_url)
    }
}

/// Read-only view over catalog rows fetched for one request.
pub trait CatalogLookup {
    fn product(&self, product_id: &ProductId) -> Option<&CatalogProduct>;
}

impl CatalogLookup for HashMap<ProductId, CatalogProduct> {
    fn product(&self, product_id: &ProductId) -> Option<&CatalogProduct> {
        self.get(product_id)
    }
}

impl CatalogLookup for BTreeMap<ProductId, CatalogProduct> {
    fn product(&self, product_id: &ProductId) -> Option<&CatalogProduct> {
        self.get(product_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;

    use super::{CatalogProduct, Price};

    fn product() -> CatalogProduct {
        let mut prices = BTreeMap::new();
        prices.insert(
            "USD".to_string(),
            Price { list_price: Decimal::new(4_900, 2), sale_price: Decimal::new(2_900, 2) },
        );
        prices.insert(
            "CAD".to_string(),
            Price { list_price: Decimal::new(5_900, 2), sale_price: Decimal::new(5_900, 2) },
        );
        let mut image_urls_by_color = BTreeMap::new();
        image_urls_by_color.insert("blue".to_string(), "https://img/blue.jpg".to_string());
        CatalogProduct {
            image_url: "https://img/lead.jpg".to_string(),
            image_urls_by_color,
            prices,
            ..CatalogProduct::default()
        }
    }

    #[test]
    fn on_sale_requires_sale_price_below_list_price() {
        let product = product();
        assert!(product.is_on_sale("usd"));
        assert!(!product.is_on_sale("CAD"));
        assert!(!product.is_on_sale("EUR"));
    }

    #[test]
    fn preferred_image_falls_back_to_lead_colour() {
        let product = product();
        let prefs = vec!["red".to_string(), "blue".to_string()];
        assert_eq!(product.preferred_image(&prefs), "https://img/blue.jpg");
        assert_eq!(product.preferred_image(&["green".to_string()]), "https://img/lead.jpg");
        assert_eq!(product.preferred_image(&[]), "https://img/lead.jpg");
    }
}
