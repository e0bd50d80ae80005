use serde::{Deserialize, Serialize};

use crate::domain::business::BusinessId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub business_id: BusinessId,
    pub name: String,
    pub price: f64,
    pub total_quantity: Option<i64>,
    pub current_stock: Option<i64>,
    pub variants: Vec<ProductVariant>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub name: String,
    /// Overrides the product price when set.
    pub price: Option<f64>,
    pub total_quantity: Option<i64>,
    pub current_stock: Option<i64>,
}

impl Product {
    /// Live stock: `current_stock` when tracked, otherwise `total_quantity`.
    pub fn effective_stock(&self) -> i64 {
        self.current_stock.or(self.total_quantity).unwrap_or(0)
    }

    pub fn find_variant(&self, variant_name: &str) -> Option<&ProductVariant> {
        self.variants.iter().find(|variant| variant.name.eq_ignore_ascii_case(variant_name))
    }
}

impl ProductVariant {
    pub fn effective_stock(&self) -> i64 {
        self.current_stock.or(self.total_quantity).unwrap_or(0)
    }

    pub fn effective_price(&self, product_price: f64) -> f64 {
        self.price.unwrap_or(product_price)
    }
}
