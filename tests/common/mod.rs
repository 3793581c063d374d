#![allow(dead_code)]
//! Shared fixture schemas and data for the relation test suites.
//!
//! The domain: customers place orders, orders carry items through the
//! `order_items` junction, and each customer may have one address. The
//! `orders` relation declares `customer` as its inverse.

use anchor::relation::def::RelationDef;
use anchor::{AnchorSchema, MemoryExecutor, Row};
use sea_query::Value;
use std::sync::Arc;

pub struct CustomerSchema;

impl AnchorSchema for CustomerSchema {
    fn table_name(&self) -> &str {
        "customers"
    }

    fn primary_key(&self) -> &[&str] {
        &["id"]
    }

    fn relation(&self, name: &str) -> Option<RelationDef> {
        match name {
            "orders" => Some(
                RelationDef::has_many(order_schema(), vec![("customer_id", "id")])
                    .inverse_of("customer"),
            ),
            "address" => Some(RelationDef::has_one(
                address_schema(),
                vec![("customer_id", "id")],
            )),
            _ => None,
        }
    }
}

pub struct OrderSchema;

impl AnchorSchema for OrderSchema {
    fn table_name(&self) -> &str {
        "orders"
    }

    fn primary_key(&self) -> &[&str] {
        &["id"]
    }

    fn relation(&self, name: &str) -> Option<RelationDef> {
        match name {
            "customer" => Some(RelationDef::has_one(
                customer_schema(),
                vec![("id", "customer_id")],
            )),
            "items" => Some(
                RelationDef::has_many(item_schema(), vec![("id", "item_id")])
                    .via_table("order_items", vec![("order_id", "id")]),
            ),
            _ => None,
        }
    }
}

pub struct OrderItemSchema;

impl AnchorSchema for OrderItemSchema {
    fn table_name(&self) -> &str {
        "order_items"
    }

    fn primary_key(&self) -> &[&str] {
        &["order_id", "item_id"]
    }

    fn relation(&self, _name: &str) -> Option<RelationDef> {
        None
    }
}

/// Order schema whose `items` relation routes through the declared `lines`
/// relation instead of a raw junction table.
pub struct RoutedOrderSchema;

impl AnchorSchema for RoutedOrderSchema {
    fn table_name(&self) -> &str {
        "orders"
    }

    fn primary_key(&self) -> &[&str] {
        &["id"]
    }

    fn relation(&self, name: &str) -> Option<RelationDef> {
        match name {
            "lines" => Some(RelationDef::has_many(
                order_item_schema(),
                vec![("order_id", "id")],
            )),
            "items" => Some(
                RelationDef::has_many(item_schema(), vec![("id", "item_id")]).via_relation(
                    "lines",
                    RelationDef::has_many(order_item_schema(), vec![("order_id", "id")]),
                ),
            ),
            _ => None,
        }
    }
}

pub struct ItemSchema;

impl AnchorSchema for ItemSchema {
    fn table_name(&self) -> &str {
        "items"
    }

    fn primary_key(&self) -> &[&str] {
        &["id"]
    }

    fn relation(&self, _name: &str) -> Option<RelationDef> {
        None
    }
}

pub struct AddressSchema;

impl AnchorSchema for AddressSchema {
    fn table_name(&self) -> &str {
        "addresses"
    }

    fn primary_key(&self) -> &[&str] {
        &["id"]
    }

    fn relation(&self, _name: &str) -> Option<RelationDef> {
        None
    }
}

pub fn customer_schema() -> Arc<dyn AnchorSchema> {
    Arc::new(CustomerSchema)
}

pub fn order_schema() -> Arc<dyn AnchorSchema> {
    Arc::new(OrderSchema)
}

pub fn order_item_schema() -> Arc<dyn AnchorSchema> {
    Arc::new(OrderItemSchema)
}

pub fn routed_order_schema() -> Arc<dyn AnchorSchema> {
    Arc::new(RoutedOrderSchema)
}

pub fn item_schema() -> Arc<dyn AnchorSchema> {
    Arc::new(ItemSchema)
}

pub fn address_schema() -> Arc<dyn AnchorSchema> {
    Arc::new(AddressSchema)
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

pub fn int(value: i32) -> Value {
    Value::Int(Some(value))
}

pub fn text(value: &str) -> Value {
    Value::String(Some(value.to_string()))
}

/// Three customers; customer 1 has one order, customer 2 has two, customer 3
/// has none. Order 1 carries items 1 and 2, order 2 carries item 2, order 3
/// carries nothing. Customer 1 has two address rows on purpose.
pub fn fixtures() -> MemoryExecutor {
    MemoryExecutor::new()
        .with_table(
            "customers",
            vec![
                row(&[("id", int(1)), ("name", text("ada"))]),
                row(&[("id", int(2)), ("name", text("grace"))]),
                row(&[("id", int(3)), ("name", text("edsger"))]),
            ],
        )
        .with_table(
            "orders",
            vec![
                row(&[("id", int(1)), ("customer_id", int(1))]),
                row(&[("id", int(2)), ("customer_id", int(2))]),
                row(&[("id", int(3)), ("customer_id", int(2))]),
            ],
        )
        .with_table(
            "items",
            vec![
                row(&[("id", int(1)), ("sku", text("bolt"))]),
                row(&[("id", int(2)), ("sku", text("nut"))]),
                row(&[("id", int(3)), ("sku", text("washer"))]),
            ],
        )
        .with_table(
            "order_items",
            vec![
                row(&[("order_id", int(1)), ("item_id", int(1))]),
                row(&[("order_id", int(1)), ("item_id", int(2))]),
                row(&[("order_id", int(2)), ("item_id", int(2))]),
            ],
        )
        .with_table(
            "addresses",
            vec![
                row(&[("id", int(1)), ("customer_id", int(1)), ("city", text("london"))]),
                row(&[("id", int(2)), ("customer_id", int(1)), ("city", text("paris"))]),
            ],
        )
}
