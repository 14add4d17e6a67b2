//! Shared fixtures for integration tests

#![allow(dead_code)]

use anyhow::Result;
use docspace_core::{
    config::DocStoreConfig,
    models::{DocField, DocType, Document, FieldKind},
    services::{Bean, DocumentService},
};
use std::sync::Once;
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Route engine logs to the test writer; filter with `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Test helper: Create a service over a fresh database with the sample catalog
pub async fn create_test_env() -> Result<(DocumentService, TempDir)> {
    create_test_env_with(DocStoreConfig::default()).await
}

pub async fn create_test_env_with(config: DocStoreConfig) -> Result<(DocumentService, TempDir)> {
    init_tracing();
    let temp_dir = TempDir::new()?;
    let service = DocumentService::open(temp_dir.path().join("docs.db"), config).await?;
    install_catalog(&service).await?;
    Ok((service, temp_dir))
}

pub async fn install_catalog(service: &DocumentService) -> Result<()> {
    let assembler = service.assembler();

    assembler
        .install_doctype(
            DocType::new("Customer")
                .with_autoname("CUST-.#####")
                .with_field(DocField::new("customer_name", FieldKind::Data).required())
                .with_field(DocField::new("territory", FieldKind::Data))
                .with_field(DocField::new("credit_limit", FieldKind::Currency)),
        )
        .await?;

    assembler
        .install_doctype(
            DocType::new("Order Item")
                .child_table()
                .with_field(DocField::new("item_code", FieldKind::Data).required())
                .with_field(DocField::new("qty", FieldKind::Int))
                .with_field(DocField::new("ship_to", FieldKind::Link).with_options("Customer")),
        )
        .await?;

    assembler
        .install_doctype(
            DocType::new("Order")
                .with_autoname("ORD-.#####")
                .submittable()
                .with_field(
                    DocField::new("customer", FieldKind::Link)
                        .with_options("Customer")
                        .required(),
                )
                .with_field(
                    DocField::new("items", FieldKind::Table)
                        .with_options("Order Item")
                        .required(),
                )
                .with_field(DocField::new("status", FieldKind::Data).allow_on_submit())
                .with_field(DocField::new("notes", FieldKind::Text)),
        )
        .await?;

    assembler
        .install_doctype(
            DocType::new("Delivery Note")
                .with_autoname("DN-.###")
                .submittable()
                .with_field(DocField::new("against_order", FieldKind::Link).with_options("Order")),
        )
        .await?;

    assembler
        .install_doctype(
            DocType::new("Shop Settings")
                .single()
                .with_field(DocField::new("company", FieldKind::Data))
                .with_field(DocField::new("max_discount", FieldKind::Percent))
                .with_field(
                    DocField::new("default_customer", FieldKind::Link).with_options("Customer"),
                ),
        )
        .await?;

    Ok(())
}

/// Insert a customer and return its name
pub async fn create_customer(service: &DocumentService, customer_name: &str) -> Result<String> {
    let mut customer = service.new_bean("Customer").await?;
    customer.set("customer_name", customer_name);
    customer.save().await?;
    Ok(customer.name().unwrap_or_default().to_string())
}

pub fn order_item(item_code: &str, qty: i64) -> Document {
    let mut row = Document::new("Order Item");
    row.set("item_code", item_code);
    row.set("qty", qty);
    row
}

/// Draft order for `customer` with the given items
pub async fn draft_order(
    service: &DocumentService,
    customer: &str,
    items: &[(&str, i64)],
) -> Result<Bean> {
    let mut order = service.new_bean("Order").await?;
    order.set("customer", customer);
    for (code, qty) in items {
        order.append_child("items", order_item(code, *qty));
    }
    order.save().await?;
    Ok(order)
}
