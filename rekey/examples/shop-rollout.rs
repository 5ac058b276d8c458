//! Converts a small shop schema from integer to UUID keys using the
//! in-memory backend, then prints the resulting rows.

use rekey_core::UuidMigrator;
use rekey_mem::{InMemoryDatabase, TableSpec, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut db = InMemoryDatabase::new();
    db.add_table(
        TableSpec::new("orders")
            .serial_primary_key("id")
            .text("reference"),
    );
    db.add_table(
        TableSpec::new("line_items")
            .serial_primary_key("id")
            .big_int("order_id")
            .text("sku"),
    );
    db.add_table(TableSpec::new("widgets").serial_primary_key("id"));
    db.add_table(
        TableSpec::new("notes")
            .serial_primary_key("id")
            .big_int("subject_id")
            .text("subject_type"),
    );

    db.insert("orders", &[("reference", Value::text("first"))])?;
    db.insert(
        "line_items",
        &[("order_id", Value::Int(1)), ("sku", Value::text("sku-1"))],
    )?;
    db.insert("widgets", &[])?;
    db.insert(
        "notes",
        &[("subject_id", Value::Int(1)), ("subject_type", Value::text("Widget"))],
    )?;

    let mut migrator = UuidMigrator::new(&mut db);
    for table in ["orders", "line_items", "widgets", "notes"] {
        migrator.convert_primary_key(table).await?;
    }
    migrator.convert_foreign_key("line_items", "order_id").await?;
    migrator
        .convert_polymorphic_columns("notes", &[("subject_id", "subject_type")])
        .await?;
    migrator.drop_staged_columns().await?;
    drop(migrator);

    for table in ["orders", "line_items", "notes"] {
        println!("{table}:");
        for row in db.rows(table).unwrap_or(&[]) {
            println!("  {row:?}");
        }
    }
    Ok(())
}
