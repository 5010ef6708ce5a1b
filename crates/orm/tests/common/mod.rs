#![allow(dead_code)]

use elif_record::model::lifecycle::{CREATED_AT, UPDATED_AT};
use elif_record::{FieldDescriptor, Model, ModelSchema, Record, SqlType};
use tracing_subscriber::EnvFilter;

/// Route the crate's debug output to the test harness; set `RUST_LOG` to see it
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

macro_rules! impl_model {
    ($name:ident, $schema:expr) => {
        pub struct $name(pub Record);

        impl Model for $name {
            fn schema() -> ModelSchema {
                $schema
            }
            fn from_record(record: Record) -> Self {
                Self(record)
            }
            fn record(&self) -> &Record {
                &self.0
            }
            fn record_mut(&mut self) -> &mut Record {
                &mut self.0
            }
            fn into_record(self) -> Record {
                self.0
            }
        }
    };
}

impl_model!(
    Customer,
    ModelSchema::new("Customer", "customers")
        .field(FieldDescriptor::new("name", SqlType::Varchar(128)).required())
        .column(CREATED_AT, SqlType::DateTime)
        .has_many::<Order>("orders")
);

impl_model!(
    Order,
    ModelSchema::new("Order", "orders")
        .column("customer_id", SqlType::BigInt)
        .column("status", SqlType::Varchar(32))
        .column("total", SqlType::Double)
        .column(UPDATED_AT, SqlType::DateTime)
        .belongs_to::<Customer>("customer")
        .many_to_many::<Product>("products")
);

impl_model!(
    Product,
    ModelSchema::new("Product", "products").column("name", SqlType::Varchar(128))
);

impl_model!(
    Tag,
    ModelSchema::new("Tag", "tags")
        .with_primary_key("code", SqlType::Varchar(32))
        .column("label", SqlType::Varchar(64))
);
