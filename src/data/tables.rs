//! Read-only reference tables generated at startup.
//!
//! Rows are derived from their id alone, so two processes started with the
//! same row counts serve identical data.

use serde::Serialize;

/// First `created_at` timestamp handed out; later ids are an hour apart.
const CREATED_AT_BASE: u64 = 1_700_000_000;

const WAREHOUSES: &[&str] = &["eu-west-1", "us-east-1", "ap-south-1"];

/// Tables a query can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    Products,
    Inventory,
    /// Synthetic rows for untargeted queries.
    General,
}

impl Table {
    pub const ALL: [Table; 4] = [Table::Users, Table::Products, Table::Inventory, Table::General];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Products => "products",
            Table::Inventory => "inventory",
            Table::General => "general",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub base_price_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inventory {
    pub product_id: u64,
    pub stock: u64,
    pub warehouse: String,
}

/// A product joined with its inventory row, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductView {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub base_price_cents: u64,
    pub stock: u64,
    pub warehouse: String,
}

impl ProductView {
    pub fn join(product: &Product, inventory: &Inventory) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            description: product.description.clone(),
            base_price_cents: product.base_price_cents,
            stock: inventory.stock,
            warehouse: inventory.warehouse.clone(),
        }
    }
}

/// The in-memory "database".
#[derive(Debug, Clone)]
pub struct Tables {
    users: Vec<User>,
    products: Vec<Product>,
    inventory: Vec<Inventory>,
}

impl Tables {
    pub fn generate(user_rows: u64, product_rows: u64) -> Self {
        let users = (1..=user_rows)
            .map(|id| User {
                id,
                name: format!("User {id}"),
                email: format!("user{id}@example.com"),
                created_at: CREATED_AT_BASE + id * 3600,
            })
            .collect();
        let products = (1..=product_rows)
            .map(|id| Product {
                id,
                name: format!("Product {id}"),
                description: format!("Description for product {id}"),
                base_price_cents: 500 + (id * 7919) % 49_500,
            })
            .collect();
        let inventory = (1..=product_rows)
            .map(|id| Inventory {
                product_id: id,
                stock: (id * 37) % 1000,
                warehouse: WAREHOUSES[(id as usize) % WAREHOUSES.len()].to_string(),
            })
            .collect();
        Self {
            users,
            products,
            inventory,
        }
    }

    fn row<T>(rows: &[T], id: u64) -> Option<&T> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        rows.get(index)
    }

    pub fn user(&self, id: u64) -> Option<&User> {
        Self::row(&self.users, id)
    }

    pub fn product(&self, id: u64) -> Option<&Product> {
        Self::row(&self.products, id)
    }

    pub fn inventory(&self, product_id: u64) -> Option<&Inventory> {
        Self::row(&self.inventory, product_id)
    }

    pub fn rows(&self, table: Table) -> usize {
        match table {
            Table::Users => self.users.len(),
            Table::Products => self.products.len(),
            Table::Inventory => self.inventory.len(),
            Table::General => 0,
        }
    }

    /// Estimated on-disk size: serialized row bytes.
    pub fn size_bytes(&self, table: Table) -> u64 {
        fn total<T: Serialize>(rows: &[T]) -> u64 {
            rows.iter()
                .map(|r| serde_json::to_vec(r).map(|v| v.len() as u64).unwrap_or_default())
                .sum()
        }
        match table {
            Table::Users => total(&self.users),
            Table::Products => total(&self.products),
            Table::Inventory => total(&self.inventory),
            Table::General => 0,
        }
    }
}
