//! Runtime-state collaborators for the go-live gates.
//!
//! Inventory lives in the shop platform's SQLite database:
//!
//! ```sql
//! central_inventory_items (id INTEGER PRIMARY KEY, sku TEXT NOT NULL, quantity INTEGER NOT NULL)
//! inventory_routing       (id INTEGER PRIMARY KEY, shop_id TEXT NOT NULL, central_item_id INTEGER)
//! inventory_items         (id INTEGER PRIMARY KEY, shop_id TEXT NOT NULL, sku TEXT, quantity INTEGER)
//! ```
//!
//! Everything else is read from JSON files under the shop and CMS data directories.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags, params};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// One routing rule joined to its central inventory item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRow {
    pub sku: Option<String>,
    pub quantity: Option<i64>,
}

/// Read-only queries against the operational inventory store.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn central_item_count(&self) -> Result<u64>;
    async fn routings_for_shop(&self, shop_id: &str) -> Result<Vec<RoutingRow>>;
    async fn shop_inventory_count(&self, shop_id: &str) -> Result<u64>;
}

/// SQLite-backed inventory store, opened read-only per query on the blocking pool.
pub struct SqliteInventoryStore {
    path: PathBuf,
}

impl SqliteInventoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_context(|| format!("Failed to open inventory database {}", path.display()))?;
            f(&conn)
        })
        .await
        .context("Inventory query task panicked")?
    }
}

#[async_trait]
impl InventoryStore for SqliteInventoryStore {
    async fn central_item_count(&self) -> Result<u64> {
        self.call(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM central_inventory_items", [], |row| {
                    row.get(0)
                })
                .context("Failed to count central inventory items")?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn routings_for_shop(&self, shop_id: &str) -> Result<Vec<RoutingRow>> {
        let shop_id = shop_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT c.sku, c.quantity
                     FROM inventory_routing r
                     LEFT JOIN central_inventory_items c ON c.id = r.central_item_id
                     WHERE r.shop_id = ?1",
                )
                .context("Failed to prepare routing query")?;
            let rows = stmt
                .query_map(params![shop_id], |row| {
                    Ok(RoutingRow {
                        sku: row.get(0)?,
                        quantity: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read routing rules")?;
            Ok(rows)
        })
        .await
    }

    async fn shop_inventory_count(&self, shop_id: &str) -> Result<u64> {
        let shop_id = shop_id.to_string();
        self.call(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM inventory_items WHERE shop_id = ?1",
                    params![shop_id],
                    |row| row.get(0),
                )
                .context("Failed to count shop inventory items")?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}

/// A JSON file that may be absent or unparseable.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonFile {
    Missing,
    Invalid(String),
    Present(Value),
}

pub fn read_json(path: &Path) -> JsonFile {
    if !path.exists() {
        return JsonFile::Missing;
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => JsonFile::Present(value),
            Err(e) => JsonFile::Invalid(e.to_string()),
        },
        Err(e) => JsonFile::Invalid(e.to_string()),
    }
}

/// Local shop data files the gates inspect.
#[derive(Debug, Clone)]
pub struct ShopFiles {
    shop_dir: PathBuf,
    cms_dir: PathBuf,
}

impl ShopFiles {
    pub fn new(shop_dir: PathBuf, cms_dir: PathBuf) -> Self {
        Self { shop_dir, cms_dir }
    }

    pub fn shop_config_path(&self) -> PathBuf {
        self.shop_dir.join("shop.json")
    }

    pub fn shop_config(&self) -> JsonFile {
        read_json(&self.shop_config_path())
    }

    pub fn page(&self, slug: &str) -> JsonFile {
        read_json(&self.shop_dir.join("pages").join(format!("{}.json", slug)))
    }

    pub fn launch_gate(&self) -> JsonFile {
        read_json(&self.cms_dir.join("launch-gate.json"))
    }

    pub fn e2e_results_path(&self) -> PathBuf {
        self.shop_dir.join("test-results").join("e2e-checkout.json")
    }

    pub fn has_legacy_inventory_file(&self) -> bool {
        self.shop_dir.join("inventory.json").exists()
    }

    pub fn holds_dir_exists(&self) -> bool {
        self.shop_dir.join("holds").is_dir()
    }
}
