//! Drug stock changes. Inventory updates are broadcast to every client, so no
//! group is joined.

use clinicsync_shared::{EventKind, InventoryUpdate};

use super::{EventSetup, Teardown};
use crate::ws::ConnectionManager;

/// Which inventory updates to forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryFilter {
    drug_id: Option<String>,
    warehouse_id: Option<String>,
    low_stock_only: bool,
}

impl InventoryFilter {
    /// Forward every update.
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn drug(mut self, drug_id: impl Into<String>) -> Self {
        self.drug_id = Some(drug_id.into());
        self
    }

    #[must_use]
    pub fn warehouse(mut self, warehouse_id: impl Into<String>) -> Self {
        self.warehouse_id = Some(warehouse_id.into());
        self
    }

    #[must_use]
    pub fn low_stock_only(mut self) -> Self {
        self.low_stock_only = true;
        self
    }

    pub fn matches(&self, update: &InventoryUpdate) -> bool {
        if let Some(drug_id) = &self.drug_id {
            if &update.drug_id != drug_id {
                return false;
            }
        }
        if let Some(warehouse_id) = &self.warehouse_id {
            if update.warehouse_id.as_ref() != Some(warehouse_id) {
                return false;
            }
        }
        !self.low_stock_only || update.low_stock
    }
}

pub fn setup_inventory_events<F>(
    manager: &ConnectionManager,
    filter: InventoryFilter,
    callback: F,
) -> Teardown
where
    F: Fn(InventoryUpdate) + Send + Sync + 'static,
{
    EventSetup::new(manager)
        .listen(
            EventKind::InventoryUpdate,
            move |update: &InventoryUpdate| filter.matches(update),
            callback,
        )
        .build()
}
