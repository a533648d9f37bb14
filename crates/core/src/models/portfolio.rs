use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lot::Lot;

/// A named collection of purchase lots.
///
/// This is the in-memory shape the persistence layer hands to the core.
/// Lots are kept in insertion order; anything that needs FIFO order sorts
/// by `purchased_at` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,

    /// All purchase lots, each carrying its own sales
    pub lots: Vec<Lot>,
}

impl Portfolio {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
            lots: Vec::new(),
        }
    }

    pub fn lot(&self, lot_id: Uuid) -> Option<&Lot> {
        self.lots.iter().find(|l| l.id == lot_id)
    }

    pub fn lot_mut(&mut self, lot_id: Uuid) -> Option<&mut Lot> {
        self.lots.iter_mut().find(|l| l.id == lot_id)
    }
}

impl Default for Portfolio {
    fn default() -> Self {
        Self::new("My Portfolio")
    }
}
