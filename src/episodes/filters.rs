use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::keys;
use crate::cache::KvStorage;

/// Watch-status and airing-status tags the user has ticked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedFilters {
  #[serde(default)]
  pub watch_statuses: Vec<String>,
  #[serde(default)]
  pub airing_statuses: Vec<String>,
}

impl SelectedFilters {
  pub fn accepts(&self, watch_status: &str, airing_status: &str) -> bool {
    self.watch_statuses.iter().any(|s| s == watch_status)
      && self.airing_statuses.iter().any(|s| s == airing_status)
  }
}

/// Persists `SelectedFilters` verbatim under `selectedFilters`.
#[derive(Clone)]
pub struct FilterStore {
  storage: Arc<dyn KvStorage>,
}

impl FilterStore {
  pub fn new(storage: Arc<dyn KvStorage>) -> Self {
    Self { storage }
  }

  /// Stored filters, or `None` if nothing (readable) was ever saved.
  pub fn load(&self) -> Option<SelectedFilters> {
    let raw = match self.storage.get(keys::SELECTED_FILTERS) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(error = %e, "failed to read selected filters");
        return None;
      }
    };

    match serde_json::from_str(&raw) {
      Ok(filters) => Some(filters),
      Err(e) => {
        warn!(error = %e, "corrupt selected filters, evicting");
        if let Err(e) = self.storage.remove(keys::SELECTED_FILTERS) {
          warn!(error = %e, "failed to evict selected filters");
        }
        None
      }
    }
  }

  pub fn save(&self, filters: &SelectedFilters) -> Result<()> {
    let raw = serde_json::to_string(filters)?;
    self.storage.put(keys::SELECTED_FILTERS, &raw)
  }
}
