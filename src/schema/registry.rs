//! Schema Registry
//!
//! Append-only mapping of column names to identifiers and declared types.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{DistribuitoError, Result};

use super::{ColumnId, ValueType};

/// A registered column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub id: ColumnId,
    pub name: String,
    pub value_type: ValueType,
}

/// Immutable copy of the registry at one point in time
///
/// `columns[i].id == ColumnId(i)` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    columns: Vec<ColumnDef>,
}

impl SchemaSnapshot {
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn get(&self, id: ColumnId) -> Option<&ColumnDef> {
        self.columns.get(id.0 as usize)
    }

    pub fn value_type(&self, id: ColumnId) -> Option<ValueType> {
        self.get(id).map(|c| c.value_type)
    }

    pub fn id_of(&self, name: &str) -> Option<ColumnId> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.id)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Name → (id, type), the shape returned by `Engine::schema`
    pub fn to_map(&self) -> BTreeMap<String, (ColumnId, ValueType)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), (c.id, c.value_type)))
            .collect()
    }
}

/// Process-wide column registry of one table
///
/// ## Concurrency:
/// - Lookups take the read lock only
/// - Registration re-checks under the write lock, so two callers racing on
///   the same new name both observe the single winning id
pub struct SchemaRegistry {
    state: RwLock<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    by_name: HashMap<String, ColumnId>,
    columns: Vec<ColumnDef>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Rebuild a registry from a persisted snapshot
    pub fn from_snapshot(snapshot: SchemaSnapshot) -> Result<Self> {
        let mut state = RegistryState::default();
        for (index, column) in snapshot.columns.into_iter().enumerate() {
            if column.id.0 as usize != index {
                return Err(DistribuitoError::Serialization(format!(
                    "schema snapshot has column '{}' with id {} at position {}",
                    column.name, column.id.0, index
                )));
            }
            if state.by_name.insert(column.name.clone(), column.id).is_some() {
                return Err(DistribuitoError::Serialization(format!(
                    "schema snapshot registers '{}' twice",
                    column.name
                )));
            }
            state.columns.push(column);
        }
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Return the id of `name`, registering it with `value_type` if unseen
    ///
    /// Fails with `SchemaTypeConflict` when `name` exists with another type.
    pub fn register_or_get(&self, name: &str, value_type: ValueType) -> Result<ColumnId> {
        if let Some(id) = self.check(name, value_type)? {
            return Ok(id);
        }

        let mut state = self.state.write();
        // Another writer may have won the race since the read lock was released
        if let Some(&id) = state.by_name.get(name) {
            return Self::ensure_type(&state.columns[id.0 as usize], value_type).map(|_| id);
        }

        let id = ColumnId(state.columns.len() as u32);
        state.columns.push(ColumnDef {
            id,
            name: name.to_string(),
            value_type,
        });
        state.by_name.insert(name.to_string(), id);
        tracing::debug!(column = name, id = id.0, %value_type, "Registered column");
        Ok(id)
    }

    /// Validate `value_type` against `name` without registering anything
    ///
    /// - `Ok(Some(id))` if the column exists with this type
    /// - `Ok(None)` if the column is unknown
    pub fn check(&self, name: &str, value_type: ValueType) -> Result<Option<ColumnId>> {
        let state = self.state.read();
        match state.by_name.get(name) {
            Some(&id) => {
                Self::ensure_type(&state.columns[id.0 as usize], value_type)?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Name and type of a registered id
    pub fn lookup(&self, id: ColumnId) -> Result<(String, ValueType)> {
        let state = self.state.read();
        state
            .columns
            .get(id.0 as usize)
            .map(|c| (c.name.clone(), c.value_type))
            .ok_or(DistribuitoError::UnknownColumnId(id.0))
    }

    /// Id of a registered name
    pub fn id_of(&self, name: &str) -> Option<ColumnId> {
        self.state.read().by_name.get(name).copied()
    }

    /// Copy of the current registry contents
    pub fn snapshot(&self) -> SchemaSnapshot {
        SchemaSnapshot {
            columns: self.state.read().columns.clone(),
        }
    }

    /// Number of registered columns
    pub fn len(&self) -> usize {
        self.state.read().columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_type(column: &ColumnDef, attempted: ValueType) -> Result<()> {
        if column.value_type == attempted {
            Ok(())
        } else {
            Err(DistribuitoError::SchemaTypeConflict {
                column: column.name.clone(),
                existing: column.value_type,
                attempted,
            })
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
