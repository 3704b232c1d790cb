//! Delegation resolver: principal/delegate closures and default delegate
//! creation when entities enter views.

use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::errors::Result;

use super::model::{Entity, EntityType, NewEntity};
use super::repository::EntityRepositoryTrait;

pub struct DelegationService {
    repository: Arc<dyn EntityRepositoryTrait>,
}

impl DelegationService {
    pub fn new(repository: Arc<dyn EntityRepositoryTrait>) -> Self {
        Self { repository }
    }

    /// Entities that visually stand in for any state of `entity_id`.
    /// Traversal is bounded by a visited set: delegation edges may form
    /// cycles and nothing forbids them at write time.
    pub fn get_delegates(&self, entity_id: i64) -> Result<Vec<Entity>> {
        let mut seen: HashSet<i64> = HashSet::new();
        let mut delegates = Vec::new();
        for delegation in self.repository.load_delegations_for_entity_states(entity_id)? {
            if !seen.insert(delegation.delegate_entity_id) {
                continue;
            }
            delegates.push(self.repository.get_entity(delegation.delegate_entity_id)?);
        }
        Ok(delegates)
    }

    /// Entities whose states `entity_id` stands in for.
    pub fn get_principals(&self, entity_id: i64) -> Result<Vec<Entity>> {
        let mut seen: HashSet<i64> = HashSet::new();
        let mut principals = Vec::new();
        for delegation in self.repository.load_delegations_where_delegate(entity_id)? {
            let states = self.find_state_owner(delegation.entity_state_id)?;
            let Some(owner_id) = states else { continue };
            if owner_id == entity_id || !seen.insert(owner_id) {
                continue;
            }
            principals.push(self.repository.get_entity(owner_id)?);
        }
        Ok(principals)
    }

    fn find_state_owner(&self, entity_state_id: i64) -> Result<Option<i64>> {
        // Delegations carry only the state id; resolve its owning entity.
        Ok(self
            .repository
            .get_state(entity_state_id)
            .ok()
            .map(|state| state.entity_id))
    }

    /// Ensure every state whose type calls for a default delegate has one.
    ///
    /// Idempotent: states that already delegate are skipped; an existing
    /// delegate of the target type is reused before a new entity is
    /// created. A new delegate is named `"<entity> - <TypeLabel>"`, carries
    /// no integration key, and all qualifying states are wired to it in a
    /// single transaction.
    pub async fn ensure_default_delegates(&self, entity_id: i64) -> Result<Vec<Entity>> {
        let entity = self.repository.get_entity(entity_id)?;
        let states = self.repository.load_states(entity_id)?;
        let existing = self.repository.load_delegations_for_entity_states(entity_id)?;

        let delegated_state_ids: HashSet<i64> =
            existing.iter().map(|d| d.entity_state_id).collect();

        // Existing delegates grouped by entity type, for reuse.
        let mut delegates_by_type: HashMap<EntityType, Entity> = HashMap::new();
        let mut delegate_list = Vec::new();
        let mut seen_delegates = HashSet::new();
        for delegation in &existing {
            if !seen_delegates.insert(delegation.delegate_entity_id) {
                continue;
            }
            let delegate = self.repository.get_entity(delegation.delegate_entity_id)?;
            delegates_by_type
                .entry(delegate.entity_type)
                .or_insert_with(|| delegate.clone());
            delegate_list.push(delegate);
        }

        // States needing a delegate, grouped by the target entity type so
        // only one delegate of each type gets created.
        let mut states_by_target: HashMap<EntityType, Vec<i64>> = HashMap::new();
        for state in &states {
            let Some(target_type) = state.state_type.default_delegate_type() else {
                continue;
            };
            if delegated_state_ids.contains(&state.id) {
                continue;
            }
            states_by_target.entry(target_type).or_default().push(state.id);
        }

        for (target_type, state_ids) in states_by_target {
            if let Some(existing_delegate) = delegates_by_type.get(&target_type) {
                debug!(
                    "Reusing delegate {existing_delegate} for {} states of {entity}",
                    state_ids.len()
                );
                for state_id in state_ids {
                    self.repository
                        .insert_delegation(state_id, existing_delegate.id)
                        .await?;
                }
                continue;
            }

            let new_entity = NewEntity {
                name: format!("{} - {}", entity.name, target_type.label()),
                entity_type: target_type,
                can_user_delete: true,
                has_video_stream: false,
                integration_key: None,
            };
            let delegate = self
                .repository
                .create_delegate_with_delegations(new_entity, state_ids)
                .await?;
            delegates_by_type.insert(target_type, delegate.clone());
            delegate_list.push(delegate);
        }

        Ok(delegate_list)
    }

    /// When an entity leaves a view, remove each of its delegates from that
    /// view too, but only when the entity is the delegate's sole principal.
    /// The delegate entity itself survives: other views may still use it.
    pub async fn remove_delegates_from_view_if_orphaned(
        &self,
        entity_id: i64,
        location_view_id: i64,
    ) -> Result<()> {
        for delegate in self.get_delegates(entity_id)? {
            let principals = self.get_principals(delegate.id)?;
            let is_sole_principal =
                principals.len() == 1 && principals[0].id == entity_id;
            if !is_sole_principal {
                continue;
            }
            if let Some(view) = self
                .repository
                .find_entity_view(delegate.id, location_view_id)?
            {
                self.repository.delete_entity_view(view.id).await?;
            }
        }
        Ok(())
    }
}
