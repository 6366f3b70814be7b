use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{
    Domain, DomainResult, GrantMatch, GrantRecord, Permission, PermissionRecord, PolicyStore,
    PolicyTransaction, RecordId, Resource, ResourceRecord, Role, RoleRecord, User, UserRecord,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    last_id: RecordId,
    users: BTreeMap<RecordId, UserRecord>,
    roles: BTreeMap<RecordId, RoleRecord>,
    permissions: BTreeMap<RecordId, PermissionRecord>,
    resources: BTreeMap<RecordId, ResourceRecord>,
    user_role_maps: BTreeSet<(RecordId, RecordId, Domain)>,
    // id -> (permission id, resource id)
    permission_resource_maps: BTreeMap<RecordId, (RecordId, RecordId)>,
    // id -> (role id, permission resource map id)
    role_maps: BTreeMap<RecordId, (RecordId, RecordId)>,
    // role map id -> condition
    conditions: BTreeMap<RecordId, String>,
}

impl Tables {
    fn allocate(&mut self) -> RecordId {
        self.last_id += 1;
        self.last_id
    }

    fn user_id(&self, name: &User) -> Option<RecordId> {
        self.users
            .values()
            .find(|record| &record.name == name)
            .map(|record| record.id)
    }

    fn role_id(&self, domain: &Domain, name: &Role) -> Option<RecordId> {
        self.roles
            .values()
            .find(|record| &record.domain == domain && &record.name == name)
            .map(|record| record.id)
    }

    fn permission_id(&self, name: &Permission) -> Option<RecordId> {
        self.permissions
            .values()
            .find(|record| &record.name == name)
            .map(|record| record.id)
    }

    fn resource_id(&self, name: &Resource) -> Option<RecordId> {
        self.resources
            .values()
            .find(|record| &record.name == name)
            .map(|record| record.id)
    }

    fn pair_id(&self, permission_id: RecordId, resource_id: RecordId) -> Option<RecordId> {
        self.permission_resource_maps
            .iter()
            .find(|(_, pair)| **pair == (permission_id, resource_id))
            .map(|(id, _)| *id)
    }

    fn role_map_id(&self, role_id: RecordId, pair_id: RecordId) -> Option<RecordId> {
        self.role_maps
            .iter()
            .find(|(_, map)| **map == (role_id, pair_id))
            .map(|(id, _)| *id)
    }

    fn drop_role_maps_where(&mut self, predicate: impl Fn(&(RecordId, RecordId)) -> bool) {
        let removed: Vec<RecordId> = self
            .role_maps
            .iter()
            .filter(|(_, map)| predicate(map))
            .map(|(id, _)| *id)
            .collect();
        for id in removed {
            self.role_maps.remove(&id);
            self.conditions.remove(&id);
        }
    }

    fn drop_pairs_where(&mut self, predicate: impl Fn(&(RecordId, RecordId)) -> bool) {
        let removed: BTreeSet<RecordId> = self
            .permission_resource_maps
            .iter()
            .filter(|(_, pair)| predicate(pair))
            .map(|(id, _)| *id)
            .collect();
        for id in &removed {
            self.permission_resource_maps.remove(id);
        }
        self.drop_role_maps_where(|(_, pair_id)| removed.contains(pair_id));
    }
}

/// Transactional policy store kept in process memory.
///
/// A transaction holds the store lock for its lifetime and works on a copy of the
/// tables; `commit` swaps the copy in, dropping the transaction discards it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPolicyStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn begin(&self) -> DomainResult<Box<dyn PolicyTransaction>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }

    async fn check_permission(
        &self,
        user: &User,
        domain: &Domain,
        resource: &Resource,
        permission: &Permission,
    ) -> DomainResult<Option<GrantMatch>> {
        let tables = self.tables.lock().await;

        let (Some(user_id), Some(permission_id), Some(resource_id)) = (
            tables.user_id(user),
            tables.permission_id(permission),
            tables.resource_id(resource),
        ) else {
            return Ok(None);
        };
        let Some(pair_id) = tables.pair_id(permission_id, resource_id) else {
            return Ok(None);
        };

        let role_ids: BTreeSet<RecordId> = tables
            .user_role_maps
            .iter()
            .filter(|(u, _, d)| *u == user_id && d == domain)
            .map(|(_, role_id, _)| *role_id)
            .collect();

        let mut matches = tables
            .role_maps
            .iter()
            .filter(|(_, (role_id, pr))| *pr == pair_id && role_ids.contains(role_id))
            .map(|(id, _)| GrantMatch {
                role_map_id: *id,
                condition: tables.conditions.get(id).cloned(),
            })
            .collect::<Vec<_>>();
        matches.sort_by_key(|grant| grant.condition.is_some());

        Ok(matches.into_iter().next())
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl PolicyTransaction for InMemoryTransaction {
    async fn user_by_name(&mut self, name: &User) -> DomainResult<Option<UserRecord>> {
        Ok(self
            .working
            .user_id(name)
            .and_then(|id| self.working.users.get(&id).cloned()))
    }

    async fn create_user(&mut self, name: &User) -> DomainResult<RecordId> {
        if self.working.user_id(name).is_some() {
            return Err(anyhow!("user {} already exists", name).into());
        }
        let id = self.working.allocate();
        self.working.users.insert(
            id,
            UserRecord {
                id,
                name: name.clone(),
            },
        );
        Ok(id)
    }

    async fn delete_user(&mut self, id: RecordId) -> DomainResult<()> {
        self.working.users.remove(&id);
        self.working.user_role_maps.retain(|(user_id, _, _)| *user_id != id);
        Ok(())
    }

    async fn list_users(&mut self) -> DomainResult<Vec<UserRecord>> {
        let mut users: Vec<UserRecord> = self.working.users.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    async fn user_has_assignments(&mut self, user_id: RecordId) -> DomainResult<bool> {
        Ok(self
            .working
            .user_role_maps
            .iter()
            .any(|(id, _, _)| *id == user_id))
    }

    async fn role_by_name(
        &mut self,
        domain: &Domain,
        name: &Role,
    ) -> DomainResult<Option<RoleRecord>> {
        Ok(self
            .working
            .role_id(domain, name)
            .and_then(|id| self.working.roles.get(&id).cloned()))
    }

    async fn create_role(&mut self, domain: &Domain, name: &Role) -> DomainResult<RecordId> {
        if self.working.role_id(domain, name).is_some() {
            return Err(anyhow!("role {} already exists in {}", name, domain).into());
        }
        let id = self.working.allocate();
        self.working.roles.insert(
            id,
            RoleRecord {
                id,
                domain: domain.clone(),
                name: name.clone(),
            },
        );
        Ok(id)
    }

    async fn delete_role(&mut self, id: RecordId) -> DomainResult<()> {
        self.working.roles.remove(&id);
        self.working.user_role_maps.retain(|(_, role_id, _)| *role_id != id);
        self.working.drop_role_maps_where(|(role_id, _)| *role_id == id);
        Ok(())
    }

    async fn list_roles(&mut self, domain: &Domain) -> DomainResult<Vec<RoleRecord>> {
        let mut roles: Vec<RoleRecord> = self
            .working
            .roles
            .values()
            .filter(|record| &record.domain == domain)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn role_name_in_use(&mut self, name: &Role) -> DomainResult<bool> {
        Ok(self.working.roles.values().any(|record| &record.name == name))
    }

    async fn permission_by_name(
        &mut self,
        name: &Permission,
    ) -> DomainResult<Option<PermissionRecord>> {
        Ok(self
            .working
            .permission_id(name)
            .and_then(|id| self.working.permissions.get(&id).cloned()))
    }

    async fn create_permission(&mut self, name: &Permission) -> DomainResult<RecordId> {
        if self.working.permission_id(name).is_some() {
            return Err(anyhow!("permission {} already exists", name).into());
        }
        let id = self.working.allocate();
        self.working.permissions.insert(
            id,
            PermissionRecord {
                id,
                name: name.clone(),
            },
        );
        Ok(id)
    }

    async fn delete_permission(&mut self, id: RecordId) -> DomainResult<()> {
        self.working.permissions.remove(&id);
        self.working.drop_pairs_where(|(permission_id, _)| *permission_id == id);
        Ok(())
    }

    async fn resource_by_name(&mut self, name: &Resource) -> DomainResult<Option<ResourceRecord>> {
        Ok(self
            .working
            .resource_id(name)
            .and_then(|id| self.working.resources.get(&id).cloned()))
    }

    async fn create_resource(&mut self, name: &Resource) -> DomainResult<RecordId> {
        if self.working.resource_id(name).is_some() {
            return Err(anyhow!("resource {} already exists", name).into());
        }
        let id = self.working.allocate();
        self.working.resources.insert(
            id,
            ResourceRecord {
                id,
                name: name.clone(),
            },
        );
        Ok(id)
    }

    async fn delete_resource(&mut self, id: RecordId) -> DomainResult<()> {
        self.working.resources.remove(&id);
        self.working.drop_pairs_where(|(_, resource_id)| *resource_id == id);
        Ok(())
    }

    async fn create_user_role_map(
        &mut self,
        user_id: RecordId,
        role_id: RecordId,
        domain: &Domain,
    ) -> DomainResult<()> {
        if !self.working.users.contains_key(&user_id) || !self.working.roles.contains_key(&role_id)
        {
            return Err(anyhow!("user {} or role {} does not exist", user_id, role_id).into());
        }
        self.working
            .user_role_maps
            .insert((user_id, role_id, domain.clone()));
        Ok(())
    }

    async fn delete_user_role_map(
        &mut self,
        user_id: RecordId,
        role_id: RecordId,
        domain: &Domain,
    ) -> DomainResult<()> {
        self.working
            .user_role_maps
            .remove(&(user_id, role_id, domain.clone()));
        Ok(())
    }

    async fn list_role_users(&mut self, role_id: RecordId) -> DomainResult<Vec<UserRecord>> {
        let mut users: Vec<UserRecord> = self
            .working
            .user_role_maps
            .iter()
            .filter(|(_, r, _)| *r == role_id)
            .filter_map(|(user_id, _, _)| self.working.users.get(user_id).cloned())
            .collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users.dedup();
        Ok(users)
    }

    async fn list_user_roles(
        &mut self,
        user_id: RecordId,
        domain: &Domain,
    ) -> DomainResult<Vec<RoleRecord>> {
        let mut roles: Vec<RoleRecord> = self
            .working
            .user_role_maps
            .iter()
            .filter(|(u, _, d)| *u == user_id && d == domain)
            .filter_map(|(_, role_id, _)| self.working.roles.get(role_id).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        roles.dedup();
        Ok(roles)
    }

    async fn create_permission_resource_map(
        &mut self,
        permission_id: RecordId,
        resource_id: RecordId,
    ) -> DomainResult<RecordId> {
        if let Some(id) = self.working.pair_id(permission_id, resource_id) {
            return Ok(id);
        }
        let id = self.working.allocate();
        self.working
            .permission_resource_maps
            .insert(id, (permission_id, resource_id));
        Ok(id)
    }

    async fn permission_resource_map_id(
        &mut self,
        permission_id: RecordId,
        resource_id: RecordId,
    ) -> DomainResult<Option<RecordId>> {
        Ok(self.working.pair_id(permission_id, resource_id))
    }

    async fn create_role_map(
        &mut self,
        role_id: RecordId,
        permission_resource_id: RecordId,
    ) -> DomainResult<RecordId> {
        if let Some(id) = self.working.role_map_id(role_id, permission_resource_id) {
            return Ok(id);
        }
        let id = self.working.allocate();
        self.working
            .role_maps
            .insert(id, (role_id, permission_resource_id));
        Ok(id)
    }

    async fn delete_role_map(
        &mut self,
        role_id: RecordId,
        permission_resource_id: RecordId,
    ) -> DomainResult<()> {
        self.working
            .drop_role_maps_where(|map| *map == (role_id, permission_resource_id));
        Ok(())
    }

    async fn list_role_grants(&mut self, role_id: RecordId) -> DomainResult<Vec<GrantRecord>> {
        let tables = &self.working;
        let mut grants: Vec<GrantRecord> = tables
            .role_maps
            .values()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, pair_id)| tables.permission_resource_maps.get(pair_id))
            .filter_map(|(permission_id, resource_id)| {
                Some(GrantRecord {
                    permission: tables.permissions.get(permission_id)?.name.clone(),
                    resource: tables.resources.get(resource_id)?.name.clone(),
                })
            })
            .collect();
        grants.sort();
        grants.dedup();
        Ok(grants)
    }

    async fn create_condition(
        &mut self,
        role_map_id: RecordId,
        condition: &str,
    ) -> DomainResult<()> {
        if !self.working.role_maps.contains_key(&role_map_id) {
            return Err(anyhow!("role map {} does not exist", role_map_id).into());
        }
        self.working
            .conditions
            .insert(role_map_id, condition.to_string());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DomainResult<()> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
