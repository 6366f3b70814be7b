use std::sync::Arc;

use common::auth::{CasbinAccessManager, FileAdapterFactory, MemoryAdapterFactory, PolicyCache};
use common::domain::{
    AccessManager, Domain, Enforcement, ErrorKind, Permission, PolicyStore, Resource, Role,
    TenantDirectory, User,
};
use common::memory::{InMemoryPolicyStore, StaticTenantDirectory};
use common::store::{ConditionPolicy, StoreAccessManager};

struct Fixture {
    manager: Box<dyn AccessManager>,
    enforcer: Box<dyn Enforcement>,
}

fn directory() -> Arc<dyn TenantDirectory> {
    Arc::new(StaticTenantDirectory::new([Domain::from("t1")]))
}

fn casbin_fixture() -> Fixture {
    let cache = Arc::new(PolicyCache::with_default_ttl(MemoryAdapterFactory));
    let manager = CasbinAccessManager::new(cache, directory());
    let enforcer = manager.enforcer().clone();
    Fixture {
        manager: Box::new(manager),
        enforcer: Box::new(enforcer),
    }
}

fn store_fixture() -> Fixture {
    let store: Arc<dyn PolicyStore> = Arc::new(InMemoryPolicyStore::new());
    let manager = StoreAccessManager::new(store, directory());
    let enforcer = manager.enforcer().clone();
    Fixture {
        manager: Box::new(manager),
        enforcer: Box::new(enforcer),
    }
}

fn global() -> Domain {
    Domain::global()
}

fn viewer() -> Role {
    Role::from("Viewer")
}

fn alice() -> User {
    User::from("alice")
}

async fn role_is_visible_after_creation(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    manager.add_role(&global(), &viewer()).await.unwrap();

    assert!(manager.role_exists(&global(), &viewer()).await.unwrap());
    assert!(!manager.role_exists(&Domain::from("t1"), &viewer()).await.unwrap());
    assert!(manager.role_users(&global(), &viewer()).await.unwrap().is_empty());
    assert_eq!(manager.roles(&global()).await.unwrap(), vec![viewer()]);
}

async fn duplicate_role_conflicts(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    manager.add_role(&global(), &viewer()).await.unwrap();

    let err = manager.add_role(&global(), &viewer()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

async fn role_in_unknown_domain_is_not_found(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    let err = manager
        .add_role(&Domain::from("t9"), &viewer())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = manager.roles(&Domain::from("t9")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

async fn reserved_role_name_is_rejected(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    let err = manager
        .add_role(&global(), &Role::from("noop"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

async fn assigned_permission_is_enforced(fixture: Fixture) {
    let Fixture { manager, enforcer } = fixture;
    let view_users = Permission::from("ViewUsers");
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager
        .add_role_permissions(&global(), &viewer(), &[view_users.clone()])
        .await
        .unwrap();
    manager
        .add_user_roles(&global(), &alice(), &[viewer()])
        .await
        .unwrap();

    enforcer
        .has_all(&alice(), &global(), &[view_users.clone()])
        .await
        .unwrap();

    manager
        .delete_user_roles(&global(), &alice(), &[viewer()])
        .await
        .unwrap();
    let err = enforcer
        .has_all(&alice(), &global(), &[view_users])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

async fn grants_do_not_leak_across_domains(fixture: Fixture) {
    let Fixture { manager, enforcer } = fixture;
    let t1 = Domain::from("t1");
    let view = Permission::from("View");
    manager.add_role(&t1, &viewer()).await.unwrap();
    manager
        .add_role_permissions(&t1, &viewer(), &[view.clone()])
        .await
        .unwrap();
    manager.add_user_roles(&t1, &alice(), &[viewer()]).await.unwrap();

    enforcer.has_all(&alice(), &t1, &[view.clone()]).await.unwrap();
    let err = enforcer
        .has_all(&alice(), &global(), &[view])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

async fn enforcement_rejects_unknown_domain(fixture: Fixture) {
    let Fixture { enforcer, .. } = fixture;
    let err = enforcer
        .has_all(&alice(), &Domain::from("t9"), &[Permission::from("View")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidDomain);
}

async fn missing_resources_are_reported(fixture: Fixture) {
    let Fixture { manager, enforcer } = fixture;
    let read = Permission::from("Read");
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager
        .add_role_permission_resources(&global(), &viewer(), &read, &[Resource::from("res1")])
        .await
        .unwrap();
    manager
        .add_role_users(&global(), &viewer(), &[alice()])
        .await
        .unwrap();

    let access = enforcer
        .has_resources(
            &alice(),
            &global(),
            &read,
            &[Resource::from("res1"), Resource::from("res2")],
        )
        .await
        .unwrap();
    assert!(!access.granted);
    assert_eq!(access.missing, vec![Resource::from("res2")]);

    let access = enforcer
        .has_resources(&alice(), &global(), &read, &[Resource::from("res1")])
        .await
        .unwrap();
    assert!(access.granted);
    assert!(access.missing.is_empty());
}

async fn role_with_members_cannot_be_deleted(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager
        .add_user_roles(&global(), &alice(), &[viewer()])
        .await
        .unwrap();

    let err = manager.delete_role(&global(), &viewer()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    manager
        .delete_role_users(&global(), &viewer(), &[alice()])
        .await
        .unwrap();
    assert!(manager.delete_role(&global(), &viewer()).await.unwrap());
    assert!(!manager.role_exists(&global(), &viewer()).await.unwrap());
    assert!(!manager.delete_role(&global(), &viewer()).await.unwrap());
}

async fn deleting_role_in_one_domain_keeps_the_other(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    let t1 = Domain::from("t1");
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager.add_role(&t1, &viewer()).await.unwrap();

    assert!(manager.delete_role(&t1, &viewer()).await.unwrap());

    assert!(manager.role_exists(&global(), &viewer()).await.unwrap());
    assert!(!manager.role_exists(&t1, &viewer()).await.unwrap());
}

async fn assignment_with_missing_role_changes_nothing(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    manager.add_role(&global(), &viewer()).await.unwrap();

    let err = manager
        .add_user_roles(&global(), &alice(), &[viewer(), Role::from("Ghost")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let roles = manager.user_roles(&alice(), &[]).await.unwrap();
    assert!(roles.is_empty());
    assert!(manager.role_users(&global(), &viewer()).await.unwrap().is_empty());
}

async fn removing_missing_assignments_is_a_noop(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    manager
        .delete_user_roles(&global(), &alice(), &[Role::from("Ghost")])
        .await
        .unwrap();

    let err = manager
        .delete_role_users(&global(), &Role::from("Ghost"), &[alice()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

async fn role_permissions_track_grants(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    let view = Permission::from("View");
    let read = Permission::from("Read");
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager
        .add_role_permissions(&global(), &viewer(), &[view.clone()])
        .await
        .unwrap();
    manager
        .add_role_permission_resources(
            &global(),
            &viewer(),
            &read,
            &[Resource::from("res2"), Resource::from("res1")],
        )
        .await
        .unwrap();

    let permissions = manager.role_permissions(&global(), &viewer()).await.unwrap();
    assert_eq!(permissions[&view], vec![Resource::global()]);
    assert_eq!(
        permissions[&read],
        vec![Resource::from("res1"), Resource::from("res2")]
    );

    manager
        .delete_role_permission_resources(&global(), &viewer(), &read, &[Resource::from("res1")])
        .await
        .unwrap();
    manager
        .delete_role_permissions(&global(), &viewer(), &[view.clone()])
        .await
        .unwrap();
    let permissions = manager.role_permissions(&global(), &viewer()).await.unwrap();
    assert!(!permissions.contains_key(&view));
    assert_eq!(permissions[&read], vec![Resource::from("res2")]);

    manager
        .delete_all_role_permissions(&global(), &viewer())
        .await
        .unwrap();
    assert!(manager
        .role_permissions(&global(), &viewer())
        .await
        .unwrap()
        .is_empty());
}

async fn role_permissions_require_role(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    let err = manager
        .role_permissions(&global(), &Role::from("Ghost"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = manager
        .add_role_permissions(&global(), &Role::from("Ghost"), &[Permission::from("View")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

async fn users_are_listed_by_name(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    let t1 = Domain::from("t1");
    let view = Permission::from("View");
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager.add_role(&t1, &Role::from("Editor")).await.unwrap();
    manager
        .add_role_permissions(&t1, &Role::from("Editor"), &[view.clone()])
        .await
        .unwrap();
    manager
        .add_role_users(&global(), &viewer(), &[User::from("bob"), alice()])
        .await
        .unwrap();
    manager
        .add_user_roles(&t1, &alice(), &[Role::from("Editor")])
        .await
        .unwrap();

    let users = manager.users(&[]).await.unwrap();
    let names: Vec<&str> = users.iter().map(|user| user.name.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob"]);

    let alice_access = &users[0];
    assert_eq!(alice_access.roles[&global()], vec![viewer()]);
    assert_eq!(alice_access.roles[&t1], vec![Role::from("Editor")]);
    assert_eq!(alice_access.permissions[&t1][&Resource::global()], vec![view]);

    let scoped = manager.user(&alice(), &[global()]).await.unwrap();
    assert!(!scoped.roles.contains_key(&t1));
}

async fn domains_start_with_global(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    assert_eq!(
        manager.domains().await.unwrap(),
        vec![global(), Domain::from("t1")]
    );
    assert!(manager.domain_exists(&global()).await.unwrap());
    assert!(!manager.domain_exists(&Domain::from("t9")).await.unwrap());
}

async fn placeholder_identity_cannot_be_assigned(fixture: Fixture) {
    let Fixture { manager, enforcer } = fixture;
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager
        .add_role_permissions(&global(), &viewer(), &[Permission::from("View")])
        .await
        .unwrap();

    let err = manager
        .add_user_roles(&global(), &User::noop(), &[viewer()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let err = enforcer
        .has_all(&User::noop(), &global(), &[Permission::from("View")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

async fn role_names_are_not_users(fixture: Fixture) {
    let Fixture { manager, enforcer } = fixture;
    let view_users = Permission::from("ViewUsers");
    let editor = Role::from("Editor");
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager.add_role(&global(), &editor).await.unwrap();
    manager
        .add_role_permissions(&global(), &viewer(), &[view_users.clone()])
        .await
        .unwrap();

    let err = enforcer
        .has_all(&User::from("Viewer"), &global(), &[view_users.clone()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = manager
        .add_user_roles(&global(), &User::from("Editor"), &[viewer()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    let err = manager
        .add_role_users(&global(), &viewer(), &[User::from("Editor")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let bob = User::from("bob");
    manager
        .add_user_roles(&global(), &bob, &[editor.clone()])
        .await
        .unwrap();
    let err = enforcer
        .has_all(&bob, &global(), &[view_users])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let users = manager.users(&[]).await.unwrap();
    let names: Vec<&str> = users.iter().map(|user| user.name.as_str()).collect();
    assert_eq!(names, vec!["bob"]);
    assert!(manager
        .role_users(&global(), &viewer())
        .await
        .unwrap()
        .is_empty());
}

async fn user_names_cannot_become_roles(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    let t1 = Domain::from("t1");
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager
        .add_user_roles(&global(), &alice(), &[viewer()])
        .await
        .unwrap();

    let err = manager
        .add_role(&t1, &Role::from("alice"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(!manager.role_exists(&t1, &Role::from("alice")).await.unwrap());

    manager
        .delete_user_roles(&global(), &alice(), &[viewer()])
        .await
        .unwrap();
    manager.add_role(&t1, &Role::from("alice")).await.unwrap();
}

async fn users_without_assignments_are_not_listed(fixture: Fixture) {
    let Fixture { manager, .. } = fixture;
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager
        .add_user_roles(&global(), &alice(), &[viewer()])
        .await
        .unwrap();
    manager
        .delete_role_users(&global(), &viewer(), &[alice()])
        .await
        .unwrap();

    assert!(manager.users(&[]).await.unwrap().is_empty());
    let access = manager.user(&alice(), &[]).await.unwrap();
    assert!(access.roles.is_empty());
}

async fn clearing_permissions_keeps_other_roles(fixture: Fixture) {
    let Fixture { manager, enforcer } = fixture;
    let read = Permission::from("Read");
    let editor = Role::from("Editor");
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager.add_role(&global(), &editor).await.unwrap();
    manager
        .add_role_permissions(&global(), &viewer(), &[Permission::from("ViewUsers")])
        .await
        .unwrap();
    manager
        .add_role_permission_resources(
            &global(),
            &viewer(),
            &read,
            &[Resource::from("res1"), Resource::from("res2")],
        )
        .await
        .unwrap();
    manager
        .add_role_permission_resources(&global(), &editor, &read, &[Resource::from("res1")])
        .await
        .unwrap();
    manager
        .add_user_roles(&global(), &alice(), &[viewer()])
        .await
        .unwrap();

    manager
        .delete_all_role_permissions(&global(), &viewer())
        .await
        .unwrap();

    assert!(manager
        .role_permissions(&global(), &viewer())
        .await
        .unwrap()
        .is_empty());
    assert!(manager.role_exists(&global(), &viewer()).await.unwrap());
    let editor_permissions = manager.role_permissions(&global(), &editor).await.unwrap();
    assert_eq!(editor_permissions[&read], vec![Resource::from("res1")]);

    let access = enforcer
        .has_resources(&alice(), &global(), &read, &[Resource::from("res1")])
        .await
        .unwrap();
    assert_eq!(access.missing, vec![Resource::from("res1")]);
}

macro_rules! for_each_strategy {
    ($($scenario:ident),* $(,)?) => {
        mod casbin_strategy {
            $(
                #[tokio::test]
                async fn $scenario() {
                    super::$scenario(super::casbin_fixture()).await;
                }
            )*
        }

        mod store_strategy {
            $(
                #[tokio::test]
                async fn $scenario() {
                    super::$scenario(super::store_fixture()).await;
                }
            )*
        }
    };
}

for_each_strategy!(
    role_is_visible_after_creation,
    duplicate_role_conflicts,
    role_in_unknown_domain_is_not_found,
    reserved_role_name_is_rejected,
    assigned_permission_is_enforced,
    grants_do_not_leak_across_domains,
    enforcement_rejects_unknown_domain,
    missing_resources_are_reported,
    role_with_members_cannot_be_deleted,
    deleting_role_in_one_domain_keeps_the_other,
    assignment_with_missing_role_changes_nothing,
    removing_missing_assignments_is_a_noop,
    role_permissions_track_grants,
    role_permissions_require_role,
    users_are_listed_by_name,
    domains_start_with_global,
    placeholder_identity_cannot_be_assigned,
    role_names_are_not_users,
    user_names_cannot_become_roles,
    users_without_assignments_are_not_listed,
    clearing_permissions_keeps_other_roles,
);

#[tokio::test]
async fn test_conditional_grant_is_refused_by_default() {
    let store: Arc<dyn PolicyStore> = Arc::new(InMemoryPolicyStore::new());
    let manager = StoreAccessManager::new(Arc::clone(&store), directory());
    let view = Permission::from("View");
    manager.add_role(&global(), &viewer()).await.unwrap();
    manager
        .add_user_roles(&global(), &alice(), &[viewer()])
        .await
        .unwrap();
    manager
        .add_conditional_grant(&global(), &viewer(), &view, &Resource::global(), "weekday")
        .await
        .unwrap();

    let err = manager
        .enforcer()
        .has_all(&alice(), &global(), &[view.clone()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let lenient = StoreAccessManager::new(store, directory())
        .with_condition_policy(ConditionPolicy::Ignore);
    lenient
        .enforcer()
        .has_all(&alice(), &global(), &[view])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_file_backed_policy_survives_new_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.csv");

    {
        let cache = Arc::new(PolicyCache::with_default_ttl(FileAdapterFactory::new(&path)));
        let manager = CasbinAccessManager::new(cache, directory());
        manager.add_role(&global(), &viewer()).await.unwrap();
        manager
            .add_role_permissions(&global(), &viewer(), &[Permission::from("ViewUsers")])
            .await
            .unwrap();
        manager
            .add_user_roles(&global(), &alice(), &[viewer()])
            .await
            .unwrap();
    }

    let cache = Arc::new(PolicyCache::with_default_ttl(FileAdapterFactory::new(&path)));
    let manager = CasbinAccessManager::new(cache, directory());
    assert!(manager.role_exists(&global(), &viewer()).await.unwrap());
    manager
        .enforcer()
        .has_all(&alice(), &global(), &[Permission::from("ViewUsers")])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_save_does_not_leave_rules_live() {
    let dir = tempfile::tempdir().unwrap();
    let policy_dir = dir.path().join("policy");
    let path = policy_dir.join("policy.csv");
    let cache = Arc::new(PolicyCache::with_default_ttl(FileAdapterFactory::new(&path)));
    let manager = CasbinAccessManager::new(cache, directory());
    let editor = Role::from("Editor");

    manager.add_role(&global(), &viewer()).await.unwrap();
    let saved = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_dir_all(&policy_dir).unwrap();

    assert!(manager.add_role(&global(), &editor).await.is_err());
    assert!(manager.role_exists(&global(), &editor).await.is_err());

    std::fs::create_dir_all(&policy_dir).unwrap();
    std::fs::write(&path, saved).unwrap();

    assert!(!manager.role_exists(&global(), &editor).await.unwrap());
    assert!(manager.role_exists(&global(), &viewer()).await.unwrap());
    manager.add_role(&global(), &editor).await.unwrap();
    assert!(manager.role_exists(&global(), &editor).await.unwrap());
}
