//! System entities declared for every root
//!
//! Each root gets a system namespace and a principal in it that the
//! resolver uses to push and serve account credentials.

use keystone_types::{
    Entity, EntityId, EntityKey, EntitySpec, NamespaceSpec, ObjectRef, Permission, Permissions,
    PrincipalSpec, ResponsePermission,
};

/// Subjects the resolver principal publishes to
pub const RESOLVER_PUBLISH: [&str; 2] = ["$SYS.REQ.ACCOUNT.*.CLAIMS.UPDATE", "$SYS.REQ.CLAIMS.>"];

/// Subjects the resolver principal subscribes to
pub const RESOLVER_SUBSCRIBE: [&str; 2] = ["$SYS.REQ.ACCOUNT.*.CLAIMS.LOOKUP", "$SYS.REQ.CLAIMS.>"];

/// Name of the system namespace of `root`
pub fn system_namespace_name(root: &str) -> String {
    format!("{root}-system")
}

/// Name of the resolver principal of `root`
pub fn resolver_principal_name(root: &str) -> String {
    format!("{root}-jwt")
}

/// The system namespace and resolver principal for `root`, in issue order
pub fn system_entities(root: &EntityId) -> Vec<Entity> {
    let scope = root.scope();
    let namespace_name = system_namespace_name(root.name());

    let mut namespace = NamespaceSpec::new(ObjectRef::scoped(scope, root.name()));
    namespace.allowed_scopes.push(scope.to_string());

    let mut principal = PrincipalSpec::new(ObjectRef::scoped(scope, namespace_name.clone()));
    principal.permissions = Permissions {
        publish: Permission::allow(RESOLVER_PUBLISH),
        subscribe: Permission::allow(RESOLVER_SUBSCRIBE),
        response: Some(ResponsePermission {
            max_msgs: 1,
            expires: -1,
        }),
    };

    vec![
        Entity::new(
            EntityKey::new(scope, namespace_name),
            EntitySpec::Namespace(namespace),
        )
        .owned_by(root.clone()),
        Entity::new(
            EntityKey::new(scope, resolver_principal_name(root.name())),
            EntitySpec::Principal(principal),
        )
        .owned_by(root.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_entities_chain_to_root() {
        let root = EntityId::root("infra", "main");
        let entities = system_entities(&root);
        assert_eq!(entities.len(), 2);

        let namespace = &entities[0];
        assert_eq!(namespace.id, EntityId::namespace("infra", "main-system"));
        assert_eq!(namespace.parent(), Some(root.clone()));

        let principal = &entities[1];
        assert_eq!(principal.id, EntityId::principal("infra", "main-jwt"));
        assert_eq!(principal.parent(), Some(namespace.id.clone()));

        let EntitySpec::Namespace(spec) = &namespace.spec else {
            panic!("expected namespace spec");
        };
        assert!(spec.allows_scope("infra"));
        for entity in &entities {
            assert!(entity.spec.validate().is_ok());
            assert_eq!(entity.generation, 1);
            assert_eq!(entity.owner, Some(EntityId::root("infra", "main")));
        }
    }

    #[test]
    fn test_resolver_permissions() {
        let entities = system_entities(&EntityId::root("infra", "main"));
        let EntitySpec::Principal(spec) = &entities[1].spec else {
            panic!("expected principal spec");
        };
        assert_eq!(spec.permissions.publish.allow, RESOLVER_PUBLISH.to_vec());
        assert_eq!(spec.permissions.subscribe.allow, RESOLVER_SUBSCRIBE.to_vec());
        assert_eq!(spec.permissions.response.as_ref().map(|r| r.max_msgs), Some(1));
    }
}
