use std::collections::HashSet;

use anyhow::Result;

use permgraph::{
    DomainCreatePermission, DomainPermission, ResourceCreatePermission, ResourcePermission, SystemPermission,
};

mod common;
use common::{kind_of, setup_world};

fn view() -> ResourcePermission {
    ResourcePermission::new("view")
}

fn edit() -> ResourcePermission {
    ResourcePermission::new("edit")
}

fn set_of<T: std::hash::Hash + Eq + Clone>(items: &[T]) -> HashSet<T> {
    items.iter().cloned().collect()
}

#[tokio::test]
async fn set_replaces_the_direct_grants() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let doc = h.document("eng").await?;

    h.system.set_resource_permissions(&alice, &doc, &[view(), edit()]).await?;
    assert_eq!(h.system.get_resource_permissions(&alice, &doc).await?, set_of(&[view(), edit()]));

    let edit_with_grant = ResourcePermission::new_with_grant("edit");
    h.system.set_resource_permissions(&alice, &doc, &[edit_with_grant.clone()]).await?;
    assert_eq!(h.system.get_resource_permissions(&alice, &doc).await?, set_of(&[edit_with_grant]));

    h.system.set_resource_permissions(&alice, &doc, &[]).await?;
    assert!(h.system.get_resource_permissions(&alice, &doc).await?.is_empty());

    let conflicting = h
        .system
        .set_resource_permissions(&alice, &doc, &[view(), ResourcePermission::new_with_grant("view")])
        .await;
    assert_eq!(kind_of(conflicting), "invalid_argument");
    Ok(())
}

#[tokio::test]
async fn grant_only_upgrades_and_revoke_ignores_grant_option() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let doc = h.document("acme").await?;
    let view_with_grant = ResourcePermission::new_with_grant("view");

    h.system.grant_resource_permissions(&alice, &doc, &[view()]).await?;
    h.system.grant_resource_permissions(&alice, &doc, &[view_with_grant.clone()]).await?;
    assert_eq!(h.system.get_resource_permissions(&alice, &doc).await?, set_of(&[view_with_grant.clone()]));

    h.system.grant_resource_permissions(&alice, &doc, &[view()]).await?;
    assert_eq!(h.system.get_resource_permissions(&alice, &doc).await?, set_of(&[view_with_grant]));

    // Revoking something never granted is not an error
    h.system.revoke_resource_permissions(&alice, &doc, &[view(), edit()]).await?;
    assert!(h.system.get_resource_permissions(&alice, &doc).await?.is_empty());

    let empty = h.system.grant_resource_permissions(&alice, &doc, &[]).await;
    assert_eq!(kind_of(empty), "invalid_argument");
    Ok(())
}

#[tokio::test]
async fn grantors_need_the_grant_option() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let bob = h.user("bob", "acme").await?;
    let doc = h.document("acme").await?;

    h.system.grant_resource_permissions(&alice, &doc, &[view()]).await?;
    let as_alice = h.login(&alice, "alice-pw").await?;

    let denied = as_alice.grant_resource_permissions(&bob, &doc, &[view()]).await;
    assert_eq!(kind_of(denied), "not_authorized");

    h.system
        .grant_resource_permissions(&alice, &doc, &[ResourcePermission::new_with_grant("view")])
        .await?;
    as_alice.grant_resource_permissions(&bob, &doc, &[view()]).await?;
    assert!(h.system.has_resource_permissions(&bob, &doc, &[view()]).await?);

    // Bob also holds edit, which alice cannot touch; setting only view would
    // have to remove it
    h.system.grant_resource_permissions(&bob, &doc, &[edit()]).await?;
    let replace = as_alice.set_resource_permissions(&bob, &doc, &[view()]).await;
    assert_eq!(kind_of(replace), "not_authorized");

    as_alice.revoke_resource_permissions(&bob, &doc, &[view()]).await?;
    assert_eq!(h.system.get_resource_permissions(&bob, &doc).await?, set_of(&[edit()]));
    Ok(())
}

#[tokio::test]
async fn inherit_may_not_close_a_cycle() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let bob = h.user("bob", "acme").await?;
    let carol = h.user("carol", "acme").await?;
    let inherit = [ResourcePermission::system(SystemPermission::Inherit)];

    h.system.grant_resource_permissions(&alice, &bob, &inherit).await?;
    h.system.grant_resource_permissions(&bob, &carol, &inherit).await?;

    let cycle = h.system.grant_resource_permissions(&carol, &alice, &inherit).await;
    assert_eq!(kind_of(cycle), "invalid_argument");

    let self_loop = h.system.set_resource_permissions(&alice, &alice, &inherit).await;
    assert_eq!(kind_of(self_loop), "invalid_argument");

    // Inheriting from carol grants nothing on carol herself
    let mut as_alice = h.login(&alice, "alice-pw").await?;
    assert_eq!(kind_of(as_alice.impersonate(&carol).await), "not_authorized");
    Ok(())
}

#[tokio::test]
async fn global_and_domain_grants_round_trip() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;

    h.system
        .set_global_resource_permissions(&alice, "DOC", "eng", &[view(), edit()])
        .await?;
    h.system
        .revoke_global_resource_permissions(&alice, "DOC", "eng", &[edit()])
        .await?;
    assert_eq!(
        h.system.get_global_resource_permissions(&alice, "DOC", "eng").await?,
        set_of(&[view()])
    );

    let super_user = DomainPermission::new(SystemPermission::SuperUser);
    h.system.grant_domain_permissions(&alice, "eng", &[super_user.clone()]).await?;
    assert_eq!(h.system.get_domain_permissions(&alice, "eng").await?, set_of(&[super_user.clone()]));
    assert!(h.system.has_domain_permission(&alice, "infra", &super_user, &[]).await?);

    h.system.revoke_domain_permissions(&alice, "eng", &[super_user.clone()]).await?;
    assert!(h.system.get_effective_domain_permissions(&alice, "infra").await?.is_empty());

    let not_a_domain_permission = h
        .system
        .set_domain_permissions(&alice, "eng", &[DomainPermission::new(SystemPermission::Inherit)])
        .await;
    assert_eq!(kind_of(not_a_domain_permission), "invalid_argument");

    // Only holders of the grant option on the domain may hand it out
    let as_alice = h.login(&alice, "alice-pw").await?;
    let denied = as_alice.grant_domain_permissions(&alice, "eng", &[super_user]).await;
    assert_eq!(kind_of(denied), "not_authorized");
    Ok(())
}

#[tokio::test]
async fn resource_create_permissions_drive_creation() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let view_with_grant = ResourcePermission::new_with_grant("view");

    let missing_create = h
        .system
        .set_resource_create_permissions(&alice, "DOC", "acme", &[ResourceCreatePermission::post_create(edit())])
        .await;
    assert_eq!(kind_of(missing_create), "invalid_argument");

    let not_for_docs = h
        .system
        .set_resource_create_permissions(
            &alice,
            "DOC",
            "acme",
            &[
                ResourceCreatePermission::create(),
                ResourceCreatePermission::post_create(ResourcePermission::system(SystemPermission::Impersonate)),
            ],
        )
        .await;
    assert_eq!(kind_of(not_for_docs), "invalid_argument");

    let granted = [
        ResourceCreatePermission::create(),
        ResourceCreatePermission::post_create(view_with_grant.clone()),
        ResourceCreatePermission::post_create(edit()),
    ];
    h.system
        .set_resource_create_permissions(&alice, "DOC", "acme", &granted)
        .await?;
    assert_eq!(
        h.system.get_resource_create_permissions(&alice, "DOC", "acme").await?,
        set_of(&granted)
    );
    assert!(h.system.get_resource_create_permissions(&alice, "DOC", "eng").await?.is_empty());
    assert!(
        h.system
            .has_resource_create_permission(&alice, "DOC", "infra", &ResourceCreatePermission::create(), &[])
            .await?
    );

    let as_alice = h.login(&alice, "alice-pw").await?;
    let doc = as_alice.create_resource("DOC", "eng", Some("design-doc"), None).await?;
    assert_eq!(
        as_alice.get_resource_permissions(&alice, &doc).await?,
        set_of(&[view_with_grant, edit()])
    );

    let elsewhere = as_alice.create_resource("DOC", "globex", None, None).await;
    assert_eq!(kind_of(elsewhere), "not_authorized");

    // Revoking everything is an empty set
    h.system.set_resource_create_permissions(&alice, "DOC", "acme", &[]).await?;
    assert!(
        !h.system
            .has_resource_create_permission(&alice, "DOC", "eng", &ResourceCreatePermission::create(), &[])
            .await?
    );
    Ok(())
}

#[tokio::test]
async fn domain_create_permissions_drive_domain_creation() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let as_alice = h.login(&alice, "alice-pw").await?;

    assert_eq!(kind_of(as_alice.create_domain("alice-root").await), "not_authorized");

    let child_domains = DomainPermission::new(SystemPermission::CreateChildDomain);
    h.system
        .set_domain_create_permissions(
            &alice,
            &[DomainCreatePermission::create(), DomainCreatePermission::post_create(child_domains.clone())],
        )
        .await?;
    assert!(
        h.system
            .has_domain_create_permissions(&alice, &[DomainCreatePermission::create()])
            .await?
    );

    as_alice.create_domain("alice-root").await?;
    assert_eq!(as_alice.get_domain_permissions(&alice, "alice-root").await?, set_of(&[child_domains.clone()]));
    as_alice.create_child_domain("alice-leaf", "alice-root").await?;

    // A child below eng also needs *CREATE-CHILD-DOMAIN on eng
    assert_eq!(kind_of(as_alice.create_child_domain("eng-sub", "eng").await), "not_authorized");
    h.system.grant_domain_permissions(&alice, "eng", &[child_domains]).await?;
    as_alice.create_child_domain("eng-sub", "eng").await?;
    assert_eq!(
        h.system.get_domain_descendants("eng").await?,
        vec!["eng".to_string(), "eng-sub".to_string(), "infra".to_string()]
    );

    let without_create = h
        .system
        .set_domain_create_permissions(
            &alice,
            &[DomainCreatePermission::post_create(DomainPermission::new(SystemPermission::SuperUser))],
        )
        .await;
    assert_eq!(kind_of(without_create), "invalid_argument");

    // Alice holds nothing with grant option, so she cannot pass it on
    let bob = h.user("bob", "acme").await?;
    let denied = as_alice
        .set_domain_create_permissions(&bob, &[DomainCreatePermission::create()])
        .await;
    assert_eq!(kind_of(denied), "not_authorized");
    Ok(())
}

#[tokio::test]
async fn held_post_create_grant_option_covers_plain_requests() -> Result<()> {
    let h = setup_world().await?;
    let sys = permgraph::Resource::system();
    let create = ResourceCreatePermission::create();

    // Super-user of acme holds every post-create permission with grant option
    assert!(
        h.system
            .has_resource_create_permission(&sys, "DOC", "acme", &create, &[ResourceCreatePermission::post_create(edit())])
            .await?
    );
    assert!(
        h.system
            .has_resource_create_permission(
                &sys,
                "DOC",
                "acme",
                &create,
                &[ResourceCreatePermission::post_create(ResourcePermission::new_with_grant("edit"))],
            )
            .await?
    );
    assert!(
        h.system
            .has_domain_create_permissions(
                &sys,
                &[DomainCreatePermission::post_create(DomainPermission::new(SystemPermission::SuperUser))],
            )
            .await?
    );

    let alice = h.user("alice", "acme").await?;
    h.system
        .set_resource_create_permissions(
            &alice,
            "DOC",
            "acme",
            &[create.clone(), ResourceCreatePermission::post_create(ResourcePermission::new_with_grant("edit"))],
        )
        .await?;
    assert!(
        h.system
            .has_resource_create_permission(&alice, "DOC", "eng", &create, &[ResourceCreatePermission::post_create(edit())])
            .await?
    );
    assert!(
        !h.system
            .has_resource_create_permission(
                &alice,
                "DOC",
                "eng",
                &ResourceCreatePermission::post_create(edit()),
                &[ResourceCreatePermission::post_create_with_grant(edit())],
            )
            .await?
    );

    h.system
        .set_domain_create_permissions(
            &alice,
            &[
                DomainCreatePermission::create(),
                DomainCreatePermission::post_create(DomainPermission::new_with_grant(SystemPermission::CreateChildDomain)),
            ],
        )
        .await?;
    assert!(
        h.system
            .has_domain_create_permissions(
                &alice,
                &[DomainCreatePermission::post_create(DomainPermission::new(SystemPermission::CreateChildDomain))],
            )
            .await?
    );
    Ok(())
}
