use anyhow::Result;

use permgraph::{DomainPermission, Resource, ResourcePermission, SystemPermission};

mod common;
use common::{kind_of, setup, setup_world};

fn view() -> ResourcePermission {
    ResourcePermission::new("view")
}

fn edit() -> ResourcePermission {
    ResourcePermission::new("edit")
}

#[tokio::test]
async fn self_checks_skip_the_query_gate() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let bob = h.user("bob", "acme").await?;
    let doc = h.document("acme").await?;

    let as_alice = h.login(&alice, "alice-pw").await?;
    assert!(!as_alice.has_resource_permissions(&alice, &doc, &[view()]).await?);

    // Another accessor needs *QUERY, *IMPERSONATE or super-user
    let err = as_alice.has_resource_permissions(&bob, &doc, &[view()]).await;
    assert_eq!(kind_of(err), "not_authorized");

    h.system
        .grant_resource_permissions(&alice, &bob, &[ResourcePermission::system(SystemPermission::Query)])
        .await?;
    h.system.grant_resource_permissions(&bob, &doc, &[view()]).await?;
    assert!(as_alice.has_resource_permissions(&bob, &doc, &[view()]).await?);

    // The system resource is super-user of acme, so it may query anyone there
    assert!(h.system.has_resource_permissions(&bob, &doc, &[view()]).await?);
    Ok(())
}

#[tokio::test]
async fn global_grants_reach_every_descendant_domain() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;

    h.system
        .grant_global_resource_permissions(&alice, "DOC", "acme", &[view()])
        .await?;

    let as_alice = h.login(&alice, "alice-pw").await?;
    for domain in ["acme", "eng", "infra"] {
        assert!(
            as_alice.has_global_resource_permissions(&alice, "DOC", domain, &[view()]).await?,
            "view should reach {domain}"
        );
        assert!(!as_alice.has_global_resource_permissions(&alice, "DOC", domain, &[edit()]).await?);
    }
    assert!(!as_alice.has_global_resource_permissions(&alice, "DOC", "globex", &[view()]).await?);

    // Granted at acme, not directly at eng
    assert!(h.system.get_global_resource_permissions(&alice, "DOC", "eng").await?.is_empty());
    let effective = h.system.get_effective_global_resource_permissions(&alice, "DOC", "infra").await?;
    let found = effective.iter().find(|p| p.name() == view().name()).expect("view inherited from acme");
    assert_eq!(found.domain_level(), 2);

    // A document in a descendant domain is covered by the global grant
    let doc = h.document("infra").await?;
    assert!(as_alice.has_resource_permissions(&alice, &doc, &[view()]).await?);
    Ok(())
}

#[tokio::test]
async fn inherit_composes_across_hops() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let bob = h.user("bob", "acme").await?;
    let carol = h.user("carol", "acme").await?;
    let inherit = ResourcePermission::system(SystemPermission::Inherit);

    h.system
        .grant_global_resource_permissions(&alice, "DOC", "eng", &[edit()])
        .await?;
    h.system.grant_resource_permissions(&bob, &alice, &[inherit.clone()]).await?;
    h.system.grant_resource_permissions(&carol, &bob, &[inherit]).await?;

    assert!(h.system.has_global_resource_permissions(&bob, "DOC", "eng", &[edit()]).await?);
    assert!(h.system.has_global_resource_permissions(&carol, "DOC", "infra", &[edit()]).await?);
    assert!(!h.system.has_global_resource_permissions(&carol, "DOC", "acme", &[edit()]).await?);

    let effective = h.system.get_effective_global_resource_permissions(&carol, "DOC", "eng").await?;
    let found = effective.iter().find(|p| p.name() == edit().name()).expect("edit inherited via bob");
    assert_eq!(found.inherit_level(), 2);
    Ok(())
}

#[tokio::test]
async fn super_user_covers_every_permission_below_its_domain() -> Result<()> {
    let h = setup_world().await?;
    let dave = h.user("dave", "acme").await?;
    let erin = h.user("erin", "acme").await?;

    h.system
        .grant_domain_permissions(&dave, "eng", &[DomainPermission::new(SystemPermission::SuperUser)])
        .await?;

    let both = [view(), ResourcePermission::new_with_grant("edit")];
    assert!(h.system.has_global_resource_permissions(&dave, "DOC", "eng", &both).await?);
    assert!(h.system.has_global_resource_permissions(&dave, "DOC", "infra", &both).await?);
    assert!(!h.system.has_global_resource_permissions(&dave, "DOC", "acme", &[view()]).await?);

    // Inherited super-user counts too
    h.system
        .grant_resource_permissions(&erin, &dave, &[ResourcePermission::system(SystemPermission::Inherit)])
        .await?;
    assert!(h.system.has_global_resource_permissions(&erin, "DOC", "infra", &both).await?);

    let domain_permissions = h.system.get_effective_domain_permissions(&erin, "infra").await?;
    assert!(domain_permissions.contains(&DomainPermission::new_with_grant(SystemPermission::CreateChildDomain)));
    Ok(())
}

#[tokio::test]
async fn same_name_with_different_grant_option_is_two_requirements() -> Result<()> {
    let h = setup_world().await?;
    let frank = h.user("frank", "acme").await?;
    let doc = h.document("eng").await?;

    h.system.grant_resource_permissions(&frank, &doc, &[view()]).await?;
    let both = [view(), ResourcePermission::new_with_grant("view")];
    assert!(!h.system.has_resource_permissions(&frank, &doc, &both).await?);

    h.system
        .grant_global_resource_permissions(&frank, "DOC", "acme", &[ResourcePermission::new_with_grant("view")])
        .await?;
    assert!(h.system.has_resource_permissions(&frank, &doc, &both).await?);

    let effective = h.system.get_effective_resource_permissions(&frank, &doc).await?;
    assert!(effective.contains(&view()));
    assert!(effective.contains(&ResourcePermission::new_with_grant("view")));

    let err = h.system.has_resource_permissions(&frank, &doc, &[view(), view()]).await;
    assert_eq!(kind_of(err), "invalid_argument");
    Ok(())
}

#[tokio::test]
async fn names_are_trimmed_before_lookup() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    h.system
        .grant_global_resource_permissions(&alice, " DOC\t", "  acme ", &[ResourcePermission::new(" view ")])
        .await?;

    assert!(h.system.has_global_resource_permissions(&alice, "DOC", "acme", &[view()]).await?);
    assert!(
        h.system
            .has_global_resource_permissions(&alice, "\tDOC ", " eng", &[ResourcePermission::new("view\t")])
            .await?
    );
    assert_eq!(h.system.get_domain_descendants(" eng ").await?, vec!["eng".to_string(), "infra".to_string()]);
    Ok(())
}

#[tokio::test]
async fn invalid_references_fail_closed() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let bob = h.user("bob", "acme").await?;
    let doc = h.document("acme").await?;
    let alice_id = alice.id().expect("resolved");

    let unknown_id = h.system.has_resource_permissions(&Resource::new(9_999), &doc, &[view()]).await;
    assert_eq!(kind_of(unknown_id), "invalid_argument");

    let unknown_external = h
        .system
        .has_resource_permissions(&Resource::from_external_id("nobody"), &doc, &[view()])
        .await;
    assert_eq!(kind_of(unknown_external), "invalid_argument");

    let mismatched = h
        .system
        .has_resource_permissions(&Resource::with_external_id(alice_id, "bob"), &doc, &[view()])
        .await;
    assert_eq!(kind_of(mismatched), "invalid_argument");

    let unknown_class = h.system.has_global_resource_permissions(&bob, "NOPE", "acme", &[view()]).await;
    assert_eq!(kind_of(unknown_class), "invalid_argument");

    let unknown_domain = h.system.has_global_resource_permissions(&bob, "DOC", "nowhere", &[view()]).await;
    assert_eq!(kind_of(unknown_domain), "invalid_argument");

    let undefined = h
        .system
        .has_resource_permissions(&bob, &doc, &[ResourcePermission::new("shred")])
        .await;
    assert_eq!(kind_of(undefined), "invalid_argument");

    let wrong_class = h
        .system
        .has_resource_permissions(&bob, &doc, &[ResourcePermission::system(SystemPermission::Impersonate)])
        .await;
    assert_eq!(kind_of(wrong_class), "invalid_argument");

    let blank_class = h.system.has_global_resource_permissions(&bob, "  ", "acme", &[view()]).await;
    assert_eq!(kind_of(blank_class), "precondition");

    let no_ids: Resource = serde_json::from_str(r#"{"id":null,"external_id":null}"#)?;
    let anonymous_reference = h.system.has_global_resource_permissions(&no_ids, "DOC", "acme", &[view()]).await;
    assert!(matches!(
        anonymous_reference,
        Err(ref e) if e.kind() == "invalid_argument" && e.to_string().contains("resource id and/or external id is required")
    ));
    Ok(())
}

#[tokio::test]
async fn empty_requirements() -> Result<()> {
    let h = setup_world().await?;
    h.system.create_resource_class("BARE", true, false).await?;
    h.system.create_domain("bare").await?;
    let sys = Resource::system();
    let impersonate = ResourcePermission::system(SystemPermission::Impersonate);

    // The set form needs at least one permission
    let err = h.system.has_global_resource_permissions(&sys, "BARE", "bare", &[]).await;
    assert!(matches!(err, Err(ref e) if e.to_string().contains("permissions required")));

    // The multi-arg form with an empty tail is a plain single check
    assert!(h.system.has_global_resource_permission(&sys, "BARE", "bare", &impersonate, &[]).await?);

    let err = h
        .system
        .has_global_resource_permission(&sys, "BARE", "bare", &impersonate, &[impersonate.clone()])
        .await;
    assert!(matches!(err, Err(ref e) if e.to_string().contains("duplicate element")));
    Ok(())
}

#[tokio::test]
async fn registering_a_permission_brings_it_under_super_user() -> Result<()> {
    let h = setup().await?;
    let sys = Resource::system();

    h.system.create_domain("D1").await?;
    h.system.create_resource_class("Doc", false, false).await?;
    h.system.create_resource_class("Agent", true, false).await?;
    let agent = h.system.create_resource("Agent", "D1", Some("resource-x"), None).await?;
    h.system
        .grant_domain_permissions(&agent, "D1", &[DomainPermission::new(SystemPermission::SuperUser)])
        .await?;

    let before = h
        .system
        .has_global_resource_permissions(&sys, "Doc", "D1", &[edit()])
        .await;
    assert_eq!(kind_of(before), "invalid_argument");

    h.system.create_resource_permission("Doc", "edit").await?;
    assert!(h.system.has_global_resource_permissions(&sys, "Doc", "D1", &[edit()]).await?);
    assert!(h.system.has_global_resource_permissions(&agent, "Doc", "D1", &[edit()]).await?);
    assert!(h.system.get_global_resource_permissions(&agent, "Doc", "D1").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn enumerates_resources_by_permission() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let in_eng = h.document("eng").await?;
    let in_globex = h.document("globex").await?;
    let shared = h.document("globex").await?;
    let _unrelated = h.document("globex").await?;

    h.system
        .grant_global_resource_permissions(&alice, "DOC", "eng", &[view()])
        .await?;
    h.system.grant_resource_permissions(&alice, &shared, &[view(), edit()]).await?;
    h.system.grant_resource_permissions(&alice, &in_globex, &[edit()]).await?;

    let viewable = h.system.get_resources_by_resource_permissions(&alice, "DOC", &[view()]).await?;
    assert_eq!(viewable, vec![in_eng.clone(), shared.clone()]);

    let both = h
        .system
        .get_resources_by_resource_permissions(&alice, "DOC", &[view(), edit()])
        .await?;
    assert_eq!(both, vec![shared.clone()]);

    let in_acme = h
        .system
        .get_resources_by_resource_permissions_and_domain(&alice, "DOC", "acme", &[view()])
        .await?;
    assert_eq!(in_acme, vec![in_eng]);
    Ok(())
}

#[tokio::test]
async fn assertions_turn_false_into_not_authorized() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let doc = h.document("eng").await?;

    h.system.grant_resource_permissions(&alice, &doc, &[view()]).await?;
    h.system.assert_resource_permissions(&alice, &doc, &[view()]).await?;
    h.system.assert_resource_permission(&alice, &doc, &view(), &[]).await?;

    let missing = h.system.assert_resource_permission(&alice, &doc, &view(), &[edit()]).await;
    assert_eq!(kind_of(missing), "not_authorized");

    let global = h.system.assert_global_resource_permissions(&alice, "DOC", "eng", &[view()]).await;
    assert_eq!(kind_of(global), "not_authorized");

    let domain = h
        .system
        .assert_domain_permissions(&alice, "eng", &[DomainPermission::new(SystemPermission::SuperUser)])
        .await;
    assert_eq!(kind_of(domain), "not_authorized");
    Ok(())
}

#[tokio::test]
async fn inherit_closure_survives_cycles_in_stored_grants() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let bob = h.user("bob", "acme").await?;
    let doc = h.document("eng").await?;

    // The mutation API refuses cycles, so write one directly
    let user_class: i64 = sqlx::query_scalar("SELECT ResourceClassId FROM ResourceClass WHERE ResourceClassName = 'USER'")
        .fetch_one(&h.pool)
        .await?;
    for (accessor, accessed) in [(&alice, &bob), (&bob, &alice)] {
        sqlx::query(
            "INSERT INTO Grant_ResPerm_Sys \
             (AccessorResourceId, GrantorResourceId, AccessedResourceId, ResourceClassId, SysPermissionId, IsWithGrant) \
             VALUES (?, 0, ?, ?, ?, 0)",
        )
        .bind(accessor.id())
        .bind(accessed.id())
        .bind(user_class)
        .bind(SystemPermission::Inherit.id())
        .execute(&h.pool)
        .await?;
    }

    h.system
        .grant_global_resource_permissions(&alice, "DOC", "eng", &[view()])
        .await?;
    h.system.grant_resource_permissions(&bob, &doc, &[edit()]).await?;

    for accessor in [&alice, &bob] {
        let effective = h.system.get_effective_resource_permissions(accessor, &doc).await?;
        assert!(effective.contains(&view()));
        assert!(effective.contains(&edit()));
        assert_eq!(effective.len(), 2);
    }
    assert!(h.system.has_resource_permissions(&alice, &doc, &[view(), edit()]).await?);
    Ok(())
}

#[tokio::test]
async fn impersonate_does_not_pass_on_permissions() -> Result<()> {
    let h = setup_world().await?;
    let alice = h.user("alice", "acme").await?;
    let bob = h.user("bob", "acme").await?;
    let doc = h.document("acme").await?;

    h.system
        .grant_resource_permissions(&alice, &bob, &[ResourcePermission::system(SystemPermission::Impersonate)])
        .await?;
    h.system.grant_resource_permissions(&bob, &doc, &[view()]).await?;
    h.system
        .grant_global_resource_permissions(&bob, "DOC", "acme", &[edit()])
        .await?;

    assert!(h.system.has_resource_permissions(&bob, &doc, &[view(), edit()]).await?);
    assert!(!h.system.has_resource_permissions(&alice, &doc, &[view()]).await?);
    assert!(!h.system.has_global_resource_permissions(&alice, "DOC", "acme", &[edit()]).await?);
    assert!(h.system.get_effective_resource_permissions(&alice, &doc).await?.is_empty());
    Ok(())
}
