//! User/role administration and credential handling against the mock driver.

mod common;

use common::{client_with, fixture, standard_node};

use argus_core::client::{Privilege, Role, UserRoles};

fn privilege(code: &str) -> Privilege {
    Privilege {
        code: code.to_owned(),
        namespace: String::new(),
        set_name: String::new(),
    }
}

#[tokio::test]
async fn refresh_populates_users_roles_and_current_privileges() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let client = client_with(&[n1]);
    client.set_users(vec![
        UserRoles {
            user: "admin".into(),
            roles: vec!["sys-admin".into()],
        },
        UserRoles {
            user: "reader".into(),
            roles: vec!["read".into()],
        },
    ]);
    client.set_roles(vec![
        Role {
            name: "sys-admin".into(),
            privileges: vec![privilege("sys-admin"), privilege("user-admin")],
        },
        Role {
            name: "read".into(),
            privileges: vec![privilege("read")],
        },
    ]);

    let cluster = fx
        .register_as(client, false, Some("admin"), Some("secret"))
        .await;
    assert!(cluster.security_enabled());

    cluster.update().await.unwrap();

    assert_eq!(cluster.users().len(), 2);
    assert_eq!(cluster.role_names(), vec!["read".to_owned(), "sys-admin".to_owned()]);
    let privileges = cluster.current_user_privileges();
    assert!(privileges.contains(&"sys-admin".to_owned()));
    assert!(privileges.contains(&"user-admin".to_owned()));
}

#[tokio::test]
async fn update_password_validates_before_touching_the_database() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let client = client_with(&[n1]);
    let cluster = fx
        .register_as(client.clone(), false, Some("admin"), Some("secret"))
        .await;

    let err = cluster
        .update_password("admin", "secret", "secret")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot be same"));

    let err = cluster
        .update_password("admin", "wrong", "newpass")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Invalid current password"));

    let err = cluster
        .update_password("intruder", "secret", "newpass")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Invalid current user"));

    // Nothing reached the driver so far.
    assert!(client.calls.lock().is_empty());

    cluster
        .update_password("admin", "secret", "newpass")
        .await
        .unwrap();
    assert_eq!(client.calls.lock().as_slice(), ["change_password:admin"]);

    // The stored password rotated: the old one no longer validates.
    assert!(cluster
        .update_password("admin", "secret", "another")
        .await
        .is_err());
    assert!(cluster
        .update_password("admin", "newpass", "another")
        .await
        .is_ok());
}

#[tokio::test]
async fn user_and_role_crud_round_trips_through_the_driver() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let client = client_with(&[n1]);
    let cluster = fx.register(client.clone(), false).await;

    cluster
        .create_user("analyst", "pw", &["read".to_owned()])
        .await
        .unwrap();
    cluster
        .grant_roles("analyst", &["read-write".to_owned()])
        .await
        .unwrap();
    cluster
        .create_role("auditor", &[privilege("read")])
        .await
        .unwrap();
    cluster
        .add_privileges("auditor", &[privilege("sindex-admin")])
        .await
        .unwrap();
    cluster.drop_user("analyst").await.unwrap();
    cluster.drop_role("auditor").await.unwrap();

    let calls = client.calls.lock().clone();
    assert_eq!(
        calls,
        vec![
            "create_user:analyst",
            "grant_roles:analyst",
            "create_role:auditor",
            "grant_privileges:auditor",
            "drop_user:analyst",
            "drop_role:auditor",
        ]
    );
}

#[tokio::test]
async fn admin_ops_fail_once_the_cluster_is_closed() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let cluster = fx.register(client_with(&[n1]), false).await;

    fx.observer.shutdown();

    let err = cluster.drop_user("anyone").await.unwrap_err();
    assert!(err.to_string().contains("closed"));
    // A closed cluster also skips refreshes without erroring.
    cluster.update().await.unwrap();
}
