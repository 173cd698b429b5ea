//! Registry discovery integration tests: precedence, rejection, replacement.

use evidence_bridge::registry::DiscoveryPaths;
use evidence_bridge::types::{Config, Error};
use evidence_bridge::{HealthStatus, Registry};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

fn write(dir: &Path, file: &str, doc: Value) {
    fs::write(dir.join(file), serde_json::to_string_pretty(&doc).unwrap()).unwrap();
}

fn doc(name: &str, description: &str) -> Value {
    json!({
        "schemaVersion": "1",
        "name": name,
        "description": description,
        "command": "cat",
        "transport": "stdio",
        "capabilities": ["read:*"],
        "timeout": "30s",
        "rbac": { "allowedCapabilities": { "viewer": ["read:*"] } }
    })
}

#[tokio::test]
async fn test_discover_with_precedence_and_errors() {
    let project = tempfile::tempdir().unwrap();
    let user = tempfile::tempdir().unwrap();

    write(project.path(), "jira.json", doc("jira", "project"));
    write(user.path(), "jira.json", doc("jira", "user"));
    write(user.path(), "slack.json", doc("slack", "user"));
    write(
        user.path(),
        "bad.json",
        json!({
            "schemaVersion": "1",
            "name": "bad",
            "transport": "http",
            "capabilities": [],
            "timeout": "30s"
        }),
    );

    let registry = Registry::new(&Config::default());
    let report = registry
        .discover(&DiscoveryPaths::new(vec![
            project.path().to_path_buf(),
            user.path().to_path_buf(),
        ]))
        .await;

    assert_eq!(report.loaded, vec!["jira", "slack"]);
    assert_eq!(report.overridden.len(), 1);
    assert_eq!(report.errors.len(), 1);
    match &report.errors[0].error {
        Error::Schema(e) => assert_eq!(e.field, "url"),
        other => panic!("unexpected error: {}", other),
    }

    let tools = registry.list().await;
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].name, "jira");
    assert_eq!(tools[0].description.as_deref(), Some("project"));
    assert_eq!(tools[0].health, HealthStatus::Ready);
    assert_eq!(
        tools[0].source.as_deref(),
        Some(project.path().join("jira.json").as_path())
    );
}

#[tokio::test]
async fn test_rediscovery_replaces_entries() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "jira.json", doc("jira", "v1"));

    let registry = Registry::new(&Config::default());
    let paths = DiscoveryPaths::new(vec![dir.path().to_path_buf()]);
    registry.discover(&paths).await;
    registry.disable("jira").await.unwrap();

    write(dir.path(), "jira.json", doc("jira", "v2"));
    registry.discover(&paths).await;

    let jira = registry.get("jira").await.unwrap();
    assert_eq!(jira.config().description.as_deref(), Some("v2"));
    assert!(jira.is_enabled());
}

#[tokio::test]
async fn test_env_values_expanded_at_load() {
    std::env::set_var("EVIDENCE_BRIDGE_TEST_TOKEN", "s3cr3t");
    let dir = tempfile::tempdir().unwrap();
    let mut with_env = doc("github", "env");
    with_env["env"] = json!({
        "GITHUB_TOKEN": "${EVIDENCE_BRIDGE_TEST_TOKEN}",
        "ORG": "acme-${EVIDENCE_BRIDGE_TEST_UNSET_VAR}"
    });
    write(dir.path(), "github.json", with_env);

    let registry = Registry::new(&Config::default());
    registry
        .discover(&DiscoveryPaths::new(vec![dir.path().to_path_buf()]))
        .await;

    let github = registry.get("GitHub").await.unwrap();
    assert_eq!(github.config().env["GITHUB_TOKEN"], "s3cr3t");
    assert_eq!(github.config().env["ORG"], "acme-");
}
