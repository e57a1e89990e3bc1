// Indexing end to end: idempotent re-scans, cascade on deletion, incremental
// changes through the watcher's change pipeline, and workspace management.

use serial_test::serial;

use crate::tools::{GetArchitectureMapTool, ManageWorkspaceTool, ToolOutput};
use crate::watcher::{FileChange, FileEvent};

use super::helpers::{CALL_GRAPH_PY, index_primary, workspace_with, write_files};

#[tokio::test]
#[serial]
async fn rescan_of_unmodified_workspace_writes_nothing() {
    let (_temp, state) = workspace_with(&[
        ("graph.py", CALL_GRAPH_PY),
        ("svc.py", "def helper():\n    pass\n"),
    ])
    .await;

    let first = index_primary(&state).await;
    assert_eq!(first.files_indexed, 2);
    assert!(first.symbols_indexed >= 4);

    let second = index_primary(&state).await;
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.files_unchanged, 2);
    assert_eq!(second.symbols_indexed, 0);
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn deleting_a_file_cascades_through_every_table() {
    let (temp, state) = workspace_with(&[
        ("graph.py", CALL_GRAPH_PY),
        ("keep.py", "def keeper():\n    pass\n"),
    ])
    .await;
    index_primary(&state).await;

    std::fs::remove_file(temp.path().join("graph.py")).unwrap();
    let stats = index_primary(&state).await;
    assert_eq!(stats.files_deleted, 1);

    let handle = state.primary().clone();
    let db = handle.db.lock().await;
    let stats = db.get_stats().unwrap();
    assert_eq!(stats.total_files, 1);
    // No orphans anywhere: every graph.py symbol, identifier, relationship
    // and reachability row went with the file
    assert!(db.get_symbols_by_name("function_a").unwrap().is_empty());
    assert_eq!(stats.total_symbols, 1);
    assert_eq!(stats.total_relationships, 0);
    assert_eq!(stats.total_reachability, 0);
    assert!(db.identifiers_by_name("function_b", false).unwrap().is_empty());
    drop(db);

    let store = handle.vectors.lock().await;
    assert_eq!(store.row_count().unwrap(), 1);
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn modified_file_preserves_inbound_relationships_for_stable_symbols() {
    let (temp, state) = workspace_with(&[
        ("target.py", "def stable_target():\n    pass\n"),
        ("caller.py", "from target import stable_target\n\ndef caller():\n    stable_target()\n"),
    ])
    .await;
    index_primary(&state).await;

    let target_id = {
        let handle = state.primary().clone();
        let db = handle.db.lock().await;
        db.get_symbols_by_name("stable_target").unwrap()[0].id.clone()
    };

    // Appending below the definition keeps its byte offset, hence its ID
    write_files(
        temp.path(),
        &[(
            "target.py",
            "def stable_target():\n    pass\n\ndef extra():\n    pass\n",
        )],
    );
    index_primary(&state).await;

    let handle = state.primary().clone();
    let db = handle.db.lock().await;
    let same_id = db.get_symbols_by_name("stable_target").unwrap()[0].id.clone();
    assert_eq!(target_id, same_id);

    let incoming = db
        .incoming(&target_id, &[crate::extractors::RelationshipKind::Call])
        .unwrap();
    assert_eq!(incoming.len(), 1, "caller edge survives the re-index");
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn incremental_changes_flow_through_apply_changes() {
    let (temp, state) = workspace_with(&[("a.py", "def alpha():\n    pass\n")]).await;
    index_primary(&state).await;

    // Create, modify and delete, as the debouncer would deliver them
    write_files(temp.path(), &[("b.py", "def beta():\n    pass\n")]);
    let scanner = state.scanner_for(state.primary());
    let stats = scanner
        .apply_changes(&[FileChange::new(FileEvent::Created, temp.path().join("b.py"))])
        .await
        .unwrap();
    assert_eq!(stats.files_indexed, 1);
    assert!(stats.closure_stale);

    std::fs::remove_file(temp.path().join("a.py")).unwrap();
    let stats = scanner
        .apply_changes(&[FileChange::new(FileEvent::Deleted, temp.path().join("a.py"))])
        .await
        .unwrap();
    assert_eq!(stats.files_deleted, 1);

    let handle = state.primary().clone();
    let db = handle.db.lock().await;
    assert!(db.get_symbols_by_name("alpha").unwrap().is_empty());
    assert_eq!(db.get_symbols_by_name("beta").unwrap().len(), 1);
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn manage_workspace_index_then_stats_and_health() {
    let (_temp, state) = workspace_with(&[("graph.py", CALL_GRAPH_PY)]).await;

    let tool: ManageWorkspaceTool =
        serde_json::from_value(serde_json::json!({"operation": "index"})).unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    assert_eq!(result["files_indexed"], 1);
    assert_eq!(result["symbols_indexed"], 3);

    let tool: ManageWorkspaceTool =
        serde_json::from_value(serde_json::json!({"operation": "stats"})).unwrap();
    let ToolOutput::Text(stats) = tool.call(&state).await.unwrap() else {
        panic!("expected text");
    };
    assert!(stats.contains("symbols: 3"));
    assert!(stats.contains("python"));

    let tool: ManageWorkspaceTool =
        serde_json::from_value(serde_json::json!({"operation": "health"})).unwrap();
    let ToolOutput::Text(health) = tool.call(&state).await.unwrap() else {
        panic!("expected text");
    };
    assert!(health.contains("storage: ok"));
    assert!(health.contains("watcher: stopped"));

    let tool: ManageWorkspaceTool =
        serde_json::from_value(serde_json::json!({"operation": "list"})).unwrap();
    let ToolOutput::Text(list) = tool.call(&state).await.unwrap() else {
        panic!("expected text");
    };
    assert!(list.contains("[primary]"));
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn manage_workspace_refresh_picks_up_edits() {
    let (temp, state) = workspace_with(&[("a.py", "def alpha():\n    pass\n")]).await;
    index_primary(&state).await;

    write_files(temp.path(), &[("a.py", "def alpha():\n    pass\n\ndef beta():\n    pass\n")]);
    let tool: ManageWorkspaceTool =
        serde_json::from_value(serde_json::json!({"operation": "refresh"})).unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    assert_eq!(result["files_indexed"], 1);
    assert_eq!(result["symbols_indexed"], 2);
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn architecture_map_aggregates_cross_directory_edges() {
    let (_temp, state) = workspace_with(&[
        (
            "api/handlers.py",
            "from db.queries import fetch_one, fetch_many\n\ndef get(uid):\n    fetch_one(uid)\n    fetch_many(uid)\n    fetch_one(uid)\n",
        ),
        (
            "db/queries.py",
            "def fetch_one(uid):\n    return uid\n\ndef fetch_many(uid):\n    return [uid]\n",
        ),
    ])
    .await;
    index_primary(&state).await;

    let tool: GetArchitectureMapTool = serde_json::from_value(serde_json::json!({
        "depth": 1,
        "min_edge_count": 2,
        "output_format": "json",
    }))
    .unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    let edges = result["edges"].as_array().unwrap();
    let api_to_db = edges
        .iter()
        .find(|e| e["from"] == "api" && e["to"] == "db")
        .expect("api -> db edge");
    assert!(api_to_db["weight"].as_u64().unwrap() >= 2);

    // Below the weight floor nothing shows
    let tool: GetArchitectureMapTool = serde_json::from_value(serde_json::json!({
        "depth": 1,
        "min_edge_count": 50,
        "output_format": "json",
    }))
    .unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    assert!(result["edges"].as_array().unwrap().is_empty());
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn reachability_closure_answers_impact_queries() {
    let (_temp, state) = workspace_with(&[("graph.py", CALL_GRAPH_PY)]).await;
    index_primary(&state).await;

    let handle = state.primary().clone();
    let db = handle.db.lock().await;
    let a = &db.get_symbols_by_name("function_a").unwrap()[0];
    let b = &db.get_symbols_by_name("function_b").unwrap()[0];
    let c = &db.get_symbols_by_name("function_c").unwrap()[0];

    // a -> b direct, a -> c direct, c -> b; the closure has the minimum
    assert_eq!(db.reachability_distance(&a.id, &b.id).unwrap(), Some(1));
    assert_eq!(db.reachability_distance(&a.id, &c.id).unwrap(), Some(1));
    assert_eq!(db.reachability_distance(&c.id, &b.id).unwrap(), Some(1));
    assert_eq!(db.reachability_distance(&b.id, &a.id).unwrap(), None);
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn watcher_start_is_idempotent_failing_stop_is_safe() {
    let (_temp, state) = workspace_with(&[("a.py", "def alpha():\n    pass\n")]).await;
    index_primary(&state).await;

    state.start_watcher().await.unwrap();
    assert!(state.watcher_running().await);
    assert!(state.start_watcher().await.is_err(), "second start must fail");

    state.stop_watcher().await;
    assert!(!state.watcher_running().await);
    // Stopping again is a no-op
    state.stop_watcher().await;
    state.shutdown().await;
}
