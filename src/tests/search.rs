// Search end to end: auto-detection routing, pattern idioms against the FTS
// surface, filters, and the lookup/refs/explore read paths.

use serial_test::serial;

use crate::tools::{
    FastExploreTool, FastLookupTool, FastRefsTool, FastSearchTool, GetSymbolsTool, ToolOutput,
};

use super::helpers::{index_primary, workspace_with};

fn search(params: serde_json::Value) -> FastSearchTool {
    serde_json::from_value(params).unwrap()
}

#[tokio::test]
#[serial]
async fn auto_routes_pattern_queries_to_the_fts_surface() {
    let (_temp, state) = workspace_with(&[(
        "models.py",
        "class BaseClass:\n    pass\n\nclass Foo(BaseClass):\n    pass\n",
    )])
    .await;
    index_primary(&state).await;

    let output = search(serde_json::json!({
        "query": ": BaseClass",
        "method": "auto",
        "output_format": "json",
        "rerank": false,
    }))
    .call(&state)
    .await
    .unwrap();

    let ToolOutput::Json(result) = output else {
        panic!("expected JSON");
    };
    assert_eq!(result["method"], "pattern");
    let names: Vec<&str> = result["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"Foo"), "expected Foo in {names:?}");
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn text_search_matches_names_and_applies_filters() {
    let (_temp, state) = workspace_with(&[
        ("api/handlers.py", "def handle_request(req):\n    return req\n"),
        ("web/handlers.ts", "function handleRequest(req: Request) {\n  return req;\n}\n"),
    ])
    .await;
    index_primary(&state).await;

    let output = search(serde_json::json!({
        "query": "handle_request",
        "method": "text",
        "output_format": "json",
        "rerank": false,
    }))
    .call(&state)
    .await
    .unwrap();
    let ToolOutput::Json(result) = output else { panic!("expected JSON") };
    assert_eq!(result["results"].as_array().unwrap().len(), 1);

    // Language filter drops the python hit
    let output = search(serde_json::json!({
        "query": "handle_request",
        "method": "text",
        "language": "typescript",
        "output_format": "json",
        "rerank": false,
    }))
    .call(&state)
    .await
    .unwrap();
    let ToolOutput::Json(result) = output else { panic!("expected JSON") };
    assert!(result["results"].as_array().unwrap().is_empty());

    // file_pattern filter keeps only the api tree
    let output = search(serde_json::json!({
        "query": "handle",
        "method": "text",
        "file_pattern": "api/**",
        "output_format": "json",
        "rerank": false,
    }))
    .call(&state)
    .await
    .unwrap();
    let ToolOutput::Json(result) = output else { panic!("expected JSON") };
    for hit in result["results"].as_array().unwrap() {
        assert!(hit["file_path"].as_str().unwrap().starts_with("api/"));
    }
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn expand_decorates_hits_with_callers() {
    let (_temp, state) = workspace_with(&[(
        "graph.py",
        super::helpers::CALL_GRAPH_PY,
    )])
    .await;
    index_primary(&state).await;

    let output = search(serde_json::json!({
        "query": "function_b",
        "method": "text",
        "expand": true,
        "output_format": "json",
        "rerank": false,
    }))
    .call(&state)
    .await
    .unwrap();
    let ToolOutput::Json(result) = output else { panic!("expected JSON") };
    let hit = result["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "function_b")
        .expect("function_b in results");
    let mut callers: Vec<&str> = hit["callers"]
        .as_array()
        .expect("callers present")
        .iter()
        .map(|c| c.as_str().unwrap())
        .collect();
    callers.sort();
    assert_eq!(callers, ["function_a", "function_c"]);
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn lookup_is_exact_and_file_disambiguated() {
    let (_temp, state) = workspace_with(&[
        ("a.py", "def shared():\n    pass\n"),
        ("b.py", "def shared():\n    pass\n"),
    ])
    .await;
    index_primary(&state).await;

    let tool: FastLookupTool = serde_json::from_value(serde_json::json!({
        "name": "shared",
    }))
    .unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    assert_eq!(result["total"], 2);

    let tool: FastLookupTool = serde_json::from_value(serde_json::json!({
        "name": "shared",
        "file": "b.py",
    }))
    .unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    assert_eq!(result["total"], 1);
    assert_eq!(result["entries"][0]["file_path"], "b.py");

    // No fuzzy matching
    let tool: FastLookupTool = serde_json::from_value(serde_json::json!({
        "name": "shar",
    }))
    .unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    assert_eq!(result["total"], 0);
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn refs_groups_by_file_with_context() {
    let (_temp, state) = workspace_with(&[
        ("lib.py", "def fetch_user(uid):\n    return uid\n"),
        (
            "app.py",
            "from lib import fetch_user\n\ndef main():\n    fetch_user(1)\n    fetch_user(2)\n",
        ),
    ])
    .await;
    index_primary(&state).await;

    let tool: FastRefsTool = serde_json::from_value(serde_json::json!({
        "symbol": "fetch_user",
        "output_format": "json",
    }))
    .unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    let refs = result["references"]["app.py"].as_array().unwrap();
    assert!(refs.len() >= 2, "call sites in app.py: {refs:?}");
    for r in refs {
        assert!(r["context"].as_str().unwrap().contains("fetch_user"));
    }
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn get_symbols_outlines_a_file() {
    let (_temp, state) = workspace_with(&[(
        "svc.py",
        "class UserService:\n    def get(self, uid):\n        return uid\n\n    def put(self, uid):\n        return uid\n",
    )])
    .await;
    index_primary(&state).await;

    let tool: GetSymbolsTool = serde_json::from_value(serde_json::json!({
        "file_path": "svc.py",
        "output_format": "json",
    }))
    .unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    assert_eq!(result["total"], 3);
    let class = &result["symbols"][0];
    assert_eq!(class["name"], "UserService");
    assert_eq!(class["children"].as_array().unwrap().len(), 2);
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn explore_types_reports_implementations_and_hierarchy() {
    let (_temp, state) = workspace_with(&[(
        "repo.ts",
        "interface Repo {\n  fetch(id: string): User;\n}\n\nclass SqlRepo implements Repo {\n  fetch(id: string): User {\n    return query(id);\n  }\n}\n\nclass AuditedRepo extends SqlRepo {\n}\n",
    )])
    .await;
    index_primary(&state).await;

    let tool: FastExploreTool = serde_json::from_value(serde_json::json!({
        "mode": "types",
        "type_name": "Repo",
        "output_format": "json",
    }))
    .unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    assert_eq!(result["mode"], "types");
    let impls = result["implementations"].as_array().unwrap();
    assert_eq!(impls.len(), 1);
    assert_eq!(impls[0]["name"], "SqlRepo");

    let tool: FastExploreTool = serde_json::from_value(serde_json::json!({
        "mode": "types",
        "type_name": "SqlRepo",
        "output_format": "json",
    }))
    .unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    let children = result["hierarchy"]["children"].as_array().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0]["name"], "AuditedRepo");
    state.shutdown().await;
}

#[tokio::test]
#[serial]
async fn explore_dead_code_flags_unreferenced_symbols() {
    let (_temp, state) = workspace_with(&[(
        "lib.py",
        "def used():\n    pass\n\ndef unused_helper():\n    pass\n\ndef main():\n    used()\n",
    )])
    .await;
    index_primary(&state).await;

    let tool: FastExploreTool = serde_json::from_value(serde_json::json!({
        "mode": "dead_code",
        "output_format": "json",
    }))
    .unwrap();
    let ToolOutput::Json(result) = tool.call(&state).await.unwrap() else {
        panic!("expected JSON");
    };
    let names: Vec<&str> = result["candidates"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"unused_helper"));
    assert!(!names.contains(&"used"));
    state.shutdown().await;
}
