//! Deployment lifecycle tests for Basalt MCP.
//!
//! Deploy, list, inspect, redeploy and remove through the edge tools.

use super::common::*;
use serde_json::json;

pub async fn test_deploy_reports_entry_point(ctx: &TestContext) {
    println!("  🧪 test_deploy_reports_entry_point");

    let output = ctx
        .deploy("greet", "function greet(req) { return `hi ${req.name}` }\ngreet")
        .await;

    assert_success(&output, "deploy should succeed");
    assert_eq!(output.body["functionUrl"], "/functions/v1/greet");
    assert_eq!(output.body["entryPoint"]["kind"], "bareName");
    assert_eq!(output.body["entryPoint"]["identifier"], "greet");

    println!("     ✓ Deployment reports URL and bare-name entry point");
}

pub async fn test_deploy_rejects_invalid_source(ctx: &TestContext) {
    println!("  🧪 test_deploy_rejects_invalid_source");

    let output = ctx.deploy("blank", "   \n  ").await;
    assert_failure(&output, "ValidationError", "whitespace-only source");

    let listed = ctx.call_tool("edge_list_functions", json!({})).await;
    let names: Vec<&str> = listed.body["functions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert!(!names.contains(&"blank"));

    println!("     ✓ Invalid source rejected without registering");
}

pub async fn test_get_function_details(ctx: &TestContext) {
    println!("  🧪 test_get_function_details");

    let output = ctx
        .call_tool("edge_get_function", json!({"functionName": "greet"}))
        .await;

    assert_success(&output, "get should succeed");
    let function = &output.body["function"];
    assert_eq!(function["status"], "deployed");
    assert!(function["originalSource"].as_str().unwrap().ends_with("greet"));
    assert!(function["wrappedSource"].as_str().unwrap().contains("greet"));
    assert_eq!(function["codeHash"].as_str().unwrap().len(), 64);

    println!("     ✓ Details expose source, wrapped source and hash");
}

pub async fn test_redeploy_replaces(ctx: &TestContext) {
    println!("  🧪 test_redeploy_replaces");

    let output = ctx
        .deploy("greet", "module.exports = (req) => ({ greeting: 'hello ' + req.name })")
        .await;
    assert_success(&output, "redeploy should succeed");

    let invoked = ctx.invoke("greet", json!({"name": "ada"})).await;
    assert_success(&invoked, "invoke after redeploy");
    assert_eq!(invoked.body["data"], json!({"greeting": "hello ada"}));

    let listed = ctx.call_tool("edge_list_functions", json!({})).await;
    let count = listed.body["functions"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|f| f["name"] == "greet")
        .count();
    assert_eq!(count, 1);

    println!("     ✓ Second deploy replaced the first");
}

pub async fn test_remove_cleans_up(ctx: &TestContext) {
    println!("  🧪 test_remove_cleans_up");

    let removed = ctx
        .call_tool("edge_remove_function", json!({"functionName": "greet"}))
        .await;
    assert_success(&removed, "remove should succeed");

    let invoked = ctx.invoke("greet", json!({})).await;
    assert_failure(&invoked, "NotFound", "invoke after remove");

    assert!(!ctx.scratch.path().join("greet").exists());

    let again = ctx
        .call_tool("edge_remove_function", json!({"functionName": "greet"}))
        .await;
    assert_failure(&again, "NotFound", "second remove");

    println!("     ✓ Remove drops the function and its scratch files");
}

pub async fn run_all_tests(ctx: &TestContext) {
    println!("\n📦 Lifecycle Tests");
    test_deploy_reports_entry_point(ctx).await;
    test_deploy_rejects_invalid_source(ctx).await;
    test_get_function_details(ctx).await;
    test_redeploy_replaces(ctx).await;
    test_remove_cleans_up(ctx).await;
}
