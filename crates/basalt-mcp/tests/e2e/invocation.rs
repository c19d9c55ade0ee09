//! Invocation tests for Basalt MCP.
//!
//! Result shapes, sandbox policy, timeouts and error reporting.

use super::common::*;
use serde_json::json;

pub async fn test_response_builder_shape(ctx: &TestContext) {
    println!("  🧪 test_response_builder_shape");

    ctx.deploy(
        "created",
        "module.exports = (req, res) => { res.status(201).setHeader('x-id', '7').json({ id: 7 }) }",
    )
    .await;

    let output = ctx.invoke("created", json!({})).await;
    assert_success(&output, "builder response");
    assert_eq!(output.body["statusCode"], 201);
    assert_eq!(output.body["data"], json!({"id": 7}));
    assert_eq!(output.body["headers"]["x-id"], "7");

    println!("     ✓ Builder status, header and body come back");
}

pub async fn test_headers_reach_function(ctx: &TestContext) {
    println!("  🧪 test_headers_reach_function");

    ctx.deploy(
        "whoami",
        "module.exports = (req) => ({ user: req.header('X-User'), method: req.method })",
    )
    .await;

    let output = ctx
        .call_tool(
            "edge_invoke_function",
            json!({"functionName": "whoami", "headers": {"X-User": "grace"}}),
        )
        .await;
    assert_success(&output, "invoke with headers");
    assert_eq!(output.body["data"], json!({"user": "grace", "method": "POST"}));

    println!("     ✓ Headers are visible case-insensitively");
}

pub async fn test_disallowed_module(ctx: &TestContext) {
    println!("  🧪 test_disallowed_module");

    ctx.deploy(
        "reader",
        "module.exports = () => require('fs').readFileSync('/etc/passwd', 'utf8')",
    )
    .await;

    let output = ctx.invoke("reader", json!({})).await;
    assert_failure(&output, "ModuleNotAllowed", "require('fs')");
    assert_eq!(output.body["statusCode"], 403);
    assert!(output.body["error"].as_str().unwrap().contains("fs"));

    println!("     ✓ Filesystem access is refused");
}

pub async fn test_timeout(ctx: &TestContext) {
    println!("  🧪 test_timeout");

    ctx.deploy("spin", "module.exports = () => { while (true) {} }")
        .await;

    let output = ctx.invoke("spin", json!({})).await;
    assert_failure(&output, "Timeout", "busy loop");
    assert_eq!(output.body["statusCode"], 504);
    let hint = output.body["troubleshooting"][0].as_str().unwrap();
    assert!(hint.contains(&TIMEOUT_MS.to_string()));

    println!("     ✓ Busy loop stopped at the time limit");
}

pub async fn test_runtime_fault_and_logs(ctx: &TestContext) {
    println!("  🧪 test_runtime_fault_and_logs");

    ctx.deploy(
        "broken",
        "module.exports = () => { throw new Error('boom') }",
    )
    .await;

    let output = ctx.invoke("broken", json!({})).await;
    assert_failure(&output, "RuntimeFault", "throwing function");
    assert!(output.body["error"].as_str().unwrap().contains("boom"));

    ctx.deploy(
        "chatty",
        "module.exports = (req) => { console.log('hello', req.name); return 'ok' }",
    )
    .await;

    let output = ctx.invoke("chatty", json!({"name": "ada"})).await;
    assert_success(&output, "logging function");
    assert_eq!(output.body["logs"][0], "[log] hello ada");

    println!("     ✓ Error message and console output are reported");
}

pub async fn test_not_callable_entry_point(ctx: &TestContext) {
    println!("  🧪 test_not_callable_entry_point");

    ctx.deploy("value", "const answer = 42\nanswer").await;

    let output = ctx.invoke("value", json!({})).await;
    assert_failure(&output, "EntryPointNotCallable", "non-function trailing name");

    let details = ctx
        .call_tool("edge_get_function", json!({"functionName": "value"}))
        .await;
    assert_eq!(details.body["function"]["status"], "error");

    println!("     ✓ Non-callable entry point reported and status marked");
}

pub async fn run_all_tests(ctx: &TestContext) {
    println!("\n⚡ Invocation Tests");
    test_response_builder_shape(ctx).await;
    test_headers_reach_function(ctx).await;
    test_disallowed_module(ctx).await;
    test_timeout(ctx).await;
    test_runtime_fault_and_logs(ctx).await;
    test_not_callable_entry_point(ctx).await;
}
