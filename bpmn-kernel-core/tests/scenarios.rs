//! End-to-end routing scenarios driven through the engine service.

use bpmn_kernel_core::guard::{FlagOp, Guard};
use bpmn_kernel_core::{
    BpmnKernelEngine, EngineConfig, MemoryStore, NodeKind, ProcessDefinitionBuilder, RuntimeEvent,
    TokenId, TokenKind, Value, Variables,
};
use std::sync::Arc;
use uuid::Uuid;

fn vars(pairs: &[(&str, Value)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn engine() -> BpmnKernelEngine {
    BpmnKernelEngine::new(EngineConfig::default(), Arc::new(MemoryStore::new()))
}

async fn events(engine: &BpmnKernelEngine, id: Uuid) -> Vec<RuntimeEvent> {
    engine
        .events(id, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|(_, e)| e)
        .collect()
}

// ── Exclusive gateway ──

fn sign_router() -> bpmn_kernel_core::ProcessDefinition {
    ProcessDefinitionBuilder::new("sign")
        .node("start", NodeKind::StartEvent)
        .node("gw", NodeKind::ExclusiveGateway)
        .node("negative", NodeKind::UserTask)
        .node("zero", NodeKind::UserTask)
        .node("positive", NodeKind::UserTask)
        .node("end", NodeKind::EndEvent)
        .flow("f0", "start", "gw")
        .guarded_flow("lt", "gw", "negative", Guard::flag("x", FlagOp::Lt, 0))
        .guarded_flow("eq", "gw", "zero", Guard::flag("x", FlagOp::Eq, 0))
        .guarded_flow("gt", "gw", "positive", Guard::flag("x", FlagOp::Gt, 0))
        .flow("f1", "negative", "end")
        .flow("f2", "zero", "end")
        .flow("f3", "positive", "end")
        .build()
        .unwrap()
}

#[tokio::test]
async fn exclusive_gateway_routes_on_variable() {
    let engine = engine();
    engine.deploy_definition(sign_router()).unwrap();

    let id = engine
        .start_process("sign", vars(&[("x", Value::I64(5))]))
        .await
        .unwrap();
    let inst = engine.instance(id).await.unwrap();

    assert_eq!(inst.open_task("positive"), Some(TokenId::ROOT));
    assert_eq!(inst.open_task("negative"), None);
    assert_eq!(inst.open_task("zero"), None);
    assert_eq!(inst.tokens.len(), 1);

    engine
        .complete_task(id, "positive", Variables::new())
        .await
        .unwrap();
    assert!(engine.instance(id).await.unwrap().is_ended());
}

#[tokio::test]
async fn exclusive_gateway_takes_first_satisfied_in_declaration_order() {
    let def = ProcessDefinitionBuilder::new("first")
        .node("start", NodeKind::StartEvent)
        .node("gw", NodeKind::ExclusiveGateway)
        .node("a", NodeKind::UserTask)
        .node("b", NodeKind::UserTask)
        .flow("f0", "start", "gw")
        .guarded_flow("fa", "gw", "a", Guard::flag("x", FlagOp::Gt, 1))
        .guarded_flow("fb", "gw", "b", Guard::flag("x", FlagOp::Gt, 0))
        .build()
        .unwrap();
    let engine = engine();
    engine.deploy_definition(def).unwrap();

    let id = engine
        .start_process("first", vars(&[("x", Value::I64(5))]))
        .await
        .unwrap();
    let inst = engine.instance(id).await.unwrap();
    assert!(inst.open_task("a").is_some());
    assert!(inst.open_task("b").is_none());
}

#[tokio::test]
async fn default_flow_only_when_nothing_else_matches() {
    let def = ProcessDefinitionBuilder::new("fallback")
        .node("start", NodeKind::StartEvent)
        .node("gw", NodeKind::ExclusiveGateway)
        .node("special", NodeKind::UserTask)
        .node("normal", NodeKind::UserTask)
        .flow("f0", "start", "gw")
        .flow("dflt", "gw", "normal")
        .guarded_flow("vip", "gw", "special", Guard::flag("tier", FlagOp::Eq, "gold"))
        .default_flow("gw", "dflt")
        .build()
        .unwrap();
    let engine = engine();
    engine.deploy_definition(def).unwrap();

    let gold = engine
        .start_process("fallback", vars(&[("tier", Value::from("gold"))]))
        .await
        .unwrap();
    assert!(engine.instance(gold).await.unwrap().open_task("special").is_some());

    let plain = engine.start_process("fallback", Variables::new()).await.unwrap();
    assert!(engine.instance(plain).await.unwrap().open_task("normal").is_some());
}

#[tokio::test]
async fn custom_predicate_guard() {
    let def = ProcessDefinitionBuilder::new("pred")
        .node("start", NodeKind::StartEvent)
        .node("gw", NodeKind::ExclusiveGateway)
        .node("big", NodeKind::UserTask)
        .node("small", NodeKind::UserTask)
        .flow("f0", "start", "gw")
        .guarded_flow(
            "fbig",
            "gw",
            "big",
            Guard::predicate(|vars, _token| {
                matches!((vars.get("w"), vars.get("h")), (Some(Value::I64(w)), Some(Value::I64(h))) if w * h > 100)
            }),
        )
        .flow("fsmall", "gw", "small")
        .default_flow("gw", "fsmall")
        .build()
        .unwrap();
    let engine = engine();
    engine.deploy_definition(def).unwrap();

    let id = engine
        .start_process("pred", vars(&[("w", Value::I64(20)), ("h", Value::I64(10))]))
        .await
        .unwrap();
    assert!(engine.instance(id).await.unwrap().open_task("big").is_some());
}

// ── Parallel fork / join ──

fn three_way() -> bpmn_kernel_core::ProcessDefinition {
    ProcessDefinitionBuilder::new("three_way")
        .node("start", NodeKind::StartEvent)
        .node("fork", NodeKind::ParallelGateway)
        .node("t1", NodeKind::UserTask)
        .node("t2", NodeKind::UserTask)
        .node("t3", NodeKind::UserTask)
        .node("join", NodeKind::ParallelGateway)
        .node("review", NodeKind::UserTask)
        .node("end", NodeKind::EndEvent)
        .flow("f0", "start", "fork")
        .flow("b1", "fork", "t1")
        .flow("b2", "fork", "t2")
        .flow("b3", "fork", "t3")
        .flow("j1", "t1", "join")
        .flow("j2", "t2", "join")
        .flow("j3", "t3", "join")
        .flow("out", "join", "review")
        .flow("fin", "review", "end")
        .build()
        .unwrap()
}

#[tokio::test]
async fn parallel_branches_join_after_reverse_completion() {
    let engine = engine();
    engine.deploy_definition(three_way()).unwrap();
    let id = engine.start_process("three_way", Variables::new()).await.unwrap();

    let inst = engine.instance(id).await.unwrap();
    assert_eq!(inst.root().children.len(), 3);
    assert_eq!(inst.work_items.len(), 3);

    for task in ["t3", "t2"] {
        engine.complete_task(id, task, Variables::new()).await.unwrap();
        let inst = engine.instance(id).await.unwrap();
        assert!(inst.open_task("review").is_none(), "join released early after {task}");
    }
    engine.complete_task(id, "t1", Variables::new()).await.unwrap();

    let inst = engine.instance(id).await.unwrap();
    assert_eq!(inst.open_task("review"), Some(TokenId::ROOT));
    assert!(inst.tokens.children(TokenId::ROOT).all(|c| c.ended));
    assert!(!inst.root().ended);

    let log = events(&engine, id).await;
    let released = log
        .iter()
        .filter(|e| matches!(e, RuntimeEvent::JoinReleased { .. }))
        .count();
    assert_eq!(released, 1);

    engine.complete_task(id, "review", Variables::new()).await.unwrap();
    assert!(engine.instance(id).await.unwrap().is_ended());
}

#[tokio::test]
async fn and_join_fires_once_for_every_completion_order() {
    let orders = [
        ["t1", "t2", "t3"],
        ["t1", "t3", "t2"],
        ["t2", "t1", "t3"],
        ["t2", "t3", "t1"],
        ["t3", "t1", "t2"],
        ["t3", "t2", "t1"],
    ];
    for order in orders {
        let engine = engine();
        engine.deploy_definition(three_way()).unwrap();
        let id = engine.start_process("three_way", Variables::new()).await.unwrap();

        for task in order {
            engine.complete_task(id, task, Variables::new()).await.unwrap();
        }
        engine.complete_task(id, "review", Variables::new()).await.unwrap();

        let inst = engine.instance(id).await.unwrap();
        assert!(inst.is_ended(), "{order:?}");
        assert!(inst.tokens.iter().all(|t| t.ended), "{order:?}");

        let log = events(&engine, id).await;
        let past_join = log
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::FlowTaken { flow_id, .. } if flow_id == "out"))
            .count();
        let root_ends = log
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::TokenEnded { token, .. } if *token == TokenId::ROOT))
            .count();
        let instance_ends = log
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::InstanceEnded { .. }))
            .count();
        assert_eq!(past_join, 1, "{order:?}");
        assert_eq!(root_ends, 1, "{order:?}");
        assert_eq!(instance_ends, 1, "{order:?}");
    }
}

#[tokio::test]
async fn branches_ending_without_join_complete_the_parent() {
    let def = ProcessDefinitionBuilder::new("split_ends")
        .node("start", NodeKind::StartEvent)
        .node("fork", NodeKind::ParallelGateway)
        .node("a", NodeKind::UserTask)
        .node("b", NodeKind::UserTask)
        .node("end_a", NodeKind::EndEvent)
        .node("end_b", NodeKind::EndEvent)
        .flow("f0", "start", "fork")
        .flow("fa", "fork", "a")
        .flow("fb", "fork", "b")
        .flow("ea", "a", "end_a")
        .flow("eb", "b", "end_b")
        .build()
        .unwrap();
    let engine = engine();
    engine.deploy_definition(def).unwrap();
    let id = engine.start_process("split_ends", Variables::new()).await.unwrap();

    engine.complete_task(id, "b", Variables::new()).await.unwrap();
    assert!(!engine.instance(id).await.unwrap().is_ended());

    engine.complete_task(id, "a", Variables::new()).await.unwrap();
    let inst = engine.instance(id).await.unwrap();
    assert!(inst.is_ended());
    assert!(inst.ended_at.is_some());
}

#[tokio::test]
async fn inclusive_gateway_forks_on_satisfied_flows() {
    let def = ProcessDefinitionBuilder::new("or")
        .node("start", NodeKind::StartEvent)
        .node("split", NodeKind::InclusiveGateway)
        .node("a", NodeKind::UserTask)
        .node("b", NodeKind::UserTask)
        .node("c", NodeKind::UserTask)
        .node("merge", NodeKind::InclusiveGateway)
        .node("end", NodeKind::EndEvent)
        .flow("f0", "start", "split")
        .guarded_flow("fa", "split", "a", Guard::flag("x", FlagOp::Gt, 0))
        .guarded_flow("fb", "split", "b", Guard::flag("y", FlagOp::Gt, 0))
        .flow("fc", "split", "c")
        .default_flow("split", "fc")
        .flow("ma", "a", "merge")
        .flow("mb", "b", "merge")
        .flow("mc", "c", "merge")
        .flow("out", "merge", "end")
        .build()
        .unwrap();
    let engine = engine();
    engine.deploy_definition(def).unwrap();

    let both = engine
        .start_process("or", vars(&[("x", Value::I64(1)), ("y", Value::I64(1))]))
        .await
        .unwrap();
    let inst = engine.instance(both).await.unwrap();
    assert_eq!(inst.root().children.len(), 2);
    assert!(inst.open_task("c").is_none());
    engine.complete_task(both, "a", Variables::new()).await.unwrap();
    assert!(!engine.instance(both).await.unwrap().is_ended());
    engine.complete_task(both, "b", Variables::new()).await.unwrap();
    assert!(engine.instance(both).await.unwrap().is_ended());

    let neither = engine.start_process("or", Variables::new()).await.unwrap();
    let inst = engine.instance(neither).await.unwrap();
    assert_eq!(inst.tokens.len(), 1);
    assert_eq!(inst.open_task("c"), Some(TokenId::ROOT));
    engine.complete_task(neither, "c", Variables::new()).await.unwrap();
    assert!(engine.instance(neither).await.unwrap().is_ended());
}

// ── Sub-processes and termination ──

#[tokio::test]
async fn sub_process_runs_in_child_token_and_resumes_parent() {
    let def = ProcessDefinitionBuilder::new("with_sub")
        .node("start", NodeKind::StartEvent)
        .node("kyc", NodeKind::SubProcess)
        .inner_node("kyc", "kyc_start", NodeKind::StartEvent)
        .inner_node("kyc", "verify", NodeKind::UserTask)
        .inner_node("kyc", "kyc_end", NodeKind::EndEvent)
        .node("approve", NodeKind::UserTask)
        .node("end", NodeKind::EndEvent)
        .flow("f0", "start", "kyc")
        .flow("k0", "kyc_start", "verify")
        .flow("k1", "verify", "kyc_end")
        .flow("f1", "kyc", "approve")
        .flow("f2", "approve", "end")
        .build()
        .unwrap();
    let engine = engine();
    engine.deploy_definition(def).unwrap();
    let id = engine.start_process("with_sub", Variables::new()).await.unwrap();

    let inst = engine.instance(id).await.unwrap();
    let child = inst.open_task("verify").unwrap();
    let token = inst.token(child).unwrap();
    assert_eq!(token.kind, TokenKind::SubProcessRoot);
    assert!(token.is_sub_process_root());
    assert_eq!(token.parent, Some(TokenId::ROOT));
    assert_eq!(token.name.as_deref(), Some("kyc#0"));

    engine.complete_task(id, "verify", Variables::new()).await.unwrap();
    let inst = engine.instance(id).await.unwrap();
    assert!(inst.token(child).unwrap().ended);
    assert_eq!(inst.open_task("approve"), Some(TokenId::ROOT));

    let log = events(&engine, id).await;
    assert!(log.iter().any(|e| matches!(
        e,
        RuntimeEvent::TokenSignalled { token, node_id } if *token == TokenId::ROOT && node_id == "kyc"
    )));
}

#[tokio::test]
async fn terminate_end_inside_sub_process_ends_only_that_scope() {
    let def = ProcessDefinitionBuilder::new("sub_terminate")
        .node("start", NodeKind::StartEvent)
        .node("checks", NodeKind::SubProcess)
        .inner_node("checks", "c_start", NodeKind::StartEvent)
        .inner_node("checks", "c_fork", NodeKind::ParallelGateway)
        .inner_node("checks", "manual", NodeKind::UserTask)
        .inner_node("checks", "c_end", NodeKind::EndEvent)
        .inner_node("checks", "abort", NodeKind::TerminateEndEvent)
        .node("after", NodeKind::UserTask)
        .node("end", NodeKind::EndEvent)
        .flow("f0", "start", "checks")
        .flow("c0", "c_start", "c_fork")
        .flow("c1", "c_fork", "manual")
        .flow("c2", "c_fork", "abort")
        .flow("c3", "manual", "c_end")
        .flow("f1", "checks", "after")
        .flow("f2", "after", "end")
        .build()
        .unwrap();
    let engine = engine();
    engine.deploy_definition(def).unwrap();
    let id = engine.start_process("sub_terminate", Variables::new()).await.unwrap();

    let inst = engine.instance(id).await.unwrap();
    assert!(!inst.is_ended());
    assert!(inst.open_task("manual").is_none());
    assert_eq!(inst.open_task("after"), Some(TokenId::ROOT));
    assert!(inst.tokens.iter().filter(|t| !t.is_root()).all(|t| t.ended));
}

#[tokio::test]
async fn terminate_end_at_top_level_ends_instance() {
    let def = ProcessDefinitionBuilder::new("terminate")
        .node("start", NodeKind::StartEvent)
        .node("fork", NodeKind::ParallelGateway)
        .node("slow", NodeKind::UserTask)
        .node("wait", NodeKind::UserTask)
        .node("stop", NodeKind::TerminateEndEvent)
        .node("end", NodeKind::EndEvent)
        .flow("f0", "start", "fork")
        .flow("fs", "fork", "slow")
        .flow("fw", "fork", "wait")
        .flow("s1", "slow", "end")
        .flow("w1", "wait", "stop")
        .build()
        .unwrap();
    let engine = engine();
    engine.deploy_definition(def).unwrap();
    let id = engine.start_process("terminate", Variables::new()).await.unwrap();

    engine.complete_task(id, "wait", Variables::new()).await.unwrap();
    let inst = engine.instance(id).await.unwrap();
    assert!(inst.is_ended());
    assert!(inst.work_items.is_empty());
    assert!(inst.tokens.iter().all(|t| t.ended));
}

#[tokio::test]
async fn merge_inside_sub_process_stays_in_the_sub_process() {
    let def = ProcessDefinitionBuilder::new("sub_merge")
        .node("start", NodeKind::StartEvent)
        .node("sub", NodeKind::SubProcess)
        .inner_node("sub", "s0", NodeKind::StartEvent)
        .inner_node("sub", "split", NodeKind::InclusiveGateway)
        .inner_node("sub", "t1", NodeKind::UserTask)
        .inner_node("sub", "t2", NodeKind::UserTask)
        .inner_node("sub", "merge", NodeKind::InclusiveGateway)
        .inner_node("sub", "inner_task", NodeKind::UserTask)
        .inner_node("sub", "e0", NodeKind::EndEvent)
        .node("after", NodeKind::UserTask)
        .node("end", NodeKind::EndEvent)
        .flow("f0", "start", "sub")
        .flow("i0", "s0", "split")
        .guarded_flow("pos", "split", "t1", Guard::flag("x", FlagOp::Gt, 0))
        .guarded_flow("neg", "split", "t2", Guard::flag("x", FlagOp::Lt, 0))
        .flow("m1", "t1", "merge")
        .flow("m2", "t2", "merge")
        .flow("i1", "merge", "inner_task")
        .flow("i2", "inner_task", "e0")
        .flow("f1", "sub", "after")
        .flow("f2", "after", "end")
        .build()
        .unwrap();
    let engine = engine();
    engine.deploy_definition(def).unwrap();
    let id = engine
        .start_process("sub_merge", vars(&[("x", Value::I64(5))]))
        .await
        .unwrap();

    engine.complete_task(id, "t1", Variables::new()).await.unwrap();
    let inst = engine.instance(id).await.unwrap();
    let inner = inst.open_task("inner_task").unwrap();
    assert_eq!(inst.token(inner).unwrap().kind, TokenKind::SubProcessRoot);
    assert!(!inst.token(inner).unwrap().ended);
    let deployed = engine.definition("sub_merge").unwrap();
    assert_eq!(deployed.node(inst.root().current_node).id, "sub");
    assert!(inst.open_task("after").is_none());

    engine.complete_task(id, "inner_task", Variables::new()).await.unwrap();
    let inst = engine.instance(id).await.unwrap();
    assert!(inst.token(inner).unwrap().ended);
    assert_eq!(inst.open_task("after"), Some(TokenId::ROOT));
}

fn branch_with_inner_split() -> bpmn_kernel_core::ProcessDefinition {
    ProcessDefinitionBuilder::new("nested_merge")
        .node("start", NodeKind::StartEvent)
        .node("fork", NodeKind::ParallelGateway)
        .node("split", NodeKind::InclusiveGateway)
        .node("t1", NodeKind::UserTask)
        .node("t2", NodeKind::UserTask)
        .node("merge", NodeKind::InclusiveGateway)
        .node("a_task", NodeKind::UserTask)
        .node("b_task", NodeKind::UserTask)
        .node("join", NodeKind::ParallelGateway)
        .node("end", NodeKind::EndEvent)
        .flow("f0", "start", "fork")
        .flow("fa", "fork", "split")
        .flow("fb", "fork", "b_task")
        .guarded_flow("pos", "split", "t1", Guard::flag("x", FlagOp::Gt, 0))
        .guarded_flow("neg", "split", "t2", Guard::flag("x", FlagOp::Lt, 0))
        .flow("m1", "t1", "merge")
        .flow("m2", "t2", "merge")
        .flow("ma", "merge", "a_task")
        .flow("ja", "a_task", "join")
        .flow("jb", "b_task", "join")
        .flow("out", "join", "end")
        .build()
        .unwrap()
}

#[tokio::test]
async fn single_branch_merge_inside_forked_branch_passes_through() {
    for b_first in [false, true] {
        let engine = engine();
        engine.deploy_definition(branch_with_inner_split()).unwrap();
        let id = engine
            .start_process("nested_merge", vars(&[("x", Value::I64(5))]))
            .await
            .unwrap();
        let inst = engine.instance(id).await.unwrap();
        let branch_a = inst.open_task("t1").unwrap();
        assert!(inst.open_task("b_task").is_some());

        if b_first {
            engine.complete_task(id, "b_task", Variables::new()).await.unwrap();
        }
        engine.complete_task(id, "t1", Variables::new()).await.unwrap();
        let inst = engine.instance(id).await.unwrap();
        assert_eq!(inst.open_task("a_task"), Some(branch_a));
        assert!(!inst.is_ended());

        if !b_first {
            engine.complete_task(id, "b_task", Variables::new()).await.unwrap();
            assert!(!engine.instance(id).await.unwrap().is_ended());
        }
        engine.complete_task(id, "a_task", Variables::new()).await.unwrap();
        assert!(engine.instance(id).await.unwrap().is_ended());

        let log = events(&engine, id).await;
        let released = log
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::JoinReleased { node_id, .. } if node_id == "join"))
            .count();
        assert_eq!(released, 1);
        assert!(!log
            .iter()
            .any(|e| matches!(e, RuntimeEvent::JoinArrived { node_id, .. } if node_id == "merge")));
    }
}

#[tokio::test]
async fn rework_loop_passes_the_same_fork_twice() {
    let def = ProcessDefinitionBuilder::new("rework")
        .node("start", NodeKind::StartEvent)
        .node("merge", NodeKind::ExclusiveGateway)
        .node("fork", NodeKind::ParallelGateway)
        .node("a", NodeKind::UserTask)
        .node("b", NodeKind::UserTask)
        .node("join", NodeKind::ParallelGateway)
        .node("check", NodeKind::UserTask)
        .node("gw", NodeKind::ExclusiveGateway)
        .node("end", NodeKind::EndEvent)
        .flow("f0", "start", "merge")
        .flow("f1", "merge", "fork")
        .flow("fa", "fork", "a")
        .flow("fb", "fork", "b")
        .flow("ja", "a", "join")
        .flow("jb", "b", "join")
        .flow("f2", "join", "check")
        .flow("f3", "check", "gw")
        .guarded_flow("again", "gw", "merge", Guard::flag("x", FlagOp::Gt, 0))
        .flow("done", "gw", "end")
        .default_flow("gw", "done")
        .build()
        .unwrap();
    let engine = engine();
    engine.deploy_definition(def).unwrap();
    let id = engine.start_process("rework", Variables::new()).await.unwrap();

    for round in 0..2 {
        engine.complete_task(id, "a", Variables::new()).await.unwrap();
        engine.complete_task(id, "b", Variables::new()).await.unwrap();
        let inst = engine.instance(id).await.unwrap();
        assert_eq!(inst.open_task("check"), Some(TokenId::ROOT));
        let x = if round == 0 { 1 } else { 0 };
        engine
            .complete_task(id, "check", vars(&[("x", Value::I64(x))]))
            .await
            .unwrap();
    }

    let inst = engine.instance(id).await.unwrap();
    assert!(inst.is_ended());
    let children: Vec<&str> = inst
        .tokens
        .children(TokenId::ROOT)
        .map(|t| t.name.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(children, vec!["fa", "fb", "fa", "fb"]);
    assert!(inst.tokens.iter().all(|t| t.ended));
}

// ── Service tasks and listeners ──

#[tokio::test]
async fn service_task_connector_feeds_routing() {
    let def = ProcessDefinitionBuilder::new("scoring")
        .node("start", NodeKind::StartEvent)
        .node("score", NodeKind::ServiceTask)
        .node("gw", NodeKind::ExclusiveGateway)
        .node("accept", NodeKind::UserTask)
        .node("reject", NodeKind::UserTask)
        .flow("f0", "start", "score")
        .flow("f1", "score", "gw")
        .guarded_flow("ok", "gw", "accept", Guard::flag("score", FlagOp::Gt, 50))
        .flow("no", "gw", "reject")
        .default_flow("gw", "no")
        .connector("score", "credit.score")
        .listener("accept", bpmn_kernel_core::LifecycleEvent::NodeEnter, "audit")
        .build()
        .unwrap();
    let engine = engine()
        .with_connector_fn("credit.score", |cx| {
            let income = match cx.variable("income") {
                Some(Value::I64(i)) => *i,
                _ => 0,
            };
            cx.set_variable("score", income / 1000);
            Ok(())
        })
        .with_connector_fn("audit", |cx| {
            cx.set_variable("audited", true);
            Ok(())
        });
    engine.deploy_definition(def).unwrap();

    let id = engine
        .start_process("scoring", vars(&[("income", Value::I64(90_000))]))
        .await
        .unwrap();
    let inst = engine.instance(id).await.unwrap();
    assert_eq!(inst.variables.get("score"), Some(&Value::I64(90)));
    assert_eq!(inst.variables.get("audited"), Some(&Value::Bool(true)));
    assert!(inst.open_task("accept").is_some());
}

#[tokio::test]
async fn yaml_process_runs_end_to_end() {
    let yaml = r#"
id: leave-request
nodes:
  - { kind: Start, id: start }
  - { kind: UserTask, id: request, name: Submit request }
  - { kind: ExclusiveGateway, id: days }
  - { kind: UserTask, id: manager }
  - { kind: ServiceTask, id: auto, connector: hr.approve }
  - { kind: End, id: end }
flows:
  - { from: start, to: request }
  - { from: request, to: days }
  - { id: long, from: days, to: manager, condition: { flag: days, op: ">", value: 5 } }
  - { id: short, from: days, to: auto, is_default: true }
  - { from: manager, to: end }
  - { from: auto, to: end }
"#;
    let engine = engine().with_connector_fn("hr.approve", |cx| {
        cx.set_variable("approved", true);
        Ok(())
    });
    engine.deploy_yaml(yaml).unwrap();

    let id = engine.start_process("leave-request", Variables::new()).await.unwrap();
    engine
        .complete_task(id, "request", vars(&[("days", Value::I64(2))]))
        .await
        .unwrap();

    let inst = engine.instance(id).await.unwrap();
    assert!(inst.is_ended());
    assert_eq!(inst.variables.get("approved"), Some(&Value::Bool(true)));
}
