//! End-to-end turn scenarios against a scripted provider: permission
//! gating, always-approve dedup, parent/child forwarding, rejection,
//! compaction, abort, lock exclusion, and retry.

mod common;

use std::collections::HashMap;

use serde_json::json;

use common::*;
use sy_domain::config::{BashRule, Rule};
use sy_domain::error::Error;
use sy_domain::message::{Message, MessageError, PartBody, ToolState};
use sy_domain::permission::{
    PermissionKind, PermissionResponse, SimpleResponse,
};
use sy_gateway::runtime::{run_turn, InputPart, PromptInput};
use sy_providers::ModelInfo;
use sy_sessions::bus::BusEvent;
use sy_sessions::store::CreateSession;

fn prompt(session_id: &sy_domain::ident::Id, text: &str) -> PromptInput {
    PromptInput {
        session_id: session_id.clone(),
        parts: vec![InputPart::Text {
            text: text.to_string(),
        }],
        tools: None,
        agent: None,
        model: None,
    }
}

fn ask_all_bash(config: &mut sy_domain::config::Config) {
    let mut patterns = std::collections::BTreeMap::new();
    patterns.insert("*".to_string(), Rule::Ask);
    config.permission.edit = Rule::Allow;
    config.permission.bash = BashRule::Patterns(patterns);
}

fn assistant_parts(f: &Fixture, message: &Message) -> Vec<sy_domain::message::Part> {
    f.state.log.parts(message.session_id(), message.id())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — single bash command approved once
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s1_bash_command_approved_once() {
    let f = fixture(ask_all_bash);
    f.provider.push(vec![
        text("Running it."),
        text_end(),
        tool_call("call_1", "bash", json!({ "command": "echo hi" })),
        step_finish(20, 10),
    ]);
    f.provider.push(final_step("The command printed hi."));

    let session = f.state.sessions.create(CreateSession::default()).unwrap();
    let mut rx = f.state.bus.subscribe();

    let mut tools = HashMap::new();
    tools.insert("bash".to_string(), true);
    let turn = tokio::spawn(run_turn(
        f.state.clone(),
        PromptInput {
            tools: Some(tools),
            ..prompt(&session.id, "run: echo hi")
        },
    ));

    let pending = wait_pending(&f.state, &session.id).await;
    assert_eq!(pending.kind, PermissionKind::Bash);
    assert!(pending.patterns.contains(&"echo hi".to_string()));

    f.state
        .permissions
        .respond(
            &session.id,
            &pending.id,
            &PermissionResponse::Simple(SimpleResponse::Once),
        )
        .unwrap();

    let message = turn.await.unwrap().unwrap();
    match &message {
        Message::Assistant { error, cost, time, .. } => {
            assert!(error.is_none());
            assert!(time.completed.is_some());
            assert!(*cost > 0.0);
        }
        _ => panic!("expected assistant message"),
    }

    // The tool ran for real: completed with the echoed output.
    let completed = assistant_parts(&f, &message)
        .into_iter()
        .find_map(|p| match p.body {
            PartBody::Tool {
                state: ToolState::Completed { output, .. },
                ..
            } => Some(output),
            _ => None,
        })
        .expect("no completed tool part");
    assert_eq!(completed.trim(), "hi");

    let events = drain(&mut rx);
    assert_ordered(
        &events,
        &[
            "message.updated",
            "message.part.updated",
            "permission.updated",
            "permission.replied",
            "session.completed",
        ],
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — always-approve dedup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s2_always_covers_the_second_prompt() {
    let f = fixture(ask_all_bash);
    let session = f.state.sessions.create(CreateSession::default()).unwrap();

    // First prompt: echo a, answered "always".
    f.provider.push(vec![
        tool_call("c1", "bash", json!({ "command": "echo a" })),
        step_finish(20, 10),
    ]);
    f.provider.push(final_step("done a"));

    let turn = tokio::spawn(run_turn(f.state.clone(), prompt(&session.id, "echo a")));
    let pending = wait_pending(&f.state, &session.id).await;
    f.state
        .permissions
        .respond(
            &session.id,
            &pending.id,
            &PermissionResponse::Simple(SimpleResponse::Always),
        )
        .unwrap();
    turn.await.unwrap().unwrap();

    // Second prompt: echo b completes with zero permission.updated.
    f.provider.push(vec![
        tool_call("c2", "bash", json!({ "command": "echo b" })),
        step_finish(20, 10),
    ]);
    f.provider.push(final_step("done b"));

    let mut rx = f.state.bus.subscribe();
    let message = run_turn(f.state.clone(), prompt(&session.id, "echo b"))
        .await
        .unwrap();
    match &message {
        Message::Assistant { error, .. } => assert!(error.is_none()),
        _ => panic!("expected assistant message"),
    }

    let events = drain(&mut rx);
    assert!(
        events.iter().all(|e| e.kind() != "permission.updated"),
        "unexpected permission.updated during covered prompt"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — parent/child forwarding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s3_child_permission_forwards_to_parent() {
    let f = fixture(|c| {
        c.permission.edit = Rule::Ask;
    });
    let parent = f.state.sessions.create(CreateSession::default()).unwrap();

    // Parent turn calls `task`; the child turn calls `edit`.
    f.provider.push(vec![
        tool_call("t1", "task", json!({ "prompt": "edit the readme" })),
        step_finish(20, 10),
    ]);
    // Child step 1: the edit call.
    f.provider.push(vec![
        tool_call("e1", "edit", json!({ "file_path": "README.md" })),
        step_finish(20, 10),
    ]);
    // Child step 2: child's final answer.
    f.provider.push(final_step("child finished the edit"));
    // Parent step 2: parent's final answer.
    f.provider.push(final_step("delegated and done"));

    let mut rx = f.state.bus.subscribe();
    let turn = tokio::spawn(run_turn(
        f.state.clone(),
        prompt(&parent.id, "use a sub-agent to edit"),
    ));

    // The forwarded twin appears under the parent with the same id and
    // the origin marker.
    let forwarded = wait_for(&mut rx, |e| {
        matches!(
            e,
            BusEvent::PermissionUpdated { permission }
                if permission.session_id == parent.id
                    && permission.kind == PermissionKind::Edit
        )
    })
    .await;
    let BusEvent::PermissionUpdated {
        permission: twin,
    } = forwarded
    else {
        unreachable!()
    };
    let child_id = sy_domain::ident::Id::from_string(
        twin.metadata["origin_session_id"].as_str().unwrap(),
    );
    assert_ne!(child_id, parent.id);

    let child_pending = f.state.permissions.pending(&child_id);
    assert_eq!(child_pending.len(), 1);
    assert_eq!(child_pending[0].id, twin.id);

    // Parent answers once: both entries clear, the child edit proceeds.
    f.state
        .permissions
        .respond(
            &parent.id,
            &twin.id,
            &PermissionResponse::Simple(SimpleResponse::Once),
        )
        .unwrap();

    let message = turn.await.unwrap().unwrap();
    assert!(f.state.permissions.pending(&parent.id).is_empty());
    assert!(f.state.permissions.pending(&child_id).is_empty());

    // Child output came back as ordinary tool output.
    let task_output = assistant_parts(&f, &message)
        .into_iter()
        .find_map(|p| match p.body {
            PartBody::Tool {
                tool,
                state: ToolState::Completed { output, .. },
                ..
            } if tool == "task" => Some(output),
            _ => None,
        })
        .expect("no completed task part");
    assert!(task_output.contains("child finished the edit"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4 — rejection with message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s4_rejection_message_reaches_the_model() {
    let f = fixture(|_| {});
    let session = f.state.sessions.create(CreateSession::default()).unwrap();

    f.provider.push(vec![
        tool_call("a1", "ask_user", json!({ "question": "deploy now?" })),
        step_finish(20, 10),
    ]);
    f.provider.push(final_step("Understood, holding off."));

    let mut rx = f.state.bus.subscribe();
    let turn = tokio::spawn(run_turn(
        f.state.clone(),
        prompt(&session.id, "deploy?"),
    ));

    let pending = wait_pending(&f.state, &session.id).await;
    f.state
        .permissions
        .respond(
            &session.id,
            &pending.id,
            &serde_json::from_str(r#"{"type":"reject","message":"not now"}"#).unwrap(),
        )
        .unwrap();

    let message = turn.await.unwrap().unwrap();
    match &message {
        Message::Assistant { error, .. } => assert!(error.is_none(), "turn should continue"),
        _ => panic!("expected assistant message"),
    }

    // The tool part is an error whose message starts with the operator's
    // text, and the turn still completed.
    let error_message = assistant_parts(&f, &message)
        .into_iter()
        .find_map(|p| match p.body {
            PartBody::Tool {
                state: ToolState::Error { message },
                ..
            } => Some(message),
            _ => None,
        })
        .expect("no error tool part");
    assert!(error_message.starts_with("not now"));

    let events = drain(&mut rx);
    assert_ordered(&events, &["permission.replied", "session.completed"]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — compaction trigger at step-finish
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s5_overflow_compacts_then_resumes() {
    let f = fixture(|c| {
        c.permission.bash = BashRule::Simple(Rule::Allow);
        // Small excess: pruning is skipped, summarize still runs.
        c.compaction.prune_minimum_tokens = 1_000;
    });
    f.provider.set_info(ModelInfo {
        context_limit: 1_000,
        output_limit: 200,
        tool_call: true,
    });

    let session = f.state.sessions.create(CreateSession::default()).unwrap();

    // Step 1 overflows: 700 input + 200 output > 1000 - 200 usable.
    f.provider.push(vec![
        tool_call("c1", "bash", json!({ "command": "echo ok" })),
        step_finish(700, 200),
    ]);
    // Compaction's summarize stream.
    f.provider.push(vec![
        text("Summary: we echoed things."),
        text_end(),
        step_finish(50, 20),
    ]);
    // Resumed turn finishes.
    f.provider.push(final_step("carrying on"));

    let mut rx = f.state.bus.subscribe();
    let message = run_turn(f.state.clone(), prompt(&session.id, "go"))
        .await
        .unwrap();
    match &message {
        Message::Assistant { error, .. } => assert!(error.is_none()),
        _ => panic!("expected assistant message"),
    }

    let events = drain(&mut rx);
    assert_ordered(
        &events,
        &[
            "session.compacting.progress",
            "session.compacted",
            "session.completed",
        ],
    );

    // Exactly one summary message plus one synthetic resume message.
    let log = f.state.log.messages(&session.id);
    let summaries: Vec<_> = log.iter().filter(|m| m.message.is_summary()).collect();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0]
        .parts
        .iter()
        .any(|p| p.as_text().is_some_and(|t| t.contains("Summary"))));

    let synthetic = log
        .iter()
        .filter(|m| !m.message.is_assistant())
        .flat_map(|m| &m.parts)
        .any(|p| matches!(&p.body, PartBody::Text { synthetic: true, .. }));
    assert!(synthetic, "no synthetic resume message");

    // The compacting timestamp was cleared on exit.
    assert!(f
        .state
        .sessions
        .get(&session.id)
        .unwrap()
        .time
        .compacting
        .is_none());
}

#[tokio::test]
async fn s5b_no_overflow_means_no_compaction() {
    let f = fixture(|c| {
        c.permission.bash = BashRule::Simple(Rule::Allow);
    });
    f.provider.set_info(ModelInfo {
        context_limit: 1_000,
        output_limit: 200,
        tool_call: true,
    });

    let session = f.state.sessions.create(CreateSession::default()).unwrap();
    f.provider.push(vec![
        tool_call("c1", "bash", json!({ "command": "echo ok" })),
        step_finish(100, 50),
    ]);
    f.provider.push(final_step("fine"));

    let mut rx = f.state.bus.subscribe();
    run_turn(f.state.clone(), prompt(&session.id, "go"))
        .await
        .unwrap();

    let events = drain(&mut rx);
    assert!(events.iter().all(|e| e.kind() != "session.compacted"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S6 — abort mid-tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s6_abort_mid_tool_finalizes_and_recovers() {
    let f = fixture(|c| {
        c.permission.bash = BashRule::Simple(Rule::Allow);
    });
    let session = f.state.sessions.create(CreateSession::default()).unwrap();

    f.provider.push(vec![
        tool_call("c1", "bash", json!({ "command": "sleep 5" })),
        step_finish(20, 10),
    ]);

    let mut rx = f.state.bus.subscribe();
    let turn = tokio::spawn(run_turn(
        f.state.clone(),
        prompt(&session.id, "sleep a while"),
    ));

    // Wait until the tool is running, then abort.
    wait_for(&mut rx, |e| {
        matches!(
            e,
            BusEvent::MessagePartUpdated {
                part: sy_domain::message::Part {
                    body: PartBody::Tool {
                        state: ToolState::Running { .. },
                        ..
                    },
                    ..
                },
                ..
            }
        )
    })
    .await;
    assert!(f.state.locks.abort(&session.id));

    let message = turn.await.unwrap().unwrap();
    match &message {
        Message::Assistant { error, time, .. } => {
            assert!(matches!(error, Some(MessageError::Aborted { .. })));
            assert!(time.completed.is_some());
        }
        _ => panic!("expected assistant message"),
    }

    // The tool part landed in error state.
    assert!(assistant_parts(&f, &message).iter().any(|p| matches!(
        &p.body,
        PartBody::Tool {
            state: ToolState::Error { .. },
            ..
        }
    )));

    // No part updates after session.aborted.
    let events = drain(&mut rx);
    let aborted_at = events
        .iter()
        .position(|e| e.kind() == "session.aborted")
        .expect("no session.aborted event");
    assert!(
        events[aborted_at..]
            .iter()
            .all(|e| e.kind() != "message.part.updated"),
        "part update emitted after abort"
    );
    // The abort suppressed session.completed.
    assert!(events.iter().all(|e| e.kind() != "session.completed"));

    // The next prompt succeeds.
    f.provider.push(final_step("fresh start"));
    let message = run_turn(f.state.clone(), prompt(&session.id, "again"))
        .await
        .unwrap();
    match &message {
        Message::Assistant { error, .. } => assert!(error.is_none()),
        _ => panic!("expected assistant message"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lock exclusion, retry, fatal errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn concurrent_prompt_loses_with_session_locked() {
    let f = fixture(|_| {});
    let session = f.state.sessions.create(CreateSession::default()).unwrap();

    f.provider.push(vec![
        common::ScriptItem::Wait(300),
        text("slow answer"),
        text_end(),
        step_finish(10, 5),
    ]);

    let winner = tokio::spawn(run_turn(f.state.clone(), prompt(&session.id, "one")));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let loser = run_turn(f.state.clone(), prompt(&session.id, "two")).await;
    assert!(matches!(loser, Err(Error::SessionLocked(_))));

    winner.await.unwrap().unwrap();
}

#[tokio::test]
async fn transient_provider_failure_is_retried() {
    let f = fixture(|_| {});
    let session = f.state.sessions.create(CreateSession::default()).unwrap();

    f.provider.push(vec![common::ScriptItem::Fail {
        retryable: true,
    }]);
    f.provider.push(final_step("second attempt worked"));

    let message = run_turn(f.state.clone(), prompt(&session.id, "go"))
        .await
        .unwrap();
    match &message {
        Message::Assistant { error, .. } => assert!(error.is_none()),
        _ => panic!("expected assistant message"),
    }

    // The transient failure left a retry marker part.
    assert!(assistant_parts(&f, &message)
        .iter()
        .any(|p| matches!(&p.body, PartBody::Retry { attempt: 1, .. })));
}

#[tokio::test]
async fn fatal_provider_failure_terminates_the_turn() {
    let f = fixture(|_| {});
    let session = f.state.sessions.create(CreateSession::default()).unwrap();

    f.provider.push(vec![common::ScriptItem::Fail {
        retryable: false,
    }]);

    let mut rx = f.state.bus.subscribe();
    let message = run_turn(f.state.clone(), prompt(&session.id, "go"))
        .await
        .unwrap();
    match &message {
        Message::Assistant { error, .. } => {
            assert!(matches!(error, Some(MessageError::Provider { .. })));
        }
        _ => panic!("expected assistant message"),
    }

    let events = drain(&mut rx);
    assert_ordered(&events, &["session.error", "session.completed"]);
}
