//! Context pruning — mark stale tool outputs as excluded from future
//! provider assemblies without touching the stored log.
//!
//! Protection rules: parts belonging to the most recent user turns are
//! never pruned, and walking backwards from the end a budget of recent
//! tool-output tokens is kept verbatim. Only completed tool parts are
//! eligible; the `compacted` timestamp is the only mutation.

use chrono::Utc;

use sy_domain::config::CompactionConfig;
use sy_domain::error::Result;
use sy_domain::ident::Id;
use sy_domain::message::{Message, PartBody, ToolState};
use sy_sessions::MessageLog;

use super::estimate_tokens;

/// Mark old tool outputs compacted. Skipped entirely when the overflow
/// excess is below the configured minimum. Returns how many parts were
/// marked.
pub fn prune(
    log: &MessageLog,
    config: &CompactionConfig,
    session_id: &Id,
    excess_tokens: u64,
) -> Result<usize> {
    if excess_tokens < config.prune_minimum_tokens {
        return Ok(0);
    }

    let messages = log.messages(session_id);

    // Everything from the Nth-from-last user message onward is protected.
    let protected_from = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| matches!(m.message, Message::User { .. }))
        .map(|(i, _)| i)
        .rev()
        .nth(config.protect_user_turns.saturating_sub(1))
        .unwrap_or(0);

    let mut kept_budget = config.prune_protect_tokens;
    let mut marked = 0;

    // Walk parts newest-first so the keep budget covers the most recent
    // output.
    for entry in messages[..protected_from].iter().rev() {
        for part in entry.parts.iter().rev() {
            let PartBody::Tool { state, .. } = &part.body else {
                continue;
            };
            let ToolState::Completed {
                output, compacted, ..
            } = state
            else {
                continue;
            };
            if compacted.is_some() {
                continue;
            }

            let cost = estimate_tokens(output);
            if kept_budget >= cost {
                kept_budget -= cost;
                continue;
            }

            let mut updated = part.clone();
            if let PartBody::Tool {
                state:
                    ToolState::Completed {
                        compacted: slot, ..
                    },
                ..
            } = &mut updated.body
            {
                *slot = Some(Utc::now());
            }
            log.update_part(updated, None)?;
            marked += 1;
        }
    }

    if marked > 0 {
        tracing::info!(
            session_id = %session_id,
            marked,
            "pruned stale tool outputs"
        );
    }
    Ok(marked)
}
