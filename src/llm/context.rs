// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Context window and page-read deduplication
//!
//! Selects which historical turns the model sees and collapses stale page
//! reads so the same page dump is not resent on every turn.
//!
//! Windowing pivots on the *boundary* user message: the second-to-last user
//! turn when there are at least two, otherwise the only one. Before the
//! boundary only user turns and text-bearing assistant turns survive, with
//! assistant tool calls stripped. From the boundary on, every turn is kept.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::llm::message::{MessageIntermediate, NormalizedMessage, Role, ToolCallEntry};
use crate::tools::builtin::{GET_PAGE_MARKDOWN_TOOL, OPEN_PAGE_TOOL};

/// Content that replaces an obsolete open-page result.
pub const OBSOLETE_PAGE_MARKER: &str = "Page opened successfully.";

/// One decision in the windowing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextPlanItem {
    pub index: usize,
    pub include_tool_calls: bool,
}

/// Plan which turns are visible to the model.
pub fn plan_context_window(messages: &[NormalizedMessage]) -> Vec<ContextPlanItem> {
    let user_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User)
        .map(|(i, _)| i)
        .collect();

    let Some(&first_user) = user_indices.first() else {
        return Vec::new();
    };
    let boundary = match user_indices.len() {
        1 => first_user,
        n => user_indices[n - 2],
    };

    let mut plan = Vec::new();

    for (index, message) in messages.iter().enumerate().take(boundary) {
        match message.role {
            Role::User => plan.push(ContextPlanItem {
                index,
                include_tool_calls: true,
            }),
            Role::Assistant if index > first_user && message.has_text() => {
                plan.push(ContextPlanItem {
                    index,
                    include_tool_calls: false,
                })
            }
            _ => {}
        }
    }

    for (index, message) in messages.iter().enumerate().skip(boundary) {
        if message.role == Role::System {
            continue;
        }
        plan.push(ContextPlanItem {
            index,
            include_tool_calls: true,
        });
    }

    plan
}

/// Outcome of the page-read dedup scan
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DedupDecisions {
    /// Markdown-read calls whose call entry and result are removed
    pub dropped_calls: HashSet<String>,
    /// Open-page results whose content is replaced by a marker
    pub truncated_results: HashSet<String>,
}

#[derive(Debug, Clone)]
enum PageEvent {
    MarkdownRead { call_id: String },
    PageOpened { call_id: String },
}

/// Find page reads made obsolete by a later read of the same tab.
pub fn plan_page_dedup(messages: &[NormalizedMessage], plan: &[ContextPlanItem]) -> DedupDecisions {
    // Events in conversation order, keyed by tab id.
    let mut events: Vec<(i64, PageEvent)> = Vec::new();
    // Open-page calls whose tab is only known from the call arguments.
    let mut open_page_call_tabs: HashMap<String, i64> = HashMap::new();

    for item in plan {
        let message = &messages[item.index];
        match message.role {
            Role::Assistant | Role::User if item.include_tool_calls => {
                for call in &message.tool_calls {
                    let Some(tab_id) = tab_id_from_arguments(&call.arguments) else {
                        continue;
                    };
                    if call.name == GET_PAGE_MARKDOWN_TOOL {
                        events.push((
                            tab_id,
                            PageEvent::MarkdownRead {
                                call_id: call.result_id().to_string(),
                            },
                        ));
                    } else if call.name == OPEN_PAGE_TOOL {
                        open_page_call_tabs.insert(call.result_id().to_string(), tab_id);
                    }
                }
            }
            Role::Tool => {
                let Some(call_id) = &message.tool_call_id else {
                    continue;
                };
                let reported_tab = message.tool_context.as_ref().and_then(|c| c.page_tab_id);
                let is_open_page = message.name.as_deref() == Some(OPEN_PAGE_TOOL);
                let tab_id = match (reported_tab, is_open_page) {
                    (Some(tab), _) => Some(tab),
                    (None, true) => open_page_call_tabs.get(call_id).copied(),
                    (None, false) => None,
                };
                if let (Some(tab_id), true) = (tab_id, is_open_page || reported_tab.is_some()) {
                    events.push((
                        tab_id,
                        PageEvent::PageOpened {
                            call_id: call_id.clone(),
                        },
                    ));
                }
            }
            _ => {}
        }
    }

    let mut latest: HashMap<i64, usize> = HashMap::new();
    for (position, (tab_id, _)) in events.iter().enumerate() {
        latest.insert(*tab_id, position);
    }

    let mut decisions = DedupDecisions::default();
    for (position, (tab_id, event)) in events.into_iter().enumerate() {
        if latest.get(&tab_id) == Some(&position) {
            continue;
        }
        match event {
            PageEvent::MarkdownRead { call_id } => {
                tracing::debug!(
                    target: "tabwright.llm.context",
                    tab_id,
                    call_id = %call_id,
                    "dropping obsolete page read"
                );
                decisions.dropped_calls.insert(call_id);
            }
            PageEvent::PageOpened { call_id } => {
                tracing::debug!(
                    target: "tabwright.llm.context",
                    tab_id,
                    call_id = %call_id,
                    "truncating obsolete page open result"
                );
                decisions.truncated_results.insert(call_id);
            }
        }
    }

    decisions
}

/// Build the provider-agnostic turn list for one request.
pub fn build_message_intermediates(messages: &[NormalizedMessage]) -> Vec<MessageIntermediate> {
    let plan = plan_context_window(messages);
    let decisions = plan_page_dedup(messages, &plan);

    let mut emitted_calls: HashSet<String> = HashSet::new();
    let mut intermediates = Vec::with_capacity(plan.len());

    for item in &plan {
        let message = &messages[item.index];
        match message.role {
            Role::Tool => {
                let Some(call_id) = &message.tool_call_id else {
                    continue;
                };
                if decisions.dropped_calls.contains(call_id) {
                    continue;
                }
                if !emitted_calls.contains(call_id) {
                    tracing::debug!(
                        target: "tabwright.llm.context",
                        call_id = %call_id,
                        "skipping tool result without a visible call"
                    );
                    continue;
                }
                let truncated = decisions.truncated_results.contains(call_id);
                let content = if truncated {
                    OBSOLETE_PAGE_MARKER.to_string()
                } else {
                    message.content.clone()
                };
                let image_input = if truncated {
                    None
                } else {
                    message.tool_context.as_ref().and_then(|c| c.image.clone())
                };
                intermediates.push(MessageIntermediate::ToolResult {
                    call_id: call_id.clone(),
                    content,
                    name: message.name.clone(),
                    image_input,
                });
            }
            role => {
                let tool_call_entries: Vec<ToolCallEntry> = if item.include_tool_calls {
                    message
                        .tool_calls
                        .iter()
                        .filter(|call| !decisions.dropped_calls.contains(call.result_id()))
                        .map(ToolCallEntry::from)
                        .collect()
                } else {
                    Vec::new()
                };

                if role == Role::Assistant && !message.has_text() && tool_call_entries.is_empty()
                {
                    continue;
                }

                emitted_calls.extend(tool_call_entries.iter().map(|e| e.call_id.clone()));
                intermediates.push(MessageIntermediate::Conversation {
                    role,
                    content: message.content.clone(),
                    tool_call_entries,
                });
            }
        }
    }

    intermediates
}

fn tab_id_from_arguments(arguments: &crate::llm::message::ToolArguments) -> Option<i64> {
    use crate::llm::message::ToolArguments;

    let parsed;
    let value = match arguments {
        ToolArguments::Structured(value) => value,
        ToolArguments::Text(text) => {
            parsed = serde_json::from_str::<Value>(text).ok()?;
            &parsed
        }
    };
    let raw = value.get("tabId").or_else(|| value.get("tab_id"))?;
    raw.as_i64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
}
