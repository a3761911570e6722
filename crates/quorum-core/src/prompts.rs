// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt text for the consensus, reflection and refinement calls.

use quorum_config::AgentConfig;

/// Standing request appended when a conversation does not already end on a
/// user turn.
pub const NEXT_ACTION_PROMPT: &str =
    "Decide your next action. Respond with a single JSON object: \
     {\"action\": string, \"params\": object, \"reasoning\": string, \
     \"wait\": boolean or milliseconds, \"auto_complete_todo\": boolean}. \
     Use {\"action\": \"wait\"} when there is nothing productive to do.";

/// Sent when too few responses parsed as valid decisions.
pub const REFINEMENT_PROMPT: &str =
    "Your previous reply could not be parsed as a decision. Respond again \
     with ONLY one JSON object of the form {\"action\": string, \"params\": \
     object, \"reasoning\": string, \"wait\": boolean or milliseconds}. No \
     prose, no markdown fences.";

/// Reflection call used during history condensation.
pub const REFLECTION_PROMPT: &str = "\
You are condensing an agent's conversation history. From the transcript \
below, extract what must survive the condensation. Respond with ONLY a JSON \
object:

{
  \"lessons\": [
    {\"type\": \"factual\" | \"behavioral\", \"content\": string, \"confidence\": number}
  ],
  \"state\": [
    {\"summary\": string}
  ]
}

Lessons are durable facts (factual) or corrections to how the agent should \
behave (behavioral); confidence is 0.0-1.0. The state summary is a dense \
paragraph describing where the task stands: goals, progress, blockers, and \
what comes next. Preserve identifiers, file paths and error messages \
verbatim where they matter.";

/// The stable system prompt for one agent.
pub fn system_prompt(config: &AgentConfig, action_names: &[String]) -> String {
    let mut out = String::new();
    let name = config.profile_name.as_deref().unwrap_or("agent");
    out.push_str(&format!(
        "You are \"{name}\", one model in a pool jointly controlling a \
         long-lived agent. Each cycle, every model in the pool proposes the \
         agent's next action and the majority decision is executed.\n"
    ));
    if let Some(desc) = &config.profile_description {
        out.push_str("\n<profile>\n");
        out.push_str(desc);
        out.push_str("\n</profile>\n");
    }
    if !config.active_skills.is_empty() {
        out.push_str("\n<skills>\n");
        for skill in &config.active_skills {
            out.push_str(&format!("- {skill}\n"));
        }
        out.push_str("</skills>\n");
    }
    if !action_names.is_empty() {
        out.push_str(&format!(
            "\nAvailable actions: {}.\n",
            action_names.join(", ")
        ));
    }
    out.push_str(
        "\nAlways answer with a single JSON decision object: \
         {\"action\", \"params\", \"reasoning\", \"wait\", \
         \"auto_complete_todo\"}. Set \"wait\" to true when the action's \
         outcome arrives from outside (a spawned child reporting back), to a \
         millisecond count for a timed pause, and to false otherwise.",
    );
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_includes_profile_and_actions() {
        let mut config = AgentConfig::for_test("a1");
        config.profile_name = Some("researcher".into());
        config.profile_description = Some("Finds and verifies facts.".into());
        config.active_skills = vec!["web-search".into()];
        let p = system_prompt(&config, &["orient".into(), "shell".into()]);
        assert!(p.contains("\"researcher\""));
        assert!(p.contains("<profile>"));
        assert!(p.contains("Finds and verifies facts."));
        assert!(p.contains("- web-search"));
        assert!(p.contains("orient, shell"));
    }

    #[test]
    fn system_prompt_without_profile_still_instructs_json() {
        let p = system_prompt(&AgentConfig::for_test("a1"), &[]);
        assert!(p.contains("JSON decision object"));
        assert!(!p.contains("<profile>"));
    }
}
