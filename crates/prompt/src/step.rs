//! Fresh-turn prompt assembly.

use adaf_domain::{Position, ResourcePriority};

use crate::inputs::StepPromptInput;

/// Build the Markdown prompt for a fresh turn. Sections appear in a
/// fixed order and are omitted when inapplicable; `manual_prompt`
/// bypasses everything after the identity line.
pub fn build_step_prompt(input: &StepPromptInput<'_>) -> String {
    let mut out = String::new();

    // 1. Identity.
    if input.parent_turn_id > 0 {
        let role = input
            .step
            .role
            .as_deref()
            .unwrap_or(input.step.position.as_str());
        out.push_str(&format!(
            "You are a sub-agent working as a {role} for project \"{}\".\n",
            input.project.name
        ));
    } else {
        out.push_str(&format!(
            "You are working on project \"{}\" as part of an automated loop.\n",
            input.project.name
        ));
    }

    // Manual prompt override: verbatim, nothing else.
    if let Some(manual) = &input.step.manual_prompt {
        out.push('\n');
        out.push_str(manual);
        if !manual.ends_with('\n') {
            out.push('\n');
        }
        return out;
    }

    // 2. Objective.
    if !input.step.instructions.is_empty() {
        out.push_str("\n# Objective\n\n");
        out.push_str(&input.step.instructions);
        out.push('\n');
    }

    // 3. Rules.
    let rules = collect_rules(input);
    if !rules.is_empty() {
        out.push_str("\n# Rules\n\n");
        for rule in &rules {
            out.push_str(&format!("- {rule}\n"));
        }
    }

    // 4. Context.
    out.push_str("\n# Context\n\n");
    out.push_str(&format!("- Project: {}\n", input.project.name));
    if !input.project.plan_id.is_empty() {
        out.push_str(&format!("- Plan: {}\n", input.project.plan_id));
    }
    if let Some(lp) = input.loop_info {
        out.push_str(&format!(
            "- Loop \"{}\": cycle {}, step {} of {}\n",
            lp.name,
            lp.cycle,
            lp.step_index + 1,
            lp.total_steps
        ));
        out.push_str(&format!("- Resource priority: {}\n", lp.resource_priority));
        if let Some(guidance) = priority_guidance(lp.resource_priority) {
            out.push_str(&format!("- {guidance}\n"));
        }
        if input.parent_turn_id == 0 {
            out.push_str("\nThere is no human in the loop.\n");
        }
    }

    // 5. Skills.
    let skills = merge_skills(input);
    if !skills.is_empty() {
        out.push_str("\n# Skills\n\n");
        for skill in &skills {
            out.push_str(&format!("- {skill}\n"));
        }
    }

    // 6. Delegation.
    if !input.delegation.is_empty() {
        out.push_str("\n# Delegation\n\n");
        out.push_str("You may delegate work to child agents:\n");
        for child in input.delegation {
            let mut line = format!("- `{}`", child.profile);
            if let Some(role) = &child.role {
                line.push_str(&format!(" (role: {role})"));
            }
            if child.read_only {
                line.push_str(" [read-only]");
            }
            if child.handoff {
                line.push_str(" [handoff]");
            }
            if let Some(desc) = &child.description {
                line.push_str(&format!(" — {desc}"));
            }
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str(
            "\nSpawn with `adaf spawn --profile <p> [--role <r>] --task \"...\" \
             [--task-file <path>] [--read-only] [--issue N]`, then run \
             `adaf wait-for-spawns` to suspend until children report.\n\
             Inspect children with `adaf spawn-status`, steer them with \
             `adaf spawn-message --spawn-id N [--interrupt] \"...\"`, and finish \
             writable spawns with `adaf spawn-merge --spawn-id N [--squash]` or \
             `adaf spawn-reject --spawn-id N`.\n",
        );
        if input.step.position == Position::Manager && input.loop_has_supervisor {
            out.push_str(
                "Run `adaf loop call-supervisor` to hand control to the supervisor step.\n",
            );
        }
    }

    // 7. Supervisor messages.
    if !input.messages.is_empty() {
        out.push_str("\n# Supervisor Messages\n\n");
        for msg in input.messages {
            out.push_str(&format!(
                "- [{}] {}: {}\n",
                msg.at.format("%H:%M:%S"),
                msg.author,
                msg.content
            ));
        }
    }

    // 8. Task (sub-agents only).
    if let Some(task) = input.task {
        out.push_str("\n# Task\n\n");
        out.push_str(task);
        out.push('\n');
        if input.read_only {
            out.push_str(
                "\nThis spawn is read-only: report findings, do not modify the working copy.\n",
            );
        }
    }

    out
}

fn collect_rules(input: &StepPromptInput<'_>) -> Vec<String> {
    let mut rules = Vec::new();

    if input.step.read_only || input.read_only {
        rules.push("You are a read-only scout: do not modify, create, or delete files.".into());
        rules.push("Do not run commands that change repository or system state.".into());
    } else if input.step.can_write_code {
        rules.push("You may write code: implement changes directly in the working copy.".into());
        rules.push("Commit your work with clear messages as you go.".into());
    }

    rules.extend(input.step.role_rules.iter().cloned());

    let role = input.step.role.as_deref();
    for rule in input.catalog {
        if rule.applies_to(input.step.position, role) {
            rules.push(rule.text.clone());
        }
    }

    rules
}

/// Merge step, role, and profile skills, deduped, input order preserved.
fn merge_skills(input: &StepPromptInput<'_>) -> Vec<String> {
    let mut skills: Vec<String> = Vec::new();
    for skill in input
        .step
        .step_skills
        .iter()
        .chain(input.step.role_skills.iter())
        .chain(input.step.profile_skills.iter())
    {
        if !skills.iter().any(|s| s == skill) {
            skills.push(skill.clone());
        }
    }
    skills
}

fn priority_guidance(priority: ResourcePriority) -> Option<&'static str> {
    match priority {
        ResourcePriority::Balanced => None,
        ResourcePriority::Cost => Some("Prefer `free`/`cheap` spawn profiles."),
        ResourcePriority::Speed => Some("Prefer fast spawn profiles over thorough ones."),
        ResourcePriority::Quality => Some("Prefer the most capable spawn profiles."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::{DelegationChild, LoopFacts, MessageFacts, ProjectFacts, StepFacts};
    use adaf_domain::config::PromptRule;
    use chrono::TimeZone;

    fn project() -> ProjectFacts {
        ProjectFacts {
            name: "demo".into(),
            plan_id: "plan-7".into(),
        }
    }

    fn loop_facts() -> LoopFacts {
        LoopFacts {
            name: "main".into(),
            cycle: 2,
            step_index: 0,
            total_steps: 3,
            resource_priority: ResourcePriority::Cost,
        }
    }

    fn step() -> StepFacts {
        StepFacts {
            position: Position::Lead,
            role: Some("developer".into()),
            can_write_code: true,
            instructions: "Implement the next milestone.".into(),
            can_message: true,
            ..Default::default()
        }
    }

    fn input<'a>(
        project: &'a ProjectFacts,
        loop_info: Option<&'a LoopFacts>,
        step: &'a StepFacts,
    ) -> StepPromptInput<'a> {
        StepPromptInput {
            project,
            loop_info,
            step,
            catalog: &[],
            delegation: &[],
            loop_has_supervisor: false,
            parent_turn_id: 0,
            messages: &[],
            task: None,
            read_only: false,
        }
    }

    #[test]
    fn prompt_is_deterministic() {
        let p = project();
        let lf = loop_facts();
        let s = step();
        let a = build_step_prompt(&input(&p, Some(&lf), &s));
        let b = build_step_prompt(&input(&p, Some(&lf), &s));
        assert_eq!(a, b);
    }

    #[test]
    fn top_level_sections_in_order() {
        let p = project();
        let lf = loop_facts();
        let s = step();
        let prompt = build_step_prompt(&input(&p, Some(&lf), &s));

        assert!(prompt.starts_with("You are working on project \"demo\""));
        let obj = prompt.find("# Objective").unwrap();
        let rules = prompt.find("# Rules").unwrap();
        let ctx = prompt.find("# Context").unwrap();
        assert!(obj < rules && rules < ctx);
        assert!(prompt.contains("Implement the next milestone."));
        assert!(prompt.contains("- Plan: plan-7"));
        assert!(prompt.contains("cycle 2, step 1 of 3"));
        assert!(prompt.contains("Prefer `free`/`cheap` spawn profiles."));
        assert!(prompt.contains("There is no human in the loop."));
    }

    #[test]
    fn manual_prompt_bypasses_everything() {
        let p = project();
        let lf = loop_facts();
        let mut s = step();
        s.manual_prompt = Some("Just say hello.".into());
        let prompt = build_step_prompt(&input(&p, Some(&lf), &s));

        assert!(prompt.contains("Just say hello."));
        assert!(!prompt.contains("# Objective"));
        assert!(!prompt.contains("# Rules"));
        assert!(!prompt.contains("# Context"));
    }

    #[test]
    fn sub_agent_identity_and_task() {
        let p = project();
        let mut s = step();
        s.role = Some("scout".into());
        s.read_only = true;
        s.can_write_code = false;
        s.instructions = String::new();
        let mut inp = input(&p, None, &s);
        inp.parent_turn_id = 12;
        inp.task = Some("Map the module layout.");
        inp.read_only = true;
        let prompt = build_step_prompt(&inp);

        assert!(prompt.starts_with("You are a sub-agent working as a scout"));
        assert!(prompt.contains("# Task"));
        assert!(prompt.contains("Map the module layout."));
        assert!(prompt.contains("read-only scout"));
        assert!(prompt.contains("This spawn is read-only"));
        assert!(!prompt.contains("There is no human in the loop."));
    }

    #[test]
    fn no_human_line_only_for_loop_steps() {
        let p = project();
        let lf = loop_facts();
        let s = step();

        // Sub-agent under a loop: no line.
        let mut inp = input(&p, Some(&lf), &s);
        inp.parent_turn_id = 3;
        assert!(!build_step_prompt(&inp).contains("There is no human in the loop."));

        // Standalone (no loop): no line either.
        let inp2 = input(&p, None, &s);
        assert!(!build_step_prompt(&inp2).contains("There is no human in the loop."));
    }

    #[test]
    fn skills_merged_and_deduped() {
        let p = project();
        let mut s = step();
        s.step_skills = vec!["git".into(), "testing".into()];
        s.role_skills = vec!["testing".into(), "profiling".into()];
        s.profile_skills = vec!["git".into(), "search".into()];
        let prompt = build_step_prompt(&input(&p, None, &s));

        let skills_at = prompt.find("# Skills").unwrap();
        let section = &prompt[skills_at..];
        let lines: Vec<&str> = section
            .lines()
            .filter(|l| l.starts_with("- "))
            .take(4)
            .collect();
        assert_eq!(lines, vec!["- git", "- testing", "- profiling", "- search"]);
    }

    #[test]
    fn explicit_empty_skills_omit_section() {
        let p = project();
        let mut s = step();
        s.skills_explicit = true;
        let prompt = build_step_prompt(&input(&p, None, &s));
        assert!(!prompt.contains("# Skills"));
    }

    #[test]
    fn catalog_rules_filtered_by_position() {
        let p = project();
        let s = step();
        let catalog = vec![
            PromptRule {
                text: "Applies everywhere.".into(),
                positions: Vec::new(),
                roles: Vec::new(),
            },
            PromptRule {
                text: "Managers only.".into(),
                positions: vec![Position::Manager],
                roles: Vec::new(),
            },
        ];
        let mut inp = input(&p, None, &s);
        inp.catalog = &catalog;
        let prompt = build_step_prompt(&inp);

        assert!(prompt.contains("Applies everywhere."));
        assert!(!prompt.contains("Managers only."));
    }

    #[test]
    fn delegation_section_and_supervisor_hint() {
        let p = project();
        let mut s = step();
        s.position = Position::Manager;
        let delegation = vec![
            DelegationChild {
                profile: "cheap".into(),
                role: Some("scout".into()),
                description: Some("fast recon".into()),
                read_only: true,
                handoff: false,
            },
            DelegationChild {
                profile: "builder".into(),
                role: None,
                description: None,
                read_only: false,
                handoff: true,
            },
        ];
        let mut inp = input(&p, None, &s);
        inp.delegation = &delegation;
        inp.loop_has_supervisor = true;
        let prompt = build_step_prompt(&inp);

        assert!(prompt.contains("# Delegation"));
        assert!(prompt.contains("`cheap` (role: scout) [read-only] — fast recon"));
        assert!(prompt.contains("`builder` [handoff]"));
        assert!(prompt.contains("adaf spawn --profile"));
        assert!(prompt.contains("adaf loop call-supervisor"));

        // Not a manager ⇒ no supervisor hint.
        s.position = Position::Lead;
        let mut inp2 = input(&p, None, &s);
        inp2.delegation = &delegation;
        inp2.loop_has_supervisor = true;
        assert!(!build_step_prompt(&inp2).contains("call-supervisor"));
    }

    #[test]
    fn supervisor_messages_formatted() {
        let p = project();
        let s = step();
        let at = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 14, 30, 5).unwrap();
        let messages = vec![MessageFacts {
            at,
            author: "supervisor".into(),
            content: "focus on the parser".into(),
        }];
        let mut inp = input(&p, None, &s);
        inp.messages = &messages;
        let prompt = build_step_prompt(&inp);

        assert!(prompt.contains("# Supervisor Messages"));
        assert!(prompt.contains("- [14:30:05] supervisor: focus on the parser"));
    }
}
