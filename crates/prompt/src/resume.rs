//! Resume-continuation prompt assembly. The agent already holds the
//! conversation; this is the minimal message sent on a resume turn.

use crate::inputs::ResumePromptInput;
use crate::CONTINUE_LEAD;

/// Build the resume continuation. With no wait results, no interrupt,
/// and the lead included, the output is exactly
/// `"Continue from where you left off.\n\n"`.
pub fn build_resume_prompt(input: &ResumePromptInput<'_>) -> String {
    let mut out = String::new();

    if input.include_continue_lead {
        out.push_str(CONTINUE_LEAD);
        out.push_str("\n\n");
    }

    if let Some(interrupt) = input.interrupt {
        out.push_str("## Interrupt\n\n");
        out.push_str(interrupt);
        out.push_str("\n\n");
    }

    if !input.wait_results.is_empty() {
        let any_review = input.wait_results.iter().any(|r| r.review.is_some());
        out.push_str(if any_review {
            "## Spawn Review Checkpoint\n\n"
        } else {
            "## Spawn Wait Results\n\n"
        });

        for report in input.wait_results {
            out.push_str(&format!("### Spawn #{} (profile={}", report.id, report.profile));
            if report.read_only {
                out.push_str(", read-only");
            } else if !report.branch.is_empty() {
                out.push_str(&format!(", branch={}", report.branch));
            }
            out.push_str(&format!(") — {}", report.status));
            if let Some(code) = report.exit_code {
                out.push_str(&format!(" (exit_code={code})"));
            }
            out.push_str("\n\n");

            if let Some(stats) = &report.review {
                out.push_str(&format!("Elapsed: {}s\n", stats.elapsed_secs));
                out.push_str(&format!(
                    "Activity: {} reads, {} writes, {} commits, {} compactions\n",
                    stats.reads, stats.writes, stats.commits, stats.compactions
                ));
                out.push_str(&format!(
                    "Tokens: {} input ({} cached), {} output\n\n",
                    stats.input_tokens, stats.cached_tokens, stats.output_tokens
                ));
            } else {
                if !report.summary.is_empty() {
                    out.push_str(&report.summary);
                    out.push_str("\n\n");
                }
                if !report.result.is_empty() {
                    out.push_str(&report.result);
                    out.push_str("\n\n");
                }
            }
        }

        if input.more_pending {
            out.push_str(
                "More spawns are still running. Run `adaf wait-for-spawns` to keep \
                 waiting, or use `adaf spawn-message`, `adaf spawn-reject`, and \
                 `adaf spawn-status` to manage them.\n\n",
            );
        }
    }

    if !input.messages.is_empty() {
        out.push_str("## Supervisor Messages\n\n");
        for msg in input.messages {
            out.push_str(&format!(
                "- [{}] {}: {}\n",
                msg.at.format("%H:%M:%S"),
                msg.author,
                msg.content
            ));
        }
        out.push('\n');
    }

    out
}
