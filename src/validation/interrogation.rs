//! InterrogationValidator (spec §4.6.4): a last-resort, at-most-once
//! follow-up round that asks the primary agent to resolve the criteria
//! `StandardValidator`/`DeterministicValidator`/`HelperAgentValidator`
//! left uncertain, then asks it directly whether everything now holds.

use crate::dispatcher::{DispatchRequest, ProviderDispatcher};
use crate::state::{Confidence, Task, ValidationReport};

/// Gate for running the interrogation round: only when the report is still
/// invalid, confidence sits at UNCERTAIN (or LOW with uncertain criteria
/// outstanding), and this `(task_id, retry_count)` hasn't already run one.
pub fn should_run(report: &ValidationReport, already_interrogated: bool) -> bool {
    if report.valid || already_interrogated {
        return false;
    }
    match report.confidence {
        Confidence::Uncertain => true,
        Confidence::Low => !report.uncertain_criteria.is_empty(),
        _ => false,
    }
}

fn outstanding_criteria(report: &ValidationReport) -> Vec<String> {
    if !report.uncertain_criteria.is_empty() {
        report.uncertain_criteria.clone()
    } else {
        report.failed_criteria.clone()
    }
}

fn build_interrogation_prompt(task: &Task, criteria: &[String]) -> String {
    let questions: Vec<String> = criteria
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. Is the following satisfied? \"{}\"", i + 1, c))
        .collect();
    format!(
        "Answer each question definitively using only the work you already did for task {}.\n\
         Then respond with a single JSON object {{\"all_criteria_satisfied\": bool, \"unresolved\": [list of unmet criteria]}}.\n\n{}\n",
        task.task_id,
        questions.join("\n")
    )
}

struct InterrogationAnswer {
    all_satisfied: bool,
    unresolved: Vec<String>,
}

fn parse_answer(raw: &str, fallback_unresolved: &[String]) -> InterrogationAnswer {
    match super::standard::extract_outermost_json(raw) {
        Some(json) => {
            let all_satisfied = json
                .get("all_criteria_satisfied")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let unresolved = json
                .get("unresolved")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_else(|| fallback_unresolved.to_vec());
            InterrogationAnswer {
                all_satisfied,
                unresolved,
            }
        }
        None => InterrogationAnswer {
            all_satisfied: false,
            unresolved: fallback_unresolved.to_vec(),
        },
    }
}

/// Dispatches the interrogation prompt to the primary agent and resolves the
/// report: upgrades to `valid=true` on `all_criteria_satisfied`, otherwise
/// overwrites `failed_criteria`/`uncertain_criteria` with what remains.
pub async fn validate(
    task: &Task,
    dispatcher: &ProviderDispatcher,
    report: &mut ValidationReport,
) -> anyhow::Result<()> {
    let criteria = outstanding_criteria(report);
    if criteria.is_empty() {
        return Ok(());
    }

    let prompt = build_interrogation_prompt(task, &criteria);
    let cwd = std::env::temp_dir();
    let req = DispatchRequest {
        prompt: &prompt,
        cwd: &cwd,
        agent_mode: None,
        session_id: None,
        feature_id: task.feature_id.as_deref(),
    };
    let (result, _provider) = dispatcher.execute(&req).await;
    if result.exit_code != 0 {
        return Ok(());
    }

    let answer = parse_answer(&result.raw_output(), &criteria);
    if answer.all_satisfied {
        report.rules_passed.append(&mut report.failed_criteria.drain(..).collect());
        report.uncertain_criteria.clear();
        report.confidence = Confidence::Medium;
        report.upgrade(true);
    } else {
        report.failed_criteria = answer.unresolved.clone();
        report.uncertain_criteria.clear();
        report.reason = Some("interrogation left criteria unresolved".to_string());
    }

    Ok(())
}

/// Final interrogation sweep for MaxRetriesStrategy (spec §4.7.2): zero
/// follow-up questions per criterion, an evidentiary yes/no confirmation
/// only. Distinct from `validate` above, which interrogates per-criterion.
pub async fn final_sweep(
    task: &Task,
    failed_criteria: &[String],
    dispatcher: &ProviderDispatcher,
) -> anyhow::Result<bool> {
    if failed_criteria.is_empty() {
        return Ok(true);
    }

    let prompt = format!(
        "This is the final check for task {}. Using only evidence already produced -- ask no \
         further questions -- confirm whether every one of the following criteria is now \
         satisfied.\nRespond with a single JSON object {{\"all_criteria_satisfied\": bool}}.\n\n{}\n",
        task.task_id,
        failed_criteria.iter().map(|c| format!("- {c}")).collect::<Vec<_>>().join("\n")
    );
    let cwd = std::env::temp_dir();
    let req = DispatchRequest {
        prompt: &prompt,
        cwd: &cwd,
        agent_mode: None,
        session_id: None,
        feature_id: task.feature_id.as_deref(),
    };
    let (result, _provider) = dispatcher.execute(&req).await;
    if result.exit_code != 0 {
        return Ok(false);
    }

    Ok(super::standard::extract_outermost_json(&result.raw_output())
        .and_then(|j| j.get("all_criteria_satisfied").and_then(|v| v.as_bool()))
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(confidence: Confidence, uncertain: Vec<&str>) -> ValidationReport {
        ValidationReport {
            valid: false,
            confidence,
            rules_passed: vec![],
            rules_failed: vec![],
            failed_criteria: vec![],
            uncertain_criteria: uncertain.into_iter().map(String::from).collect(),
            reason: None,
        }
    }

    #[test]
    fn runs_on_uncertain_confidence() {
        assert!(should_run(&report(Confidence::Uncertain, vec!["x"]), false));
    }

    #[test]
    fn runs_on_low_confidence_with_uncertain_criteria() {
        assert!(should_run(&report(Confidence::Low, vec!["x"]), false));
    }

    #[test]
    fn does_not_run_on_low_confidence_without_uncertain_criteria() {
        assert!(!should_run(&report(Confidence::Low, vec![]), false));
    }

    #[test]
    fn does_not_run_twice_for_same_attempt() {
        assert!(!should_run(&report(Confidence::Uncertain, vec!["x"]), true));
    }

    #[test]
    fn does_not_run_when_already_valid() {
        let mut r = report(Confidence::Uncertain, vec!["x"]);
        r.valid = true;
        assert!(!should_run(&r, false));
    }

    #[test]
    fn parse_answer_falls_back_to_supplied_criteria_on_bad_json() {
        let fallback = vec!["c1".to_string()];
        let answer = parse_answer("not json", &fallback);
        assert!(!answer.all_satisfied);
        assert_eq!(answer.unresolved, fallback);
    }

    #[tokio::test]
    async fn final_sweep_with_no_failing_criteria_is_vacuously_satisfied() {
        use crate::dispatcher::{Provider, ProviderDispatcher};
        use crate::store::memory::MemoryCircuitBreakerStore;
        use std::sync::Arc;

        struct Unreachable;
        #[async_trait::async_trait]
        impl crate::dispatcher::ProviderAdapter for Unreachable {
            async fn invoke(
                &self,
                _provider: Provider,
                _req: &DispatchRequest<'_>,
            ) -> anyhow::Result<crate::state::ProviderResult> {
                panic!("final_sweep must not dispatch when there is nothing left to confirm")
            }
        }

        let dispatcher = ProviderDispatcher::new(
            vec![Provider::Gemini],
            Arc::new(MemoryCircuitBreakerStore::default()),
            3600,
            Arc::new(Unreachable),
        );
        let t = crate::state::Task {
            task_id: "t-1".into(),
            intent: "x".into(),
            task_type: crate::state::TaskType::Coding,
            instructions: "x".into(),
            acceptance_criteria: vec![],
            tool: None,
            retry_policy: crate::state::RetryPolicy::default(),
            tests_required: None,
            test_command: None,
            expected_json_schema: None,
            required_artifacts: None,
            feature_id: None,
            meta: None,
        };
        assert!(final_sweep(&t, &[], &dispatcher).await.unwrap());
    }
}
